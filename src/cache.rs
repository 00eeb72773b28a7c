//! The write-back sector cache; that which all reads and writes to a
//! mounted disc flow through.
//!
//! A [`CacheDisc`] wraps any [`Disc`] and is itself a [`Disc`], so it stacks
//! directly under the partition prober and the filesystem drivers. Pages of
//! `sectors_per_page` contiguous sectors live in one aligned buffer; entries
//! are kept on an MRU list (head = most recent) whose links are indices into
//! the entry arena.
//!
//! Writes land in pages and stay there: only `flush`, destruction, and the
//! eviction path issue inner writes. Whole-page accesses from a suitably
//! aligned caller buffer bypass the pages entirely and go straight to the
//! inner disc, coalesced across contiguous uncached pages, so bulk streaming
//! does not evict a small-random working set.

use crate::config::BUFFER_ALIGN;
use crate::disc::{Disc, DiscError, DiscHandle, Features, IoType, Sector, SECTOR_NONE};
use crate::mutex::Mutex;
use crate::util::AlignedBuf;

use alloc::sync::Arc;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicU64, Ordering};

/// Platform predicate deciding whether a caller's buffer may be handed to
/// the inner disc directly. Platforms with DMA constraints tighten this.
pub type AlignedAccessFn = fn(ptr: *const u8, is_write: bool) -> bool;

fn default_aligned_access(ptr: *const u8, _is_write: bool) -> bool {
    (ptr as usize) & (BUFFER_ALIGN - 1) == 0
}

const NO_ENTRY: u32 = !0;

// Dirty ranges are u16 sector counts within a page.
const MAX_SECTORS_PER_PAGE: u32 = 1 << 15;

struct PageEntry {
    prev: u32,
    next: u32,
    /// First sector of the cached page, or [`SECTOR_NONE`] for an unused slot.
    base_sector: Sector,
    /// Dirty range `[dirty_start, dirty_end)` in sectors within the page;
    /// `dirty_start >= dirty_end` means clean.
    dirty_start: u16,
    dirty_end: u16,
}

struct CacheState {
    entries: Vec<PageEntry>,
    head: u32,
    tail: u32,
    data: AlignedBuf,
}

enum Xfer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl Xfer<'_> {
    fn len(&self) -> usize {
        match self {
            Xfer::Read(buf) => buf.len(),
            Xfer::Write(buf) => buf.len(),
        }
    }

    fn ptr(&self) -> *const u8 {
        match self {
            Xfer::Read(buf) => buf.as_ptr(),
            Xfer::Write(buf) => buf.as_ptr(),
        }
    }

    fn is_write(&self) -> bool {
        matches!(self, Xfer::Write(_))
    }
}

/// A write-back LRU page cache stacked on an inner disc.
pub struct CacheDisc {
    inner: DiscHandle,
    io_type: IoType,
    features: Features,
    sector_size: usize,
    num_sectors: AtomicU64,
    /// log2 of sectors per page.
    page_shift: u32,
    is_aligned: AlignedAccessFn,
    state: Mutex<CacheState>,
}

impl CacheDisc {
    /// Wraps `inner` in a cache of `cache_pages` pages of `sectors_per_page`
    /// sectors each, using the default alignment predicate.
    ///
    /// Invalid geometry (zero pages, sectors per page zero or not a power of
    /// two) or allocation failure is non-fatal: `inner` is returned unwrapped.
    pub fn new(inner: DiscHandle, cache_pages: u32, sectors_per_page: u32) -> DiscHandle {
        Self::with_aligned_access(inner, cache_pages, sectors_per_page, default_aligned_access)
    }

    /// Like [`CacheDisc::new`] with a platform-supplied alignment predicate.
    pub fn with_aligned_access(
        inner: DiscHandle,
        cache_pages: u32,
        sectors_per_page: u32,
        is_aligned: AlignedAccessFn,
    ) -> DiscHandle {
        match Self::try_build(inner, cache_pages, sectors_per_page, is_aligned) {
            Ok(cache) => Arc::new(cache),
            Err(inner) => inner,
        }
    }

    fn try_build(
        inner: DiscHandle,
        cache_pages: u32,
        sectors_per_page: u32,
        is_aligned: AlignedAccessFn,
    ) -> Result<Self, DiscHandle> {
        if cache_pages == 0
            || cache_pages >= NO_ENTRY
            || sectors_per_page == 0
            || !sectors_per_page.is_power_of_two()
            || sectors_per_page > MAX_SECTORS_PER_PAGE
        {
            return Err(inner);
        }

        let sector_size = inner.sector_size();
        let len = (cache_pages as usize)
            .checked_mul(sectors_per_page as usize)
            .and_then(|n| n.checked_mul(sector_size));

        let data = match len.and_then(|len| AlignedBuf::zeroed(len, BUFFER_ALIGN)) {
            Some(data) => data,
            None => return Err(inner),
        };

        let mut entries = Vec::with_capacity(cache_pages as usize);
        for i in 0..cache_pages {
            entries.push(PageEntry {
                prev: if i == 0 { NO_ENTRY } else { i - 1 },
                next: if i + 1 < cache_pages { i + 1 } else { NO_ENTRY },
                base_sector: SECTOR_NONE,
                dirty_start: sectors_per_page as u16,
                dirty_end: 0,
            });
        }

        Ok(Self {
            io_type: inner.io_type(),
            features: inner.features(),
            sector_size,
            num_sectors: AtomicU64::new(inner.num_sectors()),
            page_shift: sectors_per_page.trailing_zeros(),
            is_aligned,
            state: Mutex::new(CacheState {
                entries,
                head: 0,
                tail: cache_pages - 1,
                data,
            }),
            inner,
        })
    }

    /// Walks the MRU list for `page_sector`.
    ///
    /// Returns an exact match, or the entry with the smallest `base_sector`
    /// strictly above `page_sector` (the bound for direct-access
    /// segmentation), or `None`. The first unused slot terminates the walk:
    /// unused slots form a contiguous run at the list tail.
    fn search(&self, st: &CacheState, page_sector: Sector) -> Option<u32> {
        let mut min_sec = SECTOR_NONE;
        let mut ret = None;

        let mut i = st.head;
        while i != NO_ENTRY {
            let e = &st.entries[i as usize];

            if e.base_sector == SECTOR_NONE {
                break;
            }

            if e.base_sector == page_sector {
                return Some(i);
            }

            if e.base_sector > page_sector && e.base_sector < min_sec {
                min_sec = e.base_sector;
                ret = Some(i);
            }

            i = e.next;
        }

        ret
    }

    /// Picks the entry to reuse: the unused slot closest to the list head if
    /// any (cheap warm-up), otherwise the least recently used entry.
    fn pick_victim(st: &CacheState) -> u32 {
        let mut i = st.tail;

        loop {
            let e = &st.entries[i as usize];
            if e.base_sector != SECTOR_NONE || e.prev == NO_ENTRY {
                break;
            }
            if st.entries[e.prev as usize].base_sector != SECTOR_NONE {
                break;
            }
            i = e.prev;
        }

        i
    }

    fn make_mru(st: &mut CacheState, i: u32) {
        if st.head == i {
            return;
        }

        let (prev, next) = {
            let e = &st.entries[i as usize];
            (e.prev, e.next)
        };

        if prev != NO_ENTRY {
            st.entries[prev as usize].next = next;
        } else {
            st.head = next;
        }
        if next != NO_ENTRY {
            st.entries[next as usize].prev = prev;
        } else {
            st.tail = prev;
        }

        let e = &mut st.entries[i as usize];
        e.prev = NO_ENTRY;
        e.next = st.head;
        st.entries[st.head as usize].prev = i;
        st.head = i;
    }

    /// Writes the entry's dirty range to the inner disc and marks it clean.
    /// A failed write leaves the range dirty.
    fn flush_entry(&self, st: &mut CacheState, i: u32) -> Result<(), DiscError> {
        let ss = self.sector_size;
        let page_len = 1usize << self.page_shift;

        let (sector, off, len) = {
            let e = &st.entries[i as usize];
            if e.dirty_start >= e.dirty_end {
                return Ok(());
            }

            let start = e.dirty_start as usize;
            let end = e.dirty_end as usize;
            (
                e.base_sector + start as Sector,
                ((i as usize) << self.page_shift) * ss + start * ss,
                (end - start) * ss,
            )
        };

        log::trace!("cache: flush {:#x} ({} B)", sector, len);
        if let Err(e) = self.inner.write_sectors(&st.data[off..off + len], sector) {
            log::debug!("cache: flush of {:#x} failed", sector);
            return Err(e);
        }

        let e = &mut st.entries[i as usize];
        e.dirty_start = page_len as u16;
        e.dirty_end = 0;
        Ok(())
    }

    fn read_write(&self, mut xfer: Xfer<'_>, mut first_sector: Sector) -> Result<(), DiscError> {
        let ss = self.sector_size;
        let total = self.num_sectors.load(Ordering::Relaxed);

        debug_assert_eq!(xfer.len() % ss, 0);
        let mut remaining = (xfer.len() / ss) as Sector;

        if first_sector >= total || remaining > total - first_sector {
            return Err(DiscError::OutOfBounds);
        }

        let is_write = xfer.is_write();
        let is_aligned = (self.is_aligned)(xfer.ptr(), is_write);
        let page_len = 1u64 << self.page_shift;
        let page_mask = page_len - 1;

        let mut st = self.state.lock();
        let st = &mut *st;

        // The entry found by the last search: either the sought page itself
        // or the nearest cached page above it. Valid until the walk advances
        // past `search_base`.
        let mut cur: Option<u32> = None;
        let mut search_base: Sector = 0;

        let mut buf_pos = 0usize;

        while remaining > 0 {
            let cur_page_sector = first_sector & !page_mask;
            let cur_page_offset = (first_sector & page_mask) as usize;

            let max_cur_sectors = page_len - cur_page_offset as Sector;
            let mut cur_sectors = remaining.min(max_cur_sectors);

            // Not a partial read/write?
            let is_whole = cur_page_offset == 0 && cur_sectors == page_len;

            if cur_page_sector >= search_base {
                cur = self.search(st, cur_page_sector);
                search_base = match cur {
                    Some(i) => st.entries[i as usize].base_sector + 1,
                    None => SECTOR_NONE,
                };
            }

            let hit = cur.filter(|&i| st.entries[i as usize].base_sector == cur_page_sector);

            let entry = if hit.is_some() {
                hit
            } else if !is_whole || !is_aligned {
                // Stage the page in the cache.
                let v = Self::pick_victim(st);
                self.flush_entry(st, v)?;
                st.entries[v as usize].base_sector = cur_page_sector;

                if !is_write || !is_whole {
                    // Read in (truncated at disc end)...
                    let load = page_len.min(total - cur_page_sector) as usize;
                    let off = ((v as usize) << self.page_shift) * ss;
                    log::trace!("cache: load {:#x} ({})", cur_page_sector, load);

                    if let Err(e) = self
                        .inner
                        .read_sectors(&mut st.data[off..off + load * ss], cur_page_sector)
                    {
                        st.entries[v as usize].base_sector = SECTOR_NONE;
                        log::debug!("cache: load of {:#x} failed", cur_page_sector);
                        return Err(e);
                    }
                }

                cur = Some(v);
                cur
            } else {
                // Whole pages from an aligned buffer: hand the caller's
                // buffer to the inner disc, through to the next cached page
                // (or disc end).
                let limit = match cur {
                    Some(i) => st.entries[i as usize].base_sector,
                    None => total,
                };
                cur_sectors = remaining.min(limit - first_sector);

                let len = cur_sectors as usize * ss;
                log::trace!("cache: direct {:#x} ({})", first_sector, cur_sectors);
                match &mut xfer {
                    Xfer::Read(buf) => self
                        .inner
                        .read_sectors(&mut buf[buf_pos..buf_pos + len], first_sector)?,
                    Xfer::Write(buf) => self
                        .inner
                        .write_sectors(&buf[buf_pos..buf_pos + len], first_sector)?,
                }

                None
            };

            if let Some(i) = entry {
                let off = ((i as usize) << self.page_shift) * ss + cur_page_offset * ss;
                let len = cur_sectors as usize * ss;
                let page = &mut st.data[off..off + len];

                match &mut xfer {
                    Xfer::Read(buf) => buf[buf_pos..buf_pos + len].copy_from_slice(page),
                    Xfer::Write(buf) => {
                        page.copy_from_slice(&buf[buf_pos..buf_pos + len]);

                        let e = &mut st.entries[i as usize];
                        let dirty_end = (cur_page_offset as Sector + cur_sectors) as u16;
                        if (cur_page_offset as u16) < e.dirty_start {
                            e.dirty_start = cur_page_offset as u16;
                        }
                        if dirty_end > e.dirty_end {
                            e.dirty_end = dirty_end;
                        }
                    }
                }

                // Partial accesses refresh recency; whole-page hits don't
                // perturb the list.
                if !is_whole {
                    Self::make_mru(st, i);
                }
            }

            buf_pos += cur_sectors as usize * ss;
            first_sector += cur_sectors;
            remaining -= cur_sectors;
        }

        Ok(())
    }

    #[cfg(test)]
    fn resident_pages(&self) -> Vec<Sector> {
        let st = self.state.lock();
        let mut pages = Vec::new();
        let mut i = st.head;
        while i != NO_ENTRY {
            let e = &st.entries[i as usize];
            if e.base_sector != SECTOR_NONE {
                pages.push(e.base_sector);
            }
            i = e.next;
        }
        pages
    }

    #[cfg(test)]
    fn dirty_pages(&self) -> Vec<(Sector, u16, u16)> {
        let st = self.state.lock();
        st.entries
            .iter()
            .filter(|e| e.base_sector != SECTOR_NONE && e.dirty_start < e.dirty_end)
            .map(|e| (e.base_sector, e.dirty_start, e.dirty_end))
            .collect()
    }

    #[cfg(test)]
    fn empties_form_list_tail(&self) -> bool {
        let st = self.state.lock();
        let mut seen_empty = false;
        let mut i = st.head;
        while i != NO_ENTRY {
            let e = &st.entries[i as usize];
            if e.base_sector == SECTOR_NONE {
                seen_empty = true;
            } else if seen_empty {
                return false;
            }
            i = e.next;
        }
        true
    }
}

impl Disc for CacheDisc {
    fn io_type(&self) -> IoType {
        self.io_type
    }

    fn features(&self) -> Features {
        self.features
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn num_sectors(&self) -> Sector {
        self.num_sectors.load(Ordering::Relaxed)
    }

    fn set_num_sectors(&self, num_sectors: Sector) {
        self.num_sectors.store(num_sectors, Ordering::Relaxed);
    }

    fn read_sectors(&self, buffer: &mut [u8], first_sector: Sector) -> Result<(), DiscError> {
        log::trace!("cache: read({:#x}, {})", first_sector, buffer.len());
        self.read_write(Xfer::Read(buffer), first_sector)
    }

    fn write_sectors(&self, buffer: &[u8], first_sector: Sector) -> Result<(), DiscError> {
        log::trace!("cache: write({:#x}, {})", first_sector, buffer.len());
        self.read_write(Xfer::Write(buffer), first_sector)
    }

    /// Flushes every dirty page, in list order.
    ///
    /// Best-effort: a failed entry stays dirty and flushing continues with
    /// the rest; the first error is returned once the walk is done.
    fn flush(&self) -> Result<(), DiscError> {
        let mut st = self.state.lock();
        let st = &mut *st;

        let mut result = Ok(());

        let mut i = st.head;
        while i != NO_ENTRY {
            if st.entries[i as usize].base_sector == SECTOR_NONE {
                break;
            }

            if let Err(e) = self.flush_entry(st, i) {
                if result.is_ok() {
                    result = Err(e);
                }
            }

            i = st.entries[i as usize].next;
        }

        result
    }
}

impl Drop for CacheDisc {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("cache: flush on destroy failed: {}", e);
        }
    }
}
