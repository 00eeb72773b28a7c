//! Partition discovery: MBR/VBR identification and probe-and-mount.
//!
//! Sector 0 of a disc is either a Volume Boot Record (the disc is one big
//! filesystem), a Master Boot Record (up to four primary partitions), or
//! neither. Identification is string- and heuristic-based, the way every
//! other implementation does it: jump prologue + boot signature, then the
//! OEM/type strings, then the FAT BIOS Parameter Block sanity checks.

use crate::cache::CacheDisc;
use crate::config::BUFFER_ALIGN;
use crate::disc::{Disc, DiscHandle, Sector, SECTOR_NONE};
use crate::iface::{BlockIo, IfaceDisc};
use crate::util::bytes::{read_le16, read_le32, read_u8};
use crate::util::AlignedBuf;
use crate::volume::{mount_partition, mount_volume};

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use core::fmt;

/// An MBR holds at most four primary partitions.
pub const MAX_PARTITIONS: usize = 4;

const MBR_TABLE_OFFSET: usize = 0x1be;
const BOOT_SIGNATURE_OFFSET: usize = 0x1fe;
const BOOT_SIGNATURE: u16 = 0xaa55;

// MBR partition types we skip: unused, and the two extended-partition
// containers (extended partitions are not descended into).
const PART_TYPE_EMPTY: u8 = 0x00;
const PART_TYPE_EXTENDED_CHS: u8 = 0x05;
const PART_TYPE_EXTENDED_LBA: u8 = 0x0f;

bitflags::bitflags! {
    pub struct ProbeFlags: u32 {
        /// Also read each partition's first sector and identify its
        /// filesystem.
        const IDENT_FSTYPE = 1 << 0;
    }
}

/// One discovered partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    /// MBR slot (0..4). A whole-disc VBR reports slot 0.
    pub index: u8,
    /// Raw MBR partition type byte (0 for a whole-disc VBR).
    pub part_type: u8,
    /// Identified filesystem, when identification ran and succeeded.
    /// `None` means unknown: do not auto-mount.
    pub fstype: Option<&'static str>,
    pub start_sector: Sector,
    pub num_sectors: Sector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProbeError {
    /// Reading sector 0 or a partition's first sector failed.
    Io,
    /// An MBR entry carries an invalid status byte.
    MalformedTable,
    /// The partitions claim more sectors than the disc has.
    OutOfBoundsPartitions,
    /// No memory for the sector scratch buffer.
    AllocFailed,
}

impl fmt::Display for ProbeError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Io => write!(fmt, "disc read error"),
            ProbeError::MalformedTable => write!(fmt, "malformed partition table"),
            ProbeError::OutOfBoundsPartitions => write!(fmt, "out of bound partitions"),
            ProbeError::AllocFailed => write!(fmt, "sector buffer allocation failed"),
        }
    }
}

using_std! {
    impl std::error::Error for ProbeError { }
}

enum SectorZero {
    /// No boot signature at all.
    Unknown,
    /// Boot signature, no x86 jump prologue: a partition table.
    Mbr,
    /// A Microsoft-style Volume Boot Record of the named filesystem.
    Vbr(&'static str),
}

fn identify_sector0(buf: &[u8]) -> SectorZero {
    let jmp = read_u8(buf, 0);
    let has_signature = read_le16(buf, BOOT_SIGNATURE_OFFSET) == BOOT_SIGNATURE;

    // A valid Microsoft VBR starts with an x86 jump (0xEB/0xE9/0xE8).
    if has_signature && (jmp == 0xeb || jmp == 0xe9 || jmp == 0xe8) {
        // NTFS and exFAT put their name where FAT puts the OEM string.
        if &buf[3..11] == b"NTFS    " {
            return SectorZero::Vbr("ntfs");
        } else if &buf[3..11] == b"EXFAT   " {
            return SectorZero::Vbr("exfat");
        }

        // FAT32 names itself in the extended BPB.
        if &buf[0x52..0x5a] == b"FAT32   " {
            return SectorZero::Vbr("vfat");
        }

        // FAT12/FAT16 have no reliable tag; sanity-check the BPB instead.
        let bytes_per_sector = read_le16(buf, 0x00b) as u32;
        let sectors_per_cluster = read_u8(buf, 0x00d) as u32;
        let num_rsvd_sectors = read_le16(buf, 0x00e);
        let num_fats = read_u8(buf, 0x010);
        let num_root_entries = read_le16(buf, 0x011);
        let total_sectors_16 = read_le16(buf, 0x013);
        let sectors_per_fat = read_le16(buf, 0x016);
        let total_sectors_32 = read_le32(buf, 0x020);
        if bytes_per_sector.is_power_of_two()
            && sectors_per_cluster.is_power_of_two()
            && num_rsvd_sectors > 0
            && (num_fats == 1 || num_fats == 2)
            && num_root_entries > 0
            && (total_sectors_16 >= 0x40 || total_sectors_32 >= 0x10000)
            && sectors_per_fat > 0
        {
            return SectorZero::Vbr("vfat");
        }
    }

    // Otherwise: assume MBR if the signature is present.
    if has_signature {
        SectorZero::Mbr
    } else {
        SectorZero::Unknown
    }
}

fn read_table(
    disc: &DiscHandle,
    max_partitions: usize,
    flags: ProbeFlags,
    buf: &mut [u8],
) -> Result<Vec<PartInfo>, ProbeError> {
    disc.read_sectors(buf, 0).map_err(|_| ProbeError::Io)?;

    match identify_sector0(buf) {
        SectorZero::Vbr(fstype) => {
            log::debug!("prober: found VBR ({})", fstype);
            let mut parts = Vec::with_capacity(1);
            parts.push(PartInfo {
                index: 0,
                part_type: 0,
                fstype: Some(fstype),
                start_sector: 0,
                num_sectors: disc.num_sectors(),
            });
            return Ok(parts);
        }
        SectorZero::Mbr => log::debug!("prober: found MBR"),
        SectorZero::Unknown => {
            log::debug!("prober: no MBR or VBR");
            return Ok(Vec::new());
        }
    }

    let mut parts = Vec::new();
    let mut total_used: Sector = 0;

    for i in 0..MAX_PARTITIONS {
        if parts.len() >= max_partitions {
            break;
        }

        let entry = &buf[MBR_TABLE_OFFSET + 16 * i..MBR_TABLE_OFFSET + 16 * (i + 1)];
        let status = entry[0];
        let part_type = entry[4];

        // Only "inactive" and "bootable" are legal status bytes.
        if status != 0x00 && status != 0x80 {
            log::debug!("prober: malformed MBR (slot {} status {:#04x})", i, status);
            return Err(ProbeError::MalformedTable);
        }

        if part_type == PART_TYPE_EMPTY
            || part_type == PART_TYPE_EXTENDED_CHS
            || part_type == PART_TYPE_EXTENDED_LBA
        {
            continue;
        }

        let start_sector = read_le32(entry, 8) as Sector;
        let num_sectors = read_le32(entry, 12) as Sector;

        parts.push(PartInfo {
            index: i as u8,
            part_type,
            fstype: None,
            start_sector,
            num_sectors,
        });

        total_used = total_used.max(start_sector + num_sectors);
    }

    // Resolve an unknown disc size from the table; otherwise the table must
    // fit the disc.
    log::trace!("prober: disc size {:#x}", disc.num_sectors());
    log::trace!("prober: used size {:#x}", total_used);
    if disc.num_sectors() == SECTOR_NONE {
        disc.set_num_sectors(total_used);
    } else if total_used > disc.num_sectors() {
        log::debug!("prober: out of bound partitions");
        return Err(ProbeError::OutOfBoundsPartitions);
    }

    if flags.contains(ProbeFlags::IDENT_FSTYPE) {
        for part in parts.iter_mut() {
            log::trace!(
                "prober: [{}:{:02X}] {:#x} {:#x}",
                part.index,
                part.part_type,
                part.start_sector,
                part.num_sectors
            );

            disc.read_sectors(buf, part.start_sector)
                .map_err(|_| ProbeError::Io)?;

            if let SectorZero::Vbr(fstype) = identify_sector0(buf) {
                log::trace!("prober:   fstype {}", fstype);
                part.fstype = Some(fstype);
            }
        }
    }

    Ok(parts)
}

/// Reads and identifies the disc's partition table.
///
/// Returns up to `max_partitions` entries. A disc whose sector 0 is itself a
/// VBR yields a single whole-disc partition. A disc with an unknown sector
/// count has it resolved here, while the caller is still its only user.
pub fn read_partition_table(
    disc: &DiscHandle,
    max_partitions: usize,
    flags: ProbeFlags,
) -> Result<Vec<PartInfo>, ProbeError> {
    if max_partitions == 0 {
        return Ok(Vec::new());
    }

    // Identification needs the full 512-byte boot sector.
    if disc.sector_size() < 512 {
        return Ok(Vec::new());
    }

    let mut buf =
        AlignedBuf::zeroed(disc.sector_size(), BUFFER_ALIGN).ok_or(ProbeError::AllocFailed)?;

    read_table(disc, max_partitions, flags, &mut buf)
}

/// Probes `disc` and mounts every partition with an identified filesystem.
///
/// Slot 0 keeps `basename` as its volume name; later slots append their
/// one-based slot digit (`sd`, `sd2`, `sd3`, ...). A disc with no
/// recognizable table at all gets one last chance as whole-disc exFAT —
/// common for unpartitioned media. Returns the number of volumes mounted.
pub fn probe_mount_disc(basename: &str, disc: &DiscHandle) -> usize {
    let parts = match read_partition_table(disc, MAX_PARTITIONS, ProbeFlags::IDENT_FSTYPE) {
        Ok(parts) => parts,
        Err(_) => Vec::new(),
    };

    if parts.is_empty() {
        return if mount_volume(basename, disc, 0, "exfat").is_ok() {
            1
        } else {
            0
        };
    }

    log::debug!("prober: loaded {} partitions", parts.len());

    let cut = basename.len().min(14);
    let base = basename.get(..cut).unwrap_or(basename);

    let mut num_mounted = 0;
    for part in parts.iter() {
        if part.fstype.is_none() {
            continue;
        }

        let mut volname = String::from(base);
        if part.index != 0 {
            volname.push((b'1' + part.index) as char);
        }

        if mount_partition(&volname, disc, part).is_ok() {
            num_mounted += 1;
        }
    }

    num_mounted
}

/// Binds a raw platform device end to end: adapter, optional cache
/// (`cache_pages != 0`), probe, mount. Returns the number of volumes
/// mounted; when nothing mounts the disc is released again.
pub fn probe_mount_disc_iface(
    basename: &str,
    iface: Box<dyn BlockIo>,
    cache_pages: u32,
    sectors_per_page: u32,
) -> usize {
    let disc = match IfaceDisc::create(iface) {
        Some(disc) => disc,
        None => return 0,
    };

    let disc = if cache_pages != 0 {
        CacheDisc::new(disc, cache_pages, sectors_per_page)
    } else {
        disc
    };

    probe_mount_disc(basename, &disc)
}
