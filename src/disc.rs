//! The polymorphic block-disc abstraction.
//!
//! A [`Disc`] is anything that can read and write whole sectors: a raw
//! platform device ([`crate::iface::IfaceDisc`]), an in-memory image
//! ([`crate::ramdisc::RamDisc`]), or a cache stacked on top of another disc
//! ([`crate::cache::CacheDisc`]). Shared ownership is an [`alloc::sync::Arc`]:
//! every owner (a mounted volume, a cache wrapper) holds one handle, and
//! dropping the last one destroys the disc — the cache flushes itself, the
//! raw adapter shuts its device down.

use alloc::sync::Arc;

use core::fmt;

/// An absolute sector index (or count) on a disc.
pub type Sector = u64;

/// The all-ones sentinel: "no sector".
///
/// A freshly created raw-device adapter reports this as its sector count
/// until the partition prober resolves the real size from the MBR; the
/// sector cache uses the same value to tag unused page slots.
pub const SECTOR_NONE: Sector = !0;

bitflags::bitflags! {
    /// Feature bits a disc exposes to its consumers.
    ///
    /// Filesystem drivers consult these to decide whether format-style
    /// recovery is permitted and whether to report a volume as read-only.
    pub struct Features: u16 {
        const CAN_READ   = 0x01;
        const CAN_WRITE  = 0x02;
        const CAN_FORMAT = 0x04;
    }
}

/// An opaque tag identifying the underlying device kind, fourcc style.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoType(pub u32);

impl IoType {
    pub const fn fourcc(tag: &[u8; 4]) -> Self {
        Self(u32::from_le_bytes(*tag))
    }
}

impl fmt::Debug for IoType {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "IoType(")?;
        for b in self.0.to_le_bytes().iter() {
            if b.is_ascii_graphic() || *b == b' ' {
                write!(fmt, "{}", *b as char)?;
            } else {
                write!(fmt, "\\x{:02x}", b)?;
            }
        }
        write!(fmt, ")")
    }
}

/// Errors at the disc/cache boundary.
///
/// Deliberately coarse; translation to POSIX error codes happens at the
/// filesystem boundary, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DiscError {
    /// The requested sector range exceeds the disc.
    OutOfBounds,
    /// The underlying device failed the transfer.
    Io,
}

impl fmt::Display for DiscError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscError::OutOfBounds => write!(fmt, "sector range out of bounds"),
            DiscError::Io => write!(fmt, "device I/O error"),
        }
    }
}

using_std! {
    impl std::error::Error for DiscError { }
}

/// Uniform sector I/O over some block device.
///
/// Sector counts are implied by buffer length, which must be a multiple of
/// [`Disc::sector_size`]; a zero-length buffer is a successful no-op.
/// Implementations are not required to be internally concurrent — the cache
/// serializes itself, and independent users of a shared disc serialize their
/// own access.
pub trait Disc: Send + Sync {
    /// Tag for the underlying device kind.
    fn io_type(&self) -> IoType;

    /// What the device can do.
    fn features(&self) -> Features;

    /// Bytes per sector. A power of two, fixed for the disc's lifetime.
    fn sector_size(&self) -> usize;

    /// Total sector count, or [`SECTOR_NONE`] when not yet known.
    fn num_sectors(&self) -> Sector;

    /// Resolves an unknown sector count.
    ///
    /// This is the single permitted post-construction mutation, used by the
    /// partition prober while it is still the disc's sole user. Discs whose
    /// size is known at creation ignore it.
    fn set_num_sectors(&self, _num_sectors: Sector) {}

    /// Reads `buffer.len() / sector_size` sectors starting at `first_sector`.
    fn read_sectors(&self, buffer: &mut [u8], first_sector: Sector) -> Result<(), DiscError>;

    /// Writes `buffer.len() / sector_size` sectors starting at `first_sector`.
    fn write_sectors(&self, buffer: &[u8], first_sector: Sector) -> Result<(), DiscError>;

    /// Pushes any buffered writes down to the device.
    fn flush(&self) -> Result<(), DiscError>;
}

/// A counted share of a disc.
pub type DiscHandle = Arc<dyn Disc>;
