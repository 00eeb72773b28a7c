//! In-memory discs: ROM images and scratch media.

use crate::disc::{Disc, DiscError, DiscHandle, Features, IoType, Sector};
use crate::mutex::Mutex;

use alloc::sync::Arc;
use alloc::vec::Vec;

/// A disc backed by a byte vector.
///
/// Covers two jobs: read-only ROM images handed to a filesystem driver, and
/// writable scratch discs (tests, benches, format targets). Unlike a raw
/// device adapter the size is known up front, so there is no unknown-size
/// sentinel to resolve.
pub struct RamDisc {
    data: Mutex<Vec<u8>>,
    sector_size: usize,
    num_sectors: Sector,
    features: Features,
}

impl RamDisc {
    pub const IO_TYPE: IoType = IoType::fourcc(b"RAM ");

    /// A zero-filled writable disc.
    pub fn new(num_sectors: Sector, sector_size: usize) -> DiscHandle {
        let len = num_sectors as usize * sector_size;
        Self::build(alloc::vec![0; len], sector_size, Features::CAN_READ | Features::CAN_WRITE)
    }

    /// A writable disc over existing contents (padded up to a whole sector).
    pub fn from_image(image: Vec<u8>, sector_size: usize) -> DiscHandle {
        Self::build(image, sector_size, Features::CAN_READ | Features::CAN_WRITE)
    }

    /// A ROM image: reads succeed, writes fail, and `CAN_WRITE` is unset so
    /// drivers mount it read-only.
    pub fn read_only_image(image: Vec<u8>, sector_size: usize) -> DiscHandle {
        Self::build(image, sector_size, Features::CAN_READ)
    }

    fn build(mut image: Vec<u8>, sector_size: usize, features: Features) -> DiscHandle {
        assert!(sector_size.is_power_of_two());

        let rem = image.len() % sector_size;
        if rem != 0 {
            image.resize(image.len() + sector_size - rem, 0);
        }

        Arc::new(Self {
            num_sectors: (image.len() / sector_size) as Sector,
            data: Mutex::new(image),
            sector_size,
            features,
        })
    }

    fn check_range(&self, first_sector: Sector, count: Sector) -> Result<usize, DiscError> {
        if first_sector >= self.num_sectors || count > self.num_sectors - first_sector {
            return Err(DiscError::OutOfBounds);
        }

        Ok(first_sector as usize * self.sector_size)
    }
}

impl Disc for RamDisc {
    fn io_type(&self) -> IoType {
        Self::IO_TYPE
    }

    fn features(&self) -> Features {
        self.features
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn num_sectors(&self) -> Sector {
        self.num_sectors
    }

    fn read_sectors(&self, buffer: &mut [u8], first_sector: Sector) -> Result<(), DiscError> {
        let count = (buffer.len() / self.sector_size) as Sector;
        let off = self.check_range(first_sector, count)?;

        let data = self.data.lock();
        buffer.copy_from_slice(&data[off..off + buffer.len()]);
        Ok(())
    }

    fn write_sectors(&self, buffer: &[u8], first_sector: Sector) -> Result<(), DiscError> {
        if !self.features.contains(Features::CAN_WRITE) {
            return Err(DiscError::Io);
        }

        let count = (buffer.len() / self.sector_size) as Sector;
        let off = self.check_range(first_sector, count)?;

        let mut data = self.data.lock();
        data[off..off + buffer.len()].copy_from_slice(buffer);
        Ok(())
    }

    fn flush(&self) -> Result<(), DiscError> {
        Ok(())
    }
}

#[cfg(test)]
mod ramdisc {
    use super::*;

    #[test]
    fn round_trips_sectors() {
        let disc = RamDisc::new(16, 512);

        let data = [0x5Au8; 1024];
        disc.write_sectors(&data, 2).unwrap();

        let mut back = [0u8; 1024];
        disc.read_sectors(&mut back, 2).unwrap();
        assert_eq!(back[..], data[..]);
    }

    #[test]
    fn bounds_are_enforced() {
        let disc = RamDisc::new(4, 512);
        let mut buf = [0u8; 512];

        assert_eq!(disc.read_sectors(&mut buf, 4), Err(DiscError::OutOfBounds));
        assert_eq!(disc.write_sectors(&buf, 4), Err(DiscError::OutOfBounds));

        let mut big = [0u8; 3 * 512];
        assert_eq!(disc.read_sectors(&mut big, 2), Err(DiscError::OutOfBounds));
    }

    #[test]
    fn images_pad_to_whole_sectors() {
        let disc = RamDisc::from_image(alloc::vec![1u8; 700], 512);
        assert_eq!(disc.num_sectors(), 2);

        let mut back = [0u8; 1024];
        disc.read_sectors(&mut back, 0).unwrap();
        assert!(back[..700].iter().all(|b| *b == 1));
        assert!(back[700..].iter().all(|b| *b == 0));
    }

    #[test]
    fn rom_images_reject_writes() {
        let disc = RamDisc::read_only_image(alloc::vec![0u8; 1024], 512);
        assert!(!disc.features().contains(Features::CAN_WRITE));

        let buf = [0u8; 512];
        assert_eq!(disc.write_sectors(&buf, 0), Err(DiscError::Io));
    }
}
