//! The raw-device adapter: platform block devices as discs.

use crate::disc::{Disc, DiscError, DiscHandle, Features, IoType, Sector, SECTOR_NONE};

use alloc::boxed::Box;
use alloc::sync::Arc;

use core::sync::atomic::{AtomicU64, Ordering};

/// A platform block device.
///
/// This is the one seam platform glue has to fill in: SD/MMC slots, USB mass
/// storage, memory-card ports and so on each provide an implementation.
/// Operations return plain booleans, as the platform disc-interface ABIs do;
/// the adapter translates upward. Implementations handle their own internal
/// synchronization.
pub trait BlockIo: Send + Sync {
    fn io_type(&self) -> IoType;

    fn features(&self) -> Features;

    /// Bytes per sector. Must be a power of two.
    fn sector_size(&self) -> usize {
        512
    }

    /// Brings the device up. Called once, before any transfer.
    fn startup(&self) -> bool;

    /// Whether media is actually present in the slot/port.
    fn is_inserted(&self) -> bool;

    fn read_sectors(&self, buffer: &mut [u8], first_sector: Sector) -> bool;

    fn write_sectors(&self, buffer: &[u8], first_sector: Sector) -> bool;

    /// Releases the device. No transfers happen afterwards.
    fn shutdown(&self);
}

/// A [`Disc`] directly backed by a [`BlockIo`].
///
/// The sector count starts out as [`SECTOR_NONE`]; the partition prober
/// resolves it from the MBR. Reads and writes forward straight to the
/// device, and dropping the adapter shuts the device down.
pub struct IfaceDisc {
    iface: Box<dyn BlockIo>,
    io_type: IoType,
    features: Features,
    sector_size: usize,
    num_sectors: AtomicU64,
}

impl IfaceDisc {
    /// Wraps a platform device, checking that it starts up and has media
    /// present. Returns `None` (with the device shut back down) otherwise.
    pub fn create(iface: Box<dyn BlockIo>) -> Option<DiscHandle> {
        if !iface.startup() {
            return None;
        }

        if !iface.is_inserted() {
            iface.shutdown();
            return None;
        }

        Some(Arc::new(Self {
            io_type: iface.io_type(),
            features: iface.features(),
            sector_size: iface.sector_size(),
            num_sectors: AtomicU64::new(SECTOR_NONE),
            iface,
        }))
    }
}

impl Disc for IfaceDisc {
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
        if self.iface.read_sectors(buffer, first_sector) {
            Ok(())
        } else {
            Err(DiscError::Io)
        }
    }

    fn write_sectors(&self, buffer: &[u8], first_sector: Sector) -> Result<(), DiscError> {
        if self.iface.write_sectors(buffer, first_sector) {
            Ok(())
        } else {
            Err(DiscError::Io)
        }
    }

    fn flush(&self) -> Result<(), DiscError> {
        Ok(())
    }
}

impl Drop for IfaceDisc {
    fn drop(&mut self) {
        self.iface.shutdown();
    }
}
