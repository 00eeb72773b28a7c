//! Shared pieces for the integration tests: a recording filesystem driver
//! and a byte-image block device.

#![allow(dead_code)]

use volmgr::devtab::{DeviceData, Errno, FileOps, VolumeStats};
use volmgr::mutex::Mutex;
use volmgr::volume::DeviceDataBox;
use volmgr::{BlockIo, DiscHandle, Features, FsDriver, IoType, Sector};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

fn test_statvfs(_dev: &DeviceData, _path: &str) -> Result<VolumeStats, Errno> {
    Ok(VolumeStats {
        block_size: 512,
        total_blocks: 0,
        free_blocks: 0,
        read_only: false,
    })
}

pub static TEST_OPS: FileOps = FileOps {
    statvfs: Some(test_statvfs),
    ..FileOps::NONE
};

/// What a [`TestDriver`] stores per volume.
pub struct TestVolumeData {
    pub disc: DiscHandle,
    pub start_sector: Sector,
}

/// A filesystem driver that records its mounts and can be told to refuse.
pub struct TestDriver {
    fstype: &'static str,
    accept: AtomicBool,
    mounts: Mutex<Vec<Sector>>,
    umounts: AtomicUsize,
}

impl TestDriver {
    pub const fn new(fstype: &'static str) -> Self {
        Self {
            fstype,
            accept: AtomicBool::new(true),
            mounts: Mutex::new(Vec::new()),
            umounts: AtomicUsize::new(0),
        }
    }

    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn mounts(&self) -> Vec<Sector> {
        self.mounts.lock().clone()
    }

    pub fn umounts(&self) -> usize {
        self.umounts.load(Ordering::SeqCst)
    }
}

impl FsDriver for TestDriver {
    fn fstype(&self) -> &'static str {
        self.fstype
    }

    fn file_ops(&self) -> &'static FileOps {
        &TEST_OPS
    }

    fn mount(&self, disc: &DiscHandle, start_sector: Sector) -> Option<DeviceDataBox> {
        if !self.accept.load(Ordering::SeqCst) {
            return None;
        }

        self.mounts.lock().push(start_sector);
        Some(Box::new(TestVolumeData {
            disc: disc.clone(),
            start_sector,
        }))
    }

    fn umount(&self, device_data: DeviceDataBox) {
        self.umounts.fetch_add(1, Ordering::SeqCst);
        drop(device_data);
    }
}

/// A block device over an in-memory image, reporting an unknown size the
/// way real card/USB interfaces do.
pub struct ImageIo {
    image: Mutex<Vec<u8>>,
}

impl ImageIo {
    pub fn new(image: Vec<u8>) -> Box<Self> {
        Box::new(Self {
            image: Mutex::new(image),
        })
    }
}

impl BlockIo for ImageIo {
    fn io_type(&self) -> IoType {
        IoType::fourcc(b"IMG ")
    }

    fn features(&self) -> Features {
        Features::CAN_READ | Features::CAN_WRITE
    }

    fn startup(&self) -> bool {
        true
    }

    fn is_inserted(&self) -> bool {
        true
    }

    fn read_sectors(&self, buffer: &mut [u8], first_sector: Sector) -> bool {
        let image = self.image.lock();
        let off = first_sector as usize * 512;
        if off + buffer.len() > image.len() {
            return false;
        }
        buffer.copy_from_slice(&image[off..off + buffer.len()]);
        true
    }

    fn write_sectors(&self, buffer: &[u8], first_sector: Sector) -> bool {
        let mut image = self.image.lock();
        let off = first_sector as usize * 512;
        if off + buffer.len() > image.len() {
            return false;
        }
        image[off..off + buffer.len()].copy_from_slice(buffer);
        true
    }

    fn shutdown(&self) {}
}

pub const SS: usize = 512;

pub fn boot_signature(sector: &mut [u8]) {
    sector[0x1fe] = 0x55;
    sector[0x1ff] = 0xaa;
}

pub fn fat32_vbr() -> [u8; SS] {
    let mut s = [0u8; SS];
    s[0] = 0xeb;
    s[1] = 0x58;
    s[2] = 0x90;
    s[3..11].copy_from_slice(b"MSDOS5.0");
    s[0x52..0x5a].copy_from_slice(b"FAT32   ");
    boot_signature(&mut s);
    s
}

pub fn ntfs_vbr() -> [u8; SS] {
    let mut s = [0u8; SS];
    s[0] = 0xeb;
    s[1] = 0x52;
    s[2] = 0x90;
    s[3..11].copy_from_slice(b"NTFS    ");
    boot_signature(&mut s);
    s
}

pub fn exfat_vbr() -> [u8; SS] {
    let mut s = [0u8; SS];
    s[0] = 0xeb;
    s[1] = 0x76;
    s[2] = 0x90;
    s[3..11].copy_from_slice(b"EXFAT   ");
    boot_signature(&mut s);
    s
}

pub fn mbr_entry(sector: &mut [u8], slot: usize, status: u8, ptype: u8, start: u32, num: u32) {
    let off = 0x1be + slot * 16;
    sector[off] = status;
    sector[off + 4] = ptype;
    sector[off + 8..off + 12].copy_from_slice(&start.to_le_bytes());
    sector[off + 12..off + 16].copy_from_slice(&num.to_le_bytes());
}
