//! Driver-registry capacity and duplicate handling.
//!
//! Lives in its own binary: filling all eight registry slots would step on
//! any other test sharing the process.

use volmgr::devtab::FileOps;
use volmgr::volume::DeviceDataBox;
use volmgr::{register_fs_driver, DiscHandle, FsDriver, Sector, MAX_DRIVERS};

static OPS: FileOps = FileOps::NONE;

// Not zero-sized: registration dedups by address, and every element of a
// ZST array would share one.
struct NopDriver(#[allow(dead_code)] u8);

impl FsDriver for NopDriver {
    fn fstype(&self) -> &'static str {
        "nop"
    }
    fn file_ops(&self) -> &'static FileOps {
        &OPS
    }
    fn mount(&self, _disc: &DiscHandle, _start_sector: Sector) -> Option<DeviceDataBox> {
        None
    }
    fn umount(&self, _device_data: DeviceDataBox) {}
}

static DRIVERS: [NopDriver; MAX_DRIVERS + 1] = [
    NopDriver(0),
    NopDriver(1),
    NopDriver(2),
    NopDriver(3),
    NopDriver(4),
    NopDriver(5),
    NopDriver(6),
    NopDriver(7),
    NopDriver(8),
];

#[test]
fn capacity_is_fixed_and_duplicates_are_first_wins() {
    for fsdrv in DRIVERS.iter().take(MAX_DRIVERS) {
        assert!(register_fs_driver(fsdrv));
    }

    // Table full: the ninth driver is refused...
    assert!(!register_fs_driver(&DRIVERS[MAX_DRIVERS]));

    // ...but re-registering anything already present still succeeds.
    assert!(register_fs_driver(&DRIVERS[0]));
    assert!(register_fs_driver(&DRIVERS[MAX_DRIVERS - 1]));
}
