//! Filesystem drivers and the mount/unmount lifecycle.
//!
//! Drivers describe themselves once ([`FsDriver`]) and get registered into a
//! small fixed table. Mounting looks the driver up by filesystem type, asks
//! it to bind to a disc region, and installs the resulting [`Volume`] into
//! the host device table; unmounting reverses all of that, but only for
//! entries this module installed — foreign device-table entries are never
//! touched.

use crate::devtab::{self, DeviceEntry, FileOps};
use crate::disc::{DiscHandle, Sector};
use crate::mutex::Mutex;
use crate::prober::PartInfo;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use core::any::Any;
use core::fmt;

/// How many filesystem drivers can be registered.
pub const MAX_DRIVERS: usize = 8;

/// Volume names are truncated to this many bytes.
const VOLUME_NAME_MAX: usize = 31;

/// Per-volume driver state, opaque to everyone but the driver.
pub type DeviceDataBox = Box<dyn Any + Send + Sync>;

/// An immutable filesystem-driver descriptor.
///
/// Drivers keep no cross-volume state (beyond whatever system-wide lock they
/// manage themselves). `mount` must clean up after itself before reporting
/// failure, and is where a driver takes its own share of the disc
/// (`Arc::clone`) — dropping that share in `umount` is what lets the disc
/// tear down once the last volume is gone.
pub trait FsDriver: Send + Sync {
    /// The filesystem type this driver handles (`"vfat"`, `"exfat"`, ...).
    fn fstype(&self) -> &'static str;

    /// The file-operation template installed with every volume.
    fn file_ops(&self) -> &'static FileOps;

    /// Binds to the filesystem starting at `start_sector`, returning the
    /// per-volume state, or `None` if there is no mountable filesystem
    /// there.
    fn mount(&self, disc: &DiscHandle, start_sector: Sector) -> Option<DeviceDataBox>;

    /// Releases everything `mount` acquired.
    fn umount(&self, device_data: DeviceDataBox);
}

static DRIVERS: Mutex<[Option<&'static dyn FsDriver>; MAX_DRIVERS]> =
    Mutex::new([None; MAX_DRIVERS]);

/// Registers a filesystem driver.
///
/// Idempotent for an already-registered driver. Returns `false` only when
/// the table is full. Duplicate fstype names are tolerated; lookup is
/// first-match.
pub fn register_fs_driver(fsdrv: &'static dyn FsDriver) -> bool {
    let mut table = DRIVERS.lock();

    for slot in table.iter_mut() {
        match slot {
            Some(existing) => {
                if core::ptr::eq(
                    *existing as *const dyn FsDriver as *const (),
                    fsdrv as *const dyn FsDriver as *const (),
                ) {
                    return true;
                }
            }
            None => {
                log::debug!("volume: registered fs driver {}", fsdrv.fstype());
                *slot = Some(fsdrv);
                return true;
            }
        }
    }

    false
}

fn find_fs_driver(fstype: &str) -> Option<&'static dyn FsDriver> {
    DRIVERS
        .lock()
        .iter()
        .flatten()
        .find(|fsdrv| fsdrv.fstype() == fstype)
        .copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MountError {
    /// No registered driver handles the requested filesystem type.
    NoDriver,
    /// The driver refused to mount the region.
    DriverFailed,
    /// The host device table has no free slot.
    DeviceTableFull,
}

impl fmt::Display for MountError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountError::NoDriver => write!(fmt, "no driver for filesystem type"),
            MountError::DriverFailed => write!(fmt, "driver failed to mount"),
            MountError::DeviceTableFull => write!(fmt, "device table full"),
        }
    }
}

using_std! {
    impl std::error::Error for MountError { }
}

/// A mounted filesystem instance.
///
/// The volume owns its name and the driver's per-volume state; the device
/// table holds it as type-erased device data. That concrete type doubles as
/// the ownership check on unmount: an entry whose data is not a `Volume` of
/// ours was installed by somebody else.
pub struct Volume {
    fsdrv: &'static dyn FsDriver,
    name: String,
    device_data: Mutex<Option<DeviceDataBox>>,
}

impl Volume {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &'static dyn FsDriver {
        self.fsdrv
    }

    /// Runs `f` over the driver's per-volume state. `None` once the volume
    /// has been unmounted.
    pub fn with_device_data<R>(&self, f: impl FnOnce(&mut (dyn Any + Send + Sync)) -> R) -> Option<R> {
        let mut guard = self.device_data.lock();
        guard.as_mut().map(|data| f(data.as_mut()))
    }
}

/// Mounts the `fstype` filesystem found on `disc` at `start_sector` and
/// installs it as `name` (truncated to 31 bytes).
///
/// If there is no current default device (the null-sink state), the new
/// volume becomes the default and the working directory moves to its root.
pub fn mount_volume(
    name: &str,
    disc: &DiscHandle,
    start_sector: Sector,
    fstype: &str,
) -> Result<(), MountError> {
    let fsdrv = find_fs_driver(fstype).ok_or(MountError::NoDriver)?;

    let device_data = fsdrv.mount(disc, start_sector).ok_or(MountError::DriverFailed)?;

    let cut = name.len().min(VOLUME_NAME_MAX);
    let name = name.get(..cut).unwrap_or(name);

    let vol = Arc::new(Volume {
        fsdrv,
        name: String::from(name),
        device_data: Mutex::new(Some(device_data)),
    });

    let entry = DeviceEntry {
        name: String::from(name),
        ops: fsdrv.file_ops(),
        data: vol.clone(),
    };

    let devid = match devtab::add_device(entry) {
        Ok(devid) => devid,
        Err(_) => {
            // Undo the driver's half of the mount before reporting failure.
            if let Some(data) = vol.device_data.lock().take() {
                fsdrv.umount(data);
            }
            return Err(MountError::DeviceTableFull);
        }
    };

    // No default yet (or only the null sink): this volume takes over.
    let is_null_sink = match devtab::default_device() {
        None => true,
        Some(default) => default.name == "stdnull",
    };

    if is_null_sink {
        log::debug!("volume: default dev {} ({})", name, devid);
        devtab::set_default_device(devid);

        let mut cwd = String::from(name);
        cwd.push_str(":/");
        devtab::chdir(&cwd);
    } else {
        log::debug!("volume: added dev {} ({})", name, devid);
    }

    Ok(())
}

/// Unmounts the volume installed as `name`.
///
/// Confirms the entry is one of ours first: its device data must be a
/// [`Volume`] whose own name matches the entry. Entries installed by other
/// subsystems are left exactly as they are.
pub fn unmount_volume(name: &str) {
    let entry = match devtab::get_device(name) {
        Some(entry) => entry,
        None => return,
    };

    let vol = match entry.data.downcast::<Volume>() {
        Ok(vol) => vol,
        Err(_) => return,
    };

    if vol.name != entry.name {
        return;
    }

    devtab::remove_device(name);

    let data = vol.device_data.lock().take();
    if let Some(data) = data {
        vol.fsdrv.umount(data);
    }
}

/// Sugar: mounts a probed partition under `name`. An unidentified partition
/// (`fstype == None`) has no driver by definition.
pub fn mount_partition(name: &str, disc: &DiscHandle, part: &PartInfo) -> Result<(), MountError> {
    let fstype = part.fstype.ok_or(MountError::NoDriver)?;
    mount_volume(name, disc, part.start_sector, fstype)
}
