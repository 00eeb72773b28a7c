//! The host device table.
//!
//! Mounted volumes are installed here and the host's standard file I/O
//! routes through the installed [`FileOps`]. The table is a small fixed set
//! of named entries plus a notion of "current default device" and a current
//! working directory; an unset default is the null sink, which is why the
//! first mounted volume takes the default over.

use crate::mutex::Mutex;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use core::any::Any;
use core::fmt;

/// How many devices can be installed at once.
pub const MAX_DEVICES: usize = 16;

/// Per-device payload. For entries installed by the volume manager this is
/// an [`crate::volume::Volume`]; other subsystems install their own types.
pub type DeviceData = Arc<dyn Any + Send + Sync>;

/// Opaque per-open-file state, produced by `open` and threaded back through
/// the other file operations.
pub type FileState = Box<dyn Any + Send>;

/// POSIX-style error codes, used at the filesystem boundary only (the disc
/// and cache layers below speak [`crate::disc::DiscError`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Errno {
    NoEnt,
    Io,
    BadF,
    NoMem,
    Access,
    Exist,
    NotDir,
    IsDir,
    Inval,
    NoSpc,
    RoFs,
    NoSys,
    NotEmpty,
}

impl Errno {
    /// The conventional errno value.
    pub fn code(self) -> i32 {
        match self {
            Errno::NoEnt => 2,
            Errno::Io => 5,
            Errno::BadF => 9,
            Errno::NoMem => 12,
            Errno::Access => 13,
            Errno::Exist => 17,
            Errno::NotDir => 20,
            Errno::IsDir => 21,
            Errno::Inval => 22,
            Errno::NoSpc => 28,
            Errno::RoFs => 30,
            Errno::NoSys => 38,
            Errno::NotEmpty => 39,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{:?} ({})", self, self.code())
    }
}

using_std! {
    impl std::error::Error for Errno { }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// What `stat`-family operations report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
    pub mtime: u64,
}

/// What `statvfs` reports. `read_only` is how a driver surfaces a
/// write-protected medium to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStats {
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub read_only: bool,
}

/// The function-pointer template a filesystem driver installs; every slot is
/// optional and an absent one reports `NoSys` to the caller.
///
/// Build these as statics with struct update syntax:
///
/// ```ignore
/// static OPS: FileOps = FileOps {
///     open: Some(my_open),
///     read: Some(my_read),
///     ..FileOps::NONE
/// };
/// ```
pub struct FileOps {
    pub open: Option<fn(&DeviceData, path: &str, flags: u32, mode: u32) -> Result<FileState, Errno>>,
    pub close: Option<fn(&DeviceData, FileState) -> Result<(), Errno>>,
    pub read: Option<fn(&DeviceData, &mut FileState, &mut [u8]) -> Result<usize, Errno>>,
    pub write: Option<fn(&DeviceData, &mut FileState, &[u8]) -> Result<usize, Errno>>,
    pub seek: Option<fn(&DeviceData, &mut FileState, i64, Whence) -> Result<u64, Errno>>,
    pub fstat: Option<fn(&DeviceData, &FileState) -> Result<FileStat, Errno>>,
    pub stat: Option<fn(&DeviceData, path: &str) -> Result<FileStat, Errno>>,
    pub unlink: Option<fn(&DeviceData, path: &str) -> Result<(), Errno>>,
    pub rename: Option<fn(&DeviceData, from: &str, to: &str) -> Result<(), Errno>>,
    pub mkdir: Option<fn(&DeviceData, path: &str, mode: u32) -> Result<(), Errno>>,
    pub rmdir: Option<fn(&DeviceData, path: &str) -> Result<(), Errno>>,
    pub chdir: Option<fn(&DeviceData, path: &str) -> Result<(), Errno>>,
    pub fsync: Option<fn(&DeviceData, &mut FileState) -> Result<(), Errno>>,
    pub statvfs: Option<fn(&DeviceData, path: &str) -> Result<VolumeStats, Errno>>,
}

impl FileOps {
    /// The all-absent template.
    pub const NONE: FileOps = FileOps {
        open: None,
        close: None,
        read: None,
        write: None,
        seek: None,
        fstat: None,
        stat: None,
        unlink: None,
        rename: None,
        mkdir: None,
        rmdir: None,
        chdir: None,
        fsync: None,
        statvfs: None,
    };
}

/// One installed device.
#[derive(Clone)]
pub struct DeviceEntry {
    pub name: String,
    pub ops: &'static FileOps,
    pub data: DeviceData,
}

pub type DeviceId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DevTableError {
    /// All device slots are taken.
    Full,
}

impl fmt::Display for DevTableError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevTableError::Full => write!(fmt, "device table full"),
        }
    }
}

using_std! {
    impl std::error::Error for DevTableError { }
}

struct DevTable {
    slots: [Option<DeviceEntry>; MAX_DEVICES],
    default_dev: Option<DeviceId>,
    cwd: String,
}

impl DevTable {
    const fn new() -> Self {
        const NONE: Option<DeviceEntry> = None;
        Self {
            slots: [NONE; MAX_DEVICES],
            default_dev: None,
            cwd: String::new(),
        }
    }

    fn find(&self, name: &str) -> Option<DeviceId> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(entry) if entry.name == name))
    }
}

static TABLE: Mutex<DevTable> = Mutex::new(DevTable::new());

/// The device-name part of `path`: everything before the first `:`, or the
/// whole string if there is none. An empty result names the default device.
pub fn strip_device(path: &str) -> &str {
    match path.find(':') {
        Some(pos) => &path[..pos],
        None => path,
    }
}

/// Installs a device. The name should not contain `:`.
pub fn add_device(entry: DeviceEntry) -> Result<DeviceId, DevTableError> {
    let mut table = TABLE.lock();

    let free = table
        .slots
        .iter()
        .position(|slot| slot.is_none())
        .ok_or(DevTableError::Full)?;

    log::debug!("devtab: add {} ({})", entry.name, free);
    table.slots[free] = Some(entry);
    Ok(free)
}

/// Removes the device named by `name` (a bare name or a `dev:/path` form).
/// Removing the default device leaves the table with no default.
pub fn remove_device(name: &str) -> bool {
    let name = strip_device(name);
    let mut table = TABLE.lock();

    match table.find(name) {
        Some(id) => {
            log::debug!("devtab: remove {} ({})", name, id);
            table.slots[id] = None;
            if table.default_dev == Some(id) {
                table.default_dev = None;
            }
            true
        }
        None => false,
    }
}

/// Looks a device up by name or `dev:/path`. An empty device part resolves
/// to the current default device.
pub fn get_device(name: &str) -> Option<DeviceEntry> {
    let name = strip_device(name);
    let table = TABLE.lock();

    if name.is_empty() {
        let id = table.default_dev?;
        return table.slots[id].clone();
    }

    table.find(name).and_then(|id| table.slots[id].clone())
}

pub fn set_default_device(id: DeviceId) {
    let mut table = TABLE.lock();
    if id < MAX_DEVICES && table.slots[id].is_some() {
        table.default_dev = Some(id);
    }
}

/// The current default device, if any. `None` is the null-sink state.
pub fn default_device() -> Option<DeviceEntry> {
    let table = TABLE.lock();
    let id = table.default_dev?;
    table.slots[id].clone()
}

/// Sets the current working directory (a `dev:/path` string).
pub fn chdir(path: &str) {
    let mut table = TABLE.lock();
    table.cwd.clear();
    table.cwd.push_str(path);
}

pub fn cwd() -> String {
    TABLE.lock().cwd.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    static DUMMY_OPS: FileOps = FileOps::NONE;

    fn entry(name: &str) -> DeviceEntry {
        DeviceEntry {
            name: String::from(name),
            ops: &DUMMY_OPS,
            data: Arc::new(0u32),
        }
    }

    #[test]
    fn strip_device_splits_at_the_colon() {
        assert_eq!(strip_device("sd:/some/path"), "sd");
        assert_eq!(strip_device("sd:"), "sd");
        assert_eq!(strip_device("sd"), "sd");
        assert_eq!(strip_device(""), "");
        assert_eq!(strip_device(":/x"), "");
    }

    #[test]
    fn add_get_remove() {
        add_device(entry("devtab-a")).unwrap();
        add_device(entry("devtab-b")).unwrap();

        assert!(get_device("devtab-a").is_some());
        assert!(get_device("devtab-a:/dir/file").is_some());
        assert!(get_device("devtab-missing").is_none());

        assert!(remove_device("devtab-a:"));
        assert!(!remove_device("devtab-a"));
        assert!(get_device("devtab-a").is_none());

        assert!(remove_device("devtab-b"));
    }

    #[test]
    fn cwd_round_trips() {
        chdir("devtab-cwd:/somewhere/");
        assert_eq!(cwd(), "devtab-cwd:/somewhere/");
    }
}
