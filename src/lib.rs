//! A portable volume-management layer for block-oriented storage.
//!
//! The crate mounts filesystems on top of heterogeneous block devices and
//! exposes them through a small device table. The spine is three stacked
//! pieces:
//!
//! * a polymorphic disc abstraction ([`disc::Disc`]) with shared ownership,
//! * a write-back LRU sector cache ([`cache::CacheDisc`]) that wraps any disc
//!   and is itself a disc,
//! * a partition prober + volume manager ([`prober`], [`volume`]) that walks
//!   the MBR/VBR, picks a registered filesystem driver and binds it to a
//!   disc region.
//!
//! Platform glue supplies block devices by implementing [`iface::BlockIo`];
//! everything above that line is platform independent.

// Mark the crate as no_std if the feature is enabled (and only)
#![cfg_attr(all(feature = "no_std", not(test)), no_std)]

extern crate alloc;

#[cfg_attr(target_os = "none", panic_handler)]
#[cfg(target_os = "none")]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

macro_rules! using_std { ($($i:item)*) => ($(#[cfg(not(feature = "no_std"))]$i)*) }

pub mod mutex;

pub mod util;

pub mod config;
pub mod disc;
pub mod iface;
pub mod ramdisc;

pub mod cache;

pub mod devtab;
pub mod prober;
pub mod volume;

pub use config::{Config, BUFFER_ALIGN, DEFAULT_CACHE_PAGES, DEFAULT_SECTORS_PER_PAGE};
pub use disc::{Disc, DiscError, DiscHandle, Features, IoType, Sector, SECTOR_NONE};
pub use iface::{BlockIo, IfaceDisc};

pub use cache::CacheDisc;
pub use ramdisc::RamDisc;

pub use prober::{
    probe_mount_disc, probe_mount_disc_iface, read_partition_table, PartInfo, ProbeError,
    ProbeFlags, MAX_PARTITIONS,
};
pub use volume::{
    mount_partition, mount_volume, register_fs_driver, unmount_volume, FsDriver, MountError,
    Volume, MAX_DRIVERS,
};

pub use config::{init_with_interfaces, set_app_working_dir};
