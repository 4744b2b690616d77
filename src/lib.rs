//! A model of the block devices on a system, and a scheduler for the
//! structural changes pending against them.
//!
//! Devices are discovered into a [`DeviceTree`], changes are registered as
//! [`Operation`]s, and `commit` reduces the registered operations to a
//! minimal, safely ordered sequence before executing it.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate derive_new;
extern crate dirs;
extern crate disk_types;
extern crate distinst_external_commands as external_;
extern crate failure;
#[macro_use]
extern crate failure_derive;
extern crate fern;
extern crate itertools;
#[cfg(feature = "parted")]
extern crate libparted;
#[macro_use]
extern crate log;
#[macro_use]
extern crate smart_default;
extern crate sysfs_class;

mod config;
mod device;
mod errors;
pub mod external;
mod format;
mod logging;
mod operations;
pub mod sys;
mod tree;

#[cfg(test)]
mod fixtures;

pub use self::config::TreeConfig;
pub use self::device::{partition_name, Device, DeviceCategory, DeviceId, DeviceKind, PartitionInfo, SECTOR_SIZE};
pub use self::errors::*;
pub use self::format::{DiskLabel, Format, FormatArgs, FormatId, FormatKind};
pub use self::logging::{log, log_with_level};
pub use log::LevelFilter;
pub use self::operations::{
    apply_table_changes, prune_operations, Operation, OperationFilter, OperationId, OperationKind,
    OperationTarget,
};
pub use self::tree::{depends_on, ConfirmCallback, DeviceGraph, DeviceSource, DeviceTree};
pub use disk_types::{FileSystem, PartitionTable, PartitionType};
