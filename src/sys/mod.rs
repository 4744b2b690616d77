//! Linux implementations of the collaborators in `crate::external`.

mod backend;
mod enumerate;
#[cfg(feature = "parted")]
mod parted;
mod table;

pub use self::backend::{default_table, SystemBackend, SystemFormats};
pub use self::enumerate::{parse_udev_properties, SysfsEnumerator, UdevProperties};
#[cfg(feature = "parted")]
pub use self::parted::PartedTable;
pub use self::table::SysfsTable;

use crate::config::TreeConfig;
use crate::tree::DeviceTree;
use std::{fs, path::Path, str::FromStr};

const UDEV_DATA: &str = "/run/udev/data";

impl DeviceTree {
    /// A tree backed by the devices of the running system.
    pub fn system(config: TreeConfig) -> Self {
        DeviceTree::new(
            config,
            Box::new(SysfsEnumerator::new()),
            Box::new(SystemFormats::default()),
            Box::new(SystemBackend::default()),
        )
    }
}

/// Reads and parses a single-value sysfs attribute.
fn read_value<T: FromStr>(path: &Path) -> Option<T> {
    fs::read_to_string(path).ok().and_then(|value| value.trim().parse::<T>().ok())
}

/// Parses a `major:minor` device number.
fn parse_dev(dev: &str) -> Option<(u32, u32)> {
    let mut fields = dev.trim().splitn(2, ':');
    match (fields.next(), fields.next()) {
        (Some(major), Some(minor)) => Some((major.parse().ok()?, minor.parse().ok()?)),
        _ => None,
    }
}
