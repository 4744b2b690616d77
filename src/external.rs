//! Capabilities that the device tree consumes from its environment.
//!
//! Device enumeration, partition table editing, format construction, and the
//! execution of operations against real hardware are all supplied through the
//! traits in this module. `crate::sys` implements them for Linux.

use crate::device::Device;
use crate::errors::*;
use crate::format::{DiskLabel, Format, FormatArgs};
use crate::operations::Operation;
use crate::tree::DeviceGraph;
use disk_types::{FileSystem, PartitionTable, PartitionType};
use std::{io, path::Path};

bitflags! {
    /// Classification flags attached to a raw device record.
    #[derive(Default)]
    pub struct RecordFlags: u8 {
        const DISK = 1;
        const PARTITION = 2;
        const MD = 4;
        const DM = 8;
        const BIOSRAID = 16;
        const MULTIPATH_MEMBER = 32;
    }
}

/// A raw block device record, as reported by the device manager.
#[derive(Debug, Clone, PartialEq, SmartDefault)]
pub struct DeviceRecord {
    pub name:         String,
    /// Absolute sysfs directory of the device.
    pub sysfs_path:   String,
    pub uuid:         Option<String>,
    pub label:        Option<String>,
    /// The detected content type, such as `ext4` or `swap`.
    pub fs_type:      Option<String>,
    pub major:        u32,
    pub minor:        u32,
    pub bus:          Option<String>,
    pub serial:       Option<String>,
    pub vendor:       Option<String>,
    pub model:        Option<String>,
    /// Size in bytes.
    pub size:         u64,
    pub by_path:      Option<String>,
    pub table_type:   Option<String>,
    pub md_level:     Option<String>,
    pub md_container: Option<String>,
    pub md_name:      Option<String>,
    pub bootable:     bool,
    #[default = true]
    pub media_present: bool,
    pub flags:        RecordFlags,
}

impl DeviceRecord {
    pub fn is_disk(&self) -> bool { self.flags.contains(RecordFlags::DISK) }

    pub fn is_partition(&self) -> bool { self.flags.contains(RecordFlags::PARTITION) }

    /// The detected content type, if one was reported.
    pub fn format_type(&self) -> Option<&str> {
        self.fs_type.as_ref().map(String::as_str).filter(|kind| !kind.is_empty())
    }
}

/// Yields the block devices present on the system.
pub trait DeviceEnumerator {
    /// Every block device, disks before their partitions.
    fn block_devices(&self) -> io::Result<Vec<DeviceRecord>>;

    /// The record for the device at `sysfs_path`, if there is one.
    fn block_device(&self, sysfs_path: &str) -> io::Result<Option<DeviceRecord>>;

    /// True if the device at `sysfs_path` has a child entry called `name`.
    fn has_child(&self, sysfs_path: &str, name: &str) -> bool {
        Path::new(sysfs_path).join(name).exists()
    }
}

/// A partition as it is recorded in a partition table.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct TableEntry {
    pub number:    u32,
    /// Kernel device name of the partition, such as `sda1`.
    pub name:      String,
    pub start:     u64,
    /// Length in sectors.
    pub length:    u64,
    pub part_type: PartitionType,
    pub bootable:  bool,
}

/// Reads and edits the partition table of one disk.
pub trait DiskLabelTable {
    fn table_type(&self) -> PartitionTable;

    /// False for a table that was freshly initialized and never written.
    fn exists(&self) -> bool;

    fn partitions(&self) -> Vec<TableEntry>;

    fn partition_at(&self, start: u64) -> Option<TableEntry> {
        self.partitions().into_iter().find(|entry| entry.start == start)
    }

    /// Adds an entry, returning it as the table recorded it.
    fn add_partition(&mut self, entry: &TableEntry) -> Result<TableEntry, DiskLabelCommitError>;

    fn remove_partition(&mut self, start: u64) -> Result<(), DiskLabelCommitError>;

    /// Writes the table to the device. Numbering may change as a side effect.
    fn commit(&mut self) -> Result<(), DiskLabelCommitError>;

    /// Discards cached state so that the next read reflects the device.
    fn reset(&mut self);
}

/// Constructs format descriptors.
pub trait FormatFactory {
    fn format(&self, args: FormatArgs) -> Result<Format, FormatConstructionError>;

    /// Opens the disklabel on `device`, or initializes a fresh one when
    /// `exists` is false.
    fn disklabel(&self, device: &str, exists: bool) -> Result<DiskLabel, InvalidDiskLabelError>;

    /// Inclusive size bounds, in bytes, of a file system.
    fn bounds(&self, fs: FileSystem) -> (u64, u64) {
        fs.size_bounds().unwrap_or((0, u64::max_value()))
    }
}

/// Applies changes to real devices.
pub trait StorageBackend {
    fn setup(&self, device: &Device) -> Result<(), DeviceOperationError>;

    fn teardown(&self, device: &Device) -> Result<(), DeviceOperationError>;

    /// Invoked before any operation is executed, with every mount target
    /// currently assigned in the tree.
    fn pre_commit_fixup(&self, _device: &Device, _mountpoints: &[String]) {}

    fn execute(&self, operation: &Operation, graph: &DeviceGraph) -> Result<(), ExecuteError>;

    /// Waits for the kernel to finish processing device events.
    fn settle(&self) {}
}

/// Details shown when asking whether a disk should be reinitialized.
#[derive(Debug, Clone, PartialEq, new)]
pub struct ReinitializePrompt {
    pub path:        String,
    pub description: String,
    /// Size in bytes.
    pub size:        u64,
    pub details:     String,
}
