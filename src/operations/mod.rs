//! Pending changes to devices and their formats.

mod register;
mod order;
mod prune;

pub(crate) use self::order::sort_operations;
pub use self::prune::prune_operations;

use crate::device::{Device, DeviceId, SECTOR_SIZE};
use crate::errors::ExecuteError;
use crate::external::TableEntry;
use crate::format::{Format, FormatKind};
use crate::tree::DeviceGraph;
use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicUsize, Ordering},
};

static NEXT_OPERATION: AtomicUsize = AtomicUsize::new(0);

/// Stable identity of an operation, independent of its position in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(usize);

impl OperationId {
    fn next() -> Self { OperationId(NEXT_OPERATION.fetch_add(1, Ordering::SeqCst)) }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Destroy,
    Resize,
    Migrate,
}

impl From<OperationKind> for &'static str {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Create => "create",
            OperationKind::Destroy => "destroy",
            OperationKind::Resize => "resize",
            OperationKind::Migrate => "migrate",
        }
    }
}

impl FromStr for OperationKind {
    type Err = &'static str;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string {
            "create" => Ok(OperationKind::Create),
            "destroy" => Ok(OperationKind::Destroy),
            "resize" => Ok(OperationKind::Resize),
            "migrate" => Ok(OperationKind::Migrate),
            _ => Err("invalid operation type"),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind: &'static str = (*self).into();
        f.write_str(kind)
    }
}

/// Whether an operation acts on a device or on the format it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationTarget {
    Device,
    Format,
}

impl FromStr for OperationTarget {
    type Err = &'static str;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string {
            "device" => Ok(OperationTarget::Device),
            "format" => Ok(OperationTarget::Format),
            _ => Err("invalid operation object"),
        }
    }
}

impl fmt::Display for OperationTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            OperationTarget::Device => "device",
            OperationTarget::Format => "format",
        })
    }
}

/// The value an operation replaced when it was registered.
#[derive(Debug, Clone)]
pub(crate) enum Previous {
    Nothing,
    Format(Format),
    Size(u64),
}

/// A pending change to a device or its format.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id:     OperationId,
    pub kind:   OperationKind,
    pub target: OperationTarget,
    /// Snapshot of the target device.
    pub device: Device,
    /// The new format of a create or migrate, or the format being destroyed.
    pub format: Option<Format>,
    /// Requested size, in bytes, of a resize.
    pub size:   Option<u64>,
    /// True if a resize makes its target larger.
    pub grow:   bool,
    pub(crate) previous: Previous,
}

impl Operation {
    fn new(kind: OperationKind, target: OperationTarget, device: Device) -> Self {
        Operation {
            id: OperationId::next(),
            kind,
            target,
            device,
            format: None,
            size: None,
            grow: false,
            previous: Previous::Nothing,
        }
    }

    pub fn create_device(device: Device) -> Self {
        Operation::new(OperationKind::Create, OperationTarget::Device, device)
    }

    pub fn destroy_device(device: Device) -> Self {
        Operation::new(OperationKind::Destroy, OperationTarget::Device, device)
    }

    pub fn resize_device(device: Device, size: u64) -> Self {
        let grow = size > device.size;
        let mut operation = Operation::new(OperationKind::Resize, OperationTarget::Device, device);
        operation.size = Some(size);
        operation.grow = grow;
        operation
    }

    pub fn create_format(device: Device, format: Format) -> Self {
        let mut operation = Operation::new(OperationKind::Create, OperationTarget::Format, device);
        operation.format = Some(format);
        operation
    }

    pub fn destroy_format(device: Device) -> Self {
        let format = device.format.clone();
        let mut operation = Operation::new(OperationKind::Destroy, OperationTarget::Format, device);
        operation.format = Some(format);
        operation
    }

    pub fn resize_format(device: Device, size: u64) -> Self {
        let current = if device.format.size != 0 { device.format.size } else { device.size };
        let mut operation = Operation::new(OperationKind::Resize, OperationTarget::Format, device);
        operation.size = Some(size);
        operation.grow = size > current;
        operation
    }

    /// Converts the existing format on `device` into `format` in place.
    pub fn migrate_format(device: Device, format: Format) -> Self {
        let mut operation = Operation::new(OperationKind::Migrate, OperationTarget::Format, device);
        operation.format = Some(format);
        operation
    }

    pub fn device_id(&self) -> DeviceId { self.device.id }

    pub fn is_create(&self) -> bool { self.kind == OperationKind::Create }

    pub fn is_destroy(&self) -> bool { self.kind == OperationKind::Destroy }

    pub fn is_resize(&self) -> bool { self.kind == OperationKind::Resize }

    pub fn is_migrate(&self) -> bool { self.kind == OperationKind::Migrate }

    pub fn is_device(&self) -> bool { self.target == OperationTarget::Device }

    pub fn is_format(&self) -> bool { self.target == OperationTarget::Format }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {} {} {}", self.id, self.kind, self.target, self.device.name)?;
        if let Some(size) = self.size {
            write!(f, " to {} MiB", size / (1024 * 1024))?;
        }

        match self.format {
            Some(ref format) if self.is_format() && !self.is_resize() => write!(f, " ({})", format),
            _ => Ok(()),
        }
    }
}

/// Selects operations from the log. Every field that is set must match.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    device:    Option<(DeviceId, String)>,
    kind:      Option<OperationKind>,
    target:    Option<OperationTarget>,
    path:      Option<String>,
    device_id: Option<DeviceId>,
}

impl OperationFilter {
    /// Matches operations on this device as it is currently named.
    pub fn device(mut self, device: &Device) -> Self {
        self.device = Some((device.id, device.path.clone()));
        self
    }

    pub fn kind(mut self, kind: OperationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn target(mut self, target: OperationTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn path<S: Into<String>>(mut self, path: S) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn device_id(mut self, id: DeviceId) -> Self {
        self.device_id = Some(id);
        self
    }

    pub fn matches(&self, operation: &Operation) -> bool {
        self.device
            .as_ref()
            .map_or(true, |&(id, ref path)| operation.device.id == id && &operation.device.path == path)
            && self.kind.map_or(true, |kind| operation.kind == kind)
            && self.target.map_or(true, |target| operation.target == target)
            && self.path.as_ref().map_or(true, |path| &operation.device.path == path)
            && self.device_id.map_or(true, |id| operation.device.id == id)
    }
}

/// Applies the partition table side of an operation: creating, removing, or
/// resizing a partition entry, or writing a new disklabel.
///
/// Entries that are already in the requested state are left alone, so a
/// failed commit may be retried. Returns `true` if the operation touched a
/// partition table.
pub fn apply_table_changes(operation: &Operation, graph: &DeviceGraph) -> Result<bool, ExecuteError> {
    let device = &operation.device;
    match (operation.kind, operation.target) {
        (OperationKind::Create, OperationTarget::Device)
        | (OperationKind::Destroy, OperationTarget::Device)
        | (OperationKind::Resize, OperationTarget::Device) => {
            let (info, disk) = match (device.partition_info(), device.disk()) {
                (Some(info), Some(disk)) => (*info, disk),
                _ => return Ok(false),
            };

            let table = match graph.table_of(disk) {
                Some(table) => table,
                None if operation.is_destroy() => return Ok(false),
                None => {
                    return Err(ExecuteError::NoDiskLabel {
                        disk:      graph.get(disk).map_or_else(|| disk.to_string(), |d| d.name.clone()),
                        partition: device.name.clone(),
                    });
                }
            };

            match operation.kind {
                OperationKind::Create => {
                    let length = device.target_size.max(device.size) / SECTOR_SIZE;
                    if length == 0 {
                        return Err(ExecuteError::EmptyPartition { partition: device.name.clone() });
                    }

                    let entry = TableEntry::new(
                        info.number,
                        device.name.clone(),
                        info.start,
                        length,
                        info.part_type,
                        info.bootable,
                    );
                    if table.partition_at(info.start).is_none() {
                        info!("adding {} at sector {} ({} sectors)", device.name, info.start, length);
                        table.add_partition(&entry)?;
                    }
                }
                OperationKind::Resize => {
                    let size = operation.size.unwrap_or(device.target_size);
                    if let Some(mut entry) = table.partition_at(info.start) {
                        table.remove_partition(info.start)?;
                        entry.length = size / SECTOR_SIZE;
                        info!("resizing {} to {} sectors", device.name, entry.length);
                        table.add_partition(&entry)?;
                    }
                }
                _ => {
                    if table.partition_at(info.start).is_some() {
                        info!("removing {} from the partition table", device.name);
                        table.remove_partition(info.start)?;
                    }
                }
            }

            table.commit()?;
            Ok(true)
        }
        (OperationKind::Create, OperationTarget::Format) => match operation.format {
            Some(ref format) if format.is_disklabel() => {
                if let Some(table) = format.table() {
                    info!("writing {:?} disklabel to {}", format.kind, device.path);
                    table.commit()?;
                }
                Ok(true)
            }
            _ => Ok(false),
        },
        _ => Ok(false),
    }
}

/// The file system kind written by a format operation, if any.
pub(crate) fn format_kind(operation: &Operation) -> FormatKind {
    operation.format.as_ref().map_or(FormatKind::None, |format| format.kind)
}
