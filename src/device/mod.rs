//! Nodes of the device graph.

mod partition;

pub use self::partition::{partition_name, PartitionInfo};
pub(crate) use self::partition::strip_dm_partition;

use crate::external::TableEntry;
use crate::format::Format;
use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Bytes per sector in partition table entries.
pub const SECTOR_SIZE: u64 = 512;

static NEXT_DEVICE: AtomicUsize = AtomicUsize::new(0);

/// Stable identity of a device, independent of its current name and path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(usize);

impl DeviceId {
    pub(crate) fn next() -> Self { DeviceId(NEXT_DEVICE.fetch_add(1, Ordering::SeqCst)) }

    pub fn value(self) -> usize { self.0 }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
}

/// The category of a device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceKind {
    Disk { partitionable: bool },
    Partition(PartitionInfo),
    /// RAID arrays, logical volumes, and other devices built on top of others.
    Composite { kind: String, partitionable: bool },
    /// Stands in for a device that has no node of its own. Placeholders may share paths.
    Placeholder,
}

/// Category selector for `DeviceGraph::by_category`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCategory {
    Disk,
    Partition,
    Composite,
    Placeholder,
}

/// A block device known to the tree, either present on the system or proposed.
#[derive(Debug, Clone)]
pub struct Device {
    pub id:              DeviceId,
    pub name:            String,
    pub path:            String,
    pub sysfs_path:      Option<String>,
    pub major_minor:     Option<(u32, u32)>,
    pub parents:         Vec<DeviceId>,
    /// Number of devices that list this device as a parent.
    pub kids:            usize,
    pub exists:          bool,
    pub kind:            DeviceKind,
    pub format:          Format,
    pub original_format: Format,
    pub uuid:            Option<String>,
    pub serial:          Option<String>,
    pub vendor:          Option<String>,
    pub bus:             Option<String>,
    pub model:           Option<String>,
    /// Size in bytes.
    pub size:            u64,
    pub target_size:     u64,
    pub media_present:   bool,
}

impl Device {
    fn new(name: &str, kind: DeviceKind, parents: Vec<DeviceId>) -> Self {
        let path = ["/dev/", name].concat();
        let format = Format::none(&path);
        Device {
            id: DeviceId::next(),
            name: name.to_owned(),
            original_format: format.clone(),
            format,
            path,
            sysfs_path: None,
            major_minor: None,
            parents,
            kids: 0,
            exists: false,
            kind,
            uuid: None,
            serial: None,
            vendor: None,
            bus: None,
            model: None,
            size: 0,
            target_size: 0,
            media_present: true,
        }
    }

    pub fn disk(name: &str) -> Self { Device::new(name, DeviceKind::Disk { partitionable: true }, Vec::new()) }

    /// A partition on `disk`, which becomes its only parent.
    pub fn partition(name: &str, disk: &Device, info: PartitionInfo) -> Self {
        Device::new(name, DeviceKind::Partition(info), vec![disk.id])
    }

    pub fn composite(name: &str, kind: &str, partitionable: bool, parents: &[&Device]) -> Self {
        Device::new(
            name,
            DeviceKind::Composite { kind: kind.to_owned(), partitionable },
            parents.iter().map(|parent| parent.id).collect(),
        )
    }

    pub fn placeholder(name: &str) -> Self { Device::new(name, DeviceKind::Placeholder, Vec::new()) }

    pub fn existing(mut self) -> Self {
        self.exists = true;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self.target_size = size;
        self
    }

    /// Binds a format, which also becomes the original format snapshot.
    pub fn with_format(mut self, mut format: Format) -> Self {
        format.device = self.path.clone();
        self.original_format = format.clone();
        self.format = format;
        self
    }

    pub fn category(&self) -> DeviceCategory {
        match self.kind {
            DeviceKind::Disk { .. } => DeviceCategory::Disk,
            DeviceKind::Partition(_) => DeviceCategory::Partition,
            DeviceKind::Composite { .. } => DeviceCategory::Composite,
            DeviceKind::Placeholder => DeviceCategory::Placeholder,
        }
    }

    /// Short name of the device type, such as `disk` or `mdarray`.
    pub fn type_name(&self) -> &str {
        match self.kind {
            DeviceKind::Disk { .. } => "disk",
            DeviceKind::Partition(_) => "partition",
            DeviceKind::Composite { ref kind, .. } => kind.as_str(),
            DeviceKind::Placeholder => "placeholder",
        }
    }

    pub fn partitionable(&self) -> bool {
        match self.kind {
            DeviceKind::Disk { partitionable } | DeviceKind::Composite { partitionable, .. } => {
                partitionable
            }
            _ => false,
        }
    }

    /// True if the device may hold partitions and carries a disklabel.
    pub fn partitioned(&self) -> bool { self.partitionable() && self.format.is_disklabel() }

    pub fn is_leaf(&self) -> bool { self.kids == 0 }

    pub fn is_placeholder(&self) -> bool { self.kind == DeviceKind::Placeholder }

    pub fn partition_info(&self) -> Option<&PartitionInfo> {
        match self.kind {
            DeviceKind::Partition(ref info) => Some(info),
            _ => None,
        }
    }

    pub fn is_extended(&self) -> bool { self.partition_info().map_or(false, PartitionInfo::is_extended) }

    pub fn is_logical(&self) -> bool { self.partition_info().map_or(false, PartitionInfo::is_logical) }

    /// The disk that a partition lives on.
    pub fn disk(&self) -> Option<DeviceId> {
        self.partition_info().and_then(|_| self.parents.first().cloned())
    }

    /// The format label, which stands in for the device label.
    pub fn label(&self) -> Option<&str> { self.format.label.as_ref().map(String::as_str) }

    pub fn description(&self) -> String {
        match (self.vendor.as_ref(), self.model.as_ref()) {
            (Some(vendor), Some(model)) if !vendor.is_empty() => format!("{} {}", vendor, model),
            (_, Some(model)) => model.clone(),
            _ => self.name.clone(),
        }
    }

    /// Adopts the name and number that the partition table now reports.
    pub(crate) fn update_name(&mut self, entry: &TableEntry) {
        if let DeviceKind::Partition(ref mut info) = self.kind {
            info.number = entry.number;
        }

        if self.name != entry.name {
            debug!("renaming {} to {}", self.name, entry.name);
            self.name = entry.name.clone();
            self.path = ["/dev/", self.name.as_str()].concat();
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} (id {})", self.type_name(), self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DiskLabel;
    use crate::fixtures::MockTable;
    use disk_types::PartitionType;

    #[test]
    fn partitioned_requires_disklabel() {
        let disk = Device::disk("sda");
        assert!(disk.partitionable());
        assert!(!disk.partitioned());

        let label = DiskLabel::new(MockTable::msdos("sda", &[]));
        let disk = disk.with_format(Format::disklabel("/dev/sda", label));
        assert!(disk.partitioned());

        let lv = Device::composite("vg-root", "lvmlv", false, &[&disk]);
        assert!(!lv.partitionable());
        assert_eq!(lv.parents, vec![disk.id]);
        assert_eq!(lv.type_name(), "lvmlv");
    }

    #[test]
    fn partitions_know_their_disk() {
        let disk = Device::disk("sda");
        let info = PartitionInfo::new(5, PartitionType::Logical, false, 4096);
        let part = Device::partition("sda5", &disk, info);
        assert_eq!(part.disk(), Some(disk.id));
        assert!(part.is_logical());
        assert_eq!(part.path, "/dev/sda5");
        assert_eq!(disk.disk(), None);
    }

    #[test]
    fn renames_follow_table() {
        let disk = Device::disk("sda");
        let mut part = Device::partition("sda6", &disk, PartitionInfo::new(6, PartitionType::Logical, false, 8192));
        part.update_name(&TableEntry::new(5, "sda5".into(), 8192, 2048, PartitionType::Logical, false));
        assert_eq!(part.name, "sda5");
        assert_eq!(part.path, "/dev/sda5");
        assert_eq!(part.partition_info().map(|info| info.number), Some(5));
    }
}
