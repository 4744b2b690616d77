use crate::device::{Device, DeviceCategory, DeviceId};
use crate::errors::TreeInvariantError;
use crate::external::TableEntry;
use crate::format::DiskLabel;
use std::collections::BTreeMap;

/// Resolves device ids to devices.
pub trait DeviceSource {
    fn device(&self, id: DeviceId) -> Option<&Device>;
}

/// True if `device` cannot exist without `dep`.
///
/// This holds when `dep` is an ancestor of `device`, or when `device` (or one
/// of its ancestors) is a logical partition and `dep` is the extended
/// partition on the same disk.
pub fn depends_on<S: DeviceSource + ?Sized>(source: &S, device: &Device, dep: &Device) -> bool {
    if device.is_logical() && dep.is_extended() && device.disk() == dep.disk() {
        return true;
    }

    device.parents.iter().any(|&parent| {
        parent == dep.id || source.device(parent).map_or(false, |parent| depends_on(source, parent, dep))
    })
}

/// Every known device, stored in insertion order and addressed by `DeviceId`.
#[derive(Debug, Default)]
pub struct DeviceGraph {
    devices: Vec<Device>,
}

impl DeviceSource for DeviceGraph {
    fn device(&self, id: DeviceId) -> Option<&Device> { self.get(id) }
}

impl DeviceGraph {
    pub fn new() -> Self { DeviceGraph::default() }

    /// Adds a device whose parents are all present.
    pub fn add(&mut self, device: Device) -> Result<DeviceId, TreeInvariantError> {
        if !device.is_placeholder() && self.devices.iter().any(|d| d.path == device.path) {
            return Err(TreeInvariantError::DuplicatePath { path: device.path });
        }

        if self.contains(device.id) {
            return Err(TreeInvariantError::DuplicateDevice {
                name: device.name,
                id:   device.id.value(),
            });
        }

        if device.parents.iter().any(|&parent| !self.contains(parent)) {
            return Err(TreeInvariantError::MissingParent { name: device.name });
        }

        for &parent in &device.parents {
            if let Some(parent) = self.get_mut(parent) {
                parent.kids += 1;
            }
        }

        debug!("added {} to device tree", device);
        let id = device.id;
        self.devices.push(device);
        Ok(id)
    }

    /// Removes a leaf device, or any device if `force` is set.
    ///
    /// Removing a partition also removes its entry from the disk's partition
    /// table, after which the remaining partitions on that disk adopt the
    /// names the table reports.
    pub fn remove(&mut self, id: DeviceId, force: bool) -> Result<Device, TreeInvariantError> {
        let position = self
            .position(id)
            .ok_or_else(|| TreeInvariantError::NotInTree { name: format!("id {}", id) })?;

        let (name, kids) = {
            let device = &self.devices[position];
            (device.name.clone(), device.kids)
        };

        if kids != 0 && !force {
            debug!("{} has {} kids", name, kids);
            return Err(TreeInvariantError::NotLeaf { name, kids });
        }

        let table_entry = {
            let device = &self.devices[position];
            match (device.partition_info(), device.disk().and_then(|disk| self.table_of(disk))) {
                (Some(info), Some(table)) => Some((*info, device.disk(), table)),
                _ => None,
            }
        };

        if let Some((info, disk, table)) = table_entry {
            if info.is_extended() && table.has_logical_partitions() {
                return Err(TreeInvariantError::LogicalPartitionsPresent { name });
            }

            if table.partition_at(info.start).is_some() {
                table.remove_partition(info.start).map_err(|why| TreeInvariantError::TableEntry { name, why })?;
                let device = self.devices.remove(position);
                self.refresh_partition_names(disk, false);
                return Ok(self.detach(device));
            }
        }

        let device = self.devices.remove(position);
        Ok(self.detach(device))
    }

    /// Releases a removed device from its parents.
    fn detach(&mut self, device: Device) -> Device {
        for &parent in &device.parents {
            if let Some(parent) = self.get_mut(parent) {
                parent.kids = parent.kids.saturating_sub(1);
            }
        }

        debug!("removed {} from device tree", device);
        device
    }

    /// Re-reads partition names from their disks' tables.
    ///
    /// Only partitions on `disk` are considered when it is given, and only
    /// partitions that exist on the system when `existing_only` is set.
    pub(crate) fn refresh_partition_names(&mut self, disk: Option<DeviceId>, existing_only: bool) {
        let updates: Vec<(usize, TableEntry)> = self
            .devices
            .iter()
            .enumerate()
            .filter_map(|(position, device)| {
                let info = device.partition_info()?;
                let parent = device.disk()?;
                if (existing_only && !device.exists) || disk.map_or(false, |disk| disk != parent) {
                    return None;
                }

                self.table_of(parent)?.partition_at(info.start).map(|entry| (position, entry))
            })
            .collect();

        for (position, entry) in updates {
            let device = &mut self.devices[position];
            device.update_name(&entry);
            device.format.device = device.path.clone();
        }
    }

    /// The live partition table of a partitioned device.
    pub(crate) fn table_of(&self, id: DeviceId) -> Option<DiskLabel> {
        self.get(id).filter(|disk| disk.partitioned()).and_then(|disk| disk.format.table().cloned())
    }

    fn position(&self, id: DeviceId) -> Option<usize> { self.devices.iter().position(|d| d.id == id) }

    pub fn contains(&self, id: DeviceId) -> bool { self.position(id).is_some() }

    pub fn get(&self, id: DeviceId) -> Option<&Device> { self.devices.iter().find(|d| d.id == id) }

    pub(crate) fn get_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    /// Iterates devices without re-validating paths.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Device> { self.devices.iter() }

    pub fn len(&self) -> usize { self.devices.len() }

    pub fn is_empty(&self) -> bool { self.devices.is_empty() }

    /// Every device, after checking that no two non-placeholder devices share a path.
    pub fn devices(&self) -> Result<&[Device], TreeInvariantError> {
        for (position, device) in self.devices.iter().enumerate() {
            if !device.is_placeholder()
                && self.devices[..position].iter().any(|seen| seen.path == device.path)
            {
                return Err(TreeInvariantError::DuplicatePathsInTree { path: device.path.clone() });
            }
        }

        Ok(&self.devices)
    }

    pub fn by_name(&self, name: &str) -> Option<&Device> {
        if name.is_empty() {
            return None;
        }

        self.devices.iter().find(|d| d.name == name)
    }

    /// Matches either the device UUID or the UUID of its format.
    pub fn by_uuid(&self, uuid: &str) -> Option<&Device> {
        if uuid.is_empty() {
            return None;
        }

        self.devices.iter().find(|d| {
            d.uuid.as_ref().map_or(false, |u| u == uuid)
                || d.format.uuid.as_ref().map_or(false, |u| u == uuid)
        })
    }

    pub fn by_label(&self, label: &str) -> Option<&Device> {
        if label.is_empty() {
            return None;
        }

        self.devices.iter().find(|d| d.label() == Some(label))
    }

    pub fn by_path(&self, path: &str) -> Option<&Device> {
        if path.is_empty() {
            return None;
        }

        self.devices.iter().find(|d| d.path == path)
    }

    pub fn by_sysfs_path(&self, path: &str) -> Option<&Device> {
        if path.is_empty() {
            return None;
        }

        self.devices.iter().find(|d| d.sysfs_path.as_ref().map_or(false, |p| p == path))
    }

    pub fn by_serial(&self, serial: &str) -> Vec<&Device> {
        self.devices.iter().filter(|d| d.serial.as_ref().map_or(false, |s| s == serial)).collect()
    }

    pub fn by_type(&self, type_name: &str) -> Vec<&Device> {
        self.devices.iter().filter(|d| d.type_name() == type_name).collect()
    }

    pub fn by_category(&self, category: DeviceCategory) -> Vec<&Device> {
        self.devices.iter().filter(|d| d.category() == category).collect()
    }

    pub fn children(&self, id: DeviceId) -> Vec<&Device> {
        self.devices.iter().filter(|d| d.parents.contains(&id)).collect()
    }

    /// Devices that no other device is built upon.
    pub fn leaves(&self) -> Vec<&Device> { self.devices.iter().filter(|d| d.is_leaf()).collect() }

    /// Leaf devices whose format has a mount target.
    pub fn filesystems(&self) -> Vec<&Device> {
        self.devices.iter().filter(|d| d.is_leaf() && d.format.mountpoint().is_some()).collect()
    }

    pub fn uuids(&self) -> BTreeMap<String, &Device> {
        let mut uuids = BTreeMap::new();
        for device in &self.devices {
            if let Some(ref uuid) = device.uuid {
                uuids.insert(uuid.clone(), device);
            }

            if let Some(ref uuid) = device.format.uuid {
                uuids.insert(uuid.clone(), device);
            }
        }

        uuids
    }

    pub fn labels(&self) -> BTreeMap<String, &Device> {
        self.devices
            .iter()
            .filter_map(|device| device.label().map(|label| (label.to_owned(), device)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PartitionInfo;
    use crate::fixtures::{entry, MockTable};
    use crate::format::Format;
    use disk_types::{FileSystem, PartitionType};

    fn msdos_disk(entries: &[TableEntry]) -> (Device, DiskLabel) {
        let label = DiskLabel::new(MockTable::msdos("sda", entries));
        let disk = Device::disk("sda").existing().with_format(Format::disklabel("/dev/sda", label.clone()));
        (disk, label)
    }

    fn part(disk: &Device, entry: &TableEntry) -> Device {
        let info = PartitionInfo::new(entry.number, entry.part_type, entry.bootable, entry.start);
        Device::partition(&entry.name, disk, info).existing()
    }

    #[test]
    fn parents_must_be_present() {
        let mut graph = DeviceGraph::new();
        let disk = Device::disk("sdb");
        let orphan = Device::partition("sdb1", &disk, PartitionInfo::new(1, PartitionType::Primary, false, 2048));
        match graph.add(orphan) {
            Err(TreeInvariantError::MissingParent { .. }) => (),
            other => panic!("unexpected result: {:?}", other),
        }

        graph.add(disk.clone()).unwrap();
        assert!(graph.add(disk).is_err());
    }

    #[test]
    fn paths_are_unique_except_placeholders() {
        let mut graph = DeviceGraph::new();
        graph.add(Device::disk("sda")).unwrap();
        match graph.add(Device::disk("sda")) {
            Err(TreeInvariantError::DuplicatePath { path }) => assert_eq!(path, "/dev/sda"),
            other => panic!("unexpected result: {:?}", other),
        }

        graph.add(Device::placeholder("none")).unwrap();
        graph.add(Device::placeholder("none")).unwrap();
        assert_eq!(graph.devices().unwrap().len(), 3);
    }

    #[test]
    fn listing_detects_duplicate_paths() {
        let mut graph = DeviceGraph::new();
        graph.add(Device::disk("sda")).unwrap();
        graph.devices.push(Device::disk("sda"));
        match graph.devices() {
            Err(TreeInvariantError::DuplicatePathsInTree { path }) => assert_eq!(path, "/dev/sda"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn forced_removal_of_non_leaf() {
        let mut graph = DeviceGraph::new();
        let a = Device::disk("sda");
        let b = Device::disk("sdb");
        let array = Device::composite("md0", "mdarray", true, &[&a, &b]);
        let lv = Device::composite("vg-root", "lvmlv", false, &[&array]);
        let (a_id, b_id, array_id) = (a.id, b.id, array.id);
        graph.add(a).unwrap();
        graph.add(b).unwrap();
        graph.add(array).unwrap();
        graph.add(lv).unwrap();

        assert_eq!(graph.get(a_id).unwrap().kids, 1);
        match graph.remove(array_id, false) {
            Err(TreeInvariantError::NotLeaf { kids, .. }) => assert_eq!(kids, 1),
            other => panic!("unexpected result: {:?}", other),
        }

        graph.remove(array_id, true).unwrap();
        assert_eq!(graph.get(a_id).unwrap().kids, 0);
        assert_eq!(graph.get(b_id).unwrap().kids, 0);
        assert!(graph.remove(array_id, true).is_err());
    }

    #[test]
    fn refused_table_edits_keep_the_partition() {
        let entries = [entry("sda", 1, 2048, PartitionType::Primary)];
        let label = DiskLabel::new(MockTable::msdos("sda", &entries).locked());
        let disk = Device::disk("sda").existing().with_format(Format::disklabel("/dev/sda", label.clone()));
        let sda1 = part(&disk, &entries[0]);
        let sda1_id = sda1.id;
        let mut graph = DeviceGraph::new();
        graph.add(disk.clone()).unwrap();
        graph.add(sda1).unwrap();

        match graph.remove(sda1_id, false) {
            Err(TreeInvariantError::TableEntry { name, .. }) => assert_eq!(name, "sda1"),
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(graph.contains(sda1_id));
        assert_eq!(graph.get(disk.id).unwrap().kids, 1);
        assert!(label.partition_at(2048).is_some());
    }

    #[test]
    fn extended_with_logicals_is_kept() {
        let entries = [
            entry("sda", 1, 2048, PartitionType::Primary),
            entry("sda", 2, 1_000_000, PartitionType::Extended),
            entry("sda", 5, 1_002_048, PartitionType::Logical),
        ];
        let (disk, _label) = msdos_disk(&entries);
        let extended = part(&disk, &entries[1]);
        let extended_id = extended.id;
        let mut graph = DeviceGraph::new();
        graph.add(disk.clone()).unwrap();
        graph.add(extended).unwrap();

        match graph.remove(extended_id, false) {
            Err(TreeInvariantError::LogicalPartitionsPresent { name }) => assert_eq!(name, "sda2"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn removing_partition_renames_siblings() {
        let entries = [
            entry("sda", 1, 2048, PartitionType::Primary),
            entry("sda", 2, 1_000_000, PartitionType::Extended),
            entry("sda", 5, 1_002_048, PartitionType::Logical),
            entry("sda", 6, 2_000_000, PartitionType::Logical),
        ];
        let (disk, label) = msdos_disk(&entries);
        let mut graph = DeviceGraph::new();
        graph.add(disk.clone()).unwrap();
        let ids: Vec<DeviceId> =
            entries.iter().map(|e| graph.add(part(&disk, e)).unwrap()).collect();

        let removed = graph.remove(ids[2], false).unwrap();
        assert_eq!(removed.name, "sda5");
        assert!(label.partition_at(1_002_048).is_none());

        let renamed = graph.get(ids[3]).unwrap();
        assert_eq!(renamed.name, "sda5");
        assert_eq!(renamed.path, "/dev/sda5");
        assert_eq!(graph.get(disk.id).unwrap().kids, 3);
    }

    #[test]
    fn lookups() {
        let mut graph = DeviceGraph::new();
        let mut disk = Device::disk("sda");
        disk.serial = Some("WD-1234".into());
        disk.sysfs_path = Some("/sys/devices/pci0000:00/block/sda".into());
        let root = Device::partition("sda1", &disk, PartitionInfo::new(1, PartitionType::Primary, false, 2048))
            .with_format(
                Format::filesystem(FileSystem::Ext4, "")
                    .with_label("root")
                    .with_uuid("1111")
                    .with_mountpoint("/"),
            );
        let (disk_id, root_id) = (disk.id, root.id);
        graph.add(disk).unwrap();
        graph.add(root).unwrap();

        assert_eq!(graph.by_name("sda1").map(|d| d.id), Some(root_id));
        assert_eq!(graph.by_name(""), None);
        assert_eq!(graph.by_uuid("1111").map(|d| d.id), Some(root_id));
        assert_eq!(graph.by_label("root").map(|d| d.id), Some(root_id));
        assert_eq!(graph.by_path("/dev/sda").map(|d| d.id), Some(disk_id));
        assert_eq!(
            graph.by_sysfs_path("/sys/devices/pci0000:00/block/sda").map(|d| d.id),
            Some(disk_id)
        );
        assert_eq!(graph.by_serial("WD-1234").len(), 1);
        assert_eq!(graph.by_type("partition").len(), 1);
        assert_eq!(graph.by_category(DeviceCategory::Disk).len(), 1);
        assert_eq!(graph.children(disk_id).len(), 1);
        assert_eq!(graph.leaves().len(), 1);
        assert_eq!(graph.filesystems().len(), 1);
        assert!(graph.uuids().contains_key("1111"));
        assert!(graph.labels().contains_key("root"));
    }

    #[test]
    fn logical_partitions_depend_on_extended() {
        let disk = Device::disk("sda");
        let extended = Device::partition("sda2", &disk, PartitionInfo::new(2, PartitionType::Extended, false, 4096));
        let logical = Device::partition("sda5", &disk, PartitionInfo::new(5, PartitionType::Logical, false, 6144));
        let lv = Device::composite("vg-home", "lvmlv", false, &[&logical]);
        let mut graph = DeviceGraph::new();
        graph.add(disk.clone()).unwrap();
        graph.add(extended.clone()).unwrap();
        graph.add(logical.clone()).unwrap();
        graph.add(lv.clone()).unwrap();

        assert!(depends_on(&graph, &logical, &extended));
        assert!(depends_on(&graph, &lv, &extended));
        assert!(depends_on(&graph, &lv, &disk));
        assert!(!depends_on(&graph, &extended, &logical));
        assert!(!depends_on(&graph, &disk, &lv));
    }
}
