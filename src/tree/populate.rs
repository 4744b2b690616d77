//! Discovery of block devices and classification of their contents.

use super::DeviceTree;
use crate::device::{strip_dm_partition, Device, DeviceId, DeviceKind, PartitionInfo, SECTOR_SIZE};
use crate::errors::DeviceTreeError;
use crate::external::{DeviceRecord, RecordFlags, ReinitializePrompt};
use crate::format::{Format, FormatArgs};
use crate::operations::Operation;
use disk_types::{FileSystem, PartitionTable};
use itertools::Itertools;
use std::path::Path;

impl DeviceTree {
    /// Scans every block device on the system into the tree.
    pub fn populate(&mut self) -> Result<(), DeviceTreeError> {
        self.populated = false;

        let records = self.enumerator.block_devices().map_err(|why| DeviceTreeError::Enumerate { why })?;
        info!("devices to scan: {}", records.iter().map(|record| record.name.as_str()).join(", "));

        self.protected_dev_names = resolve_protected(&self.config.protected, &records);
        if !self.protected_dev_names.is_empty() {
            info!("protected devices: {}", self.protected_dev_names.iter().join(", "));
        }

        for record in &records {
            self.add_device(record)?;
        }

        self.populated = true;
        Ok(())
    }

    /// Adds the device described by `record`, along with its format.
    ///
    /// Returns `None` if the device was ignored or could not be placed in
    /// the tree.
    pub fn add_device(&mut self, record: &DeviceRecord) -> Result<Option<DeviceId>, DeviceTreeError> {
        if self.is_ignored(record) {
            debug!("ignoring {} ({})", record.name, record.sysfs_path);
            return Ok(None);
        }

        debug!("scanning {} ({})...", record.name, record.sysfs_path);
        let existing = self.graph.by_name(&record.name).map(|device| device.id);
        let id = if record.is_disk() {
            match existing {
                Some(id) => id,
                None => self.add_disk_device(record)?,
            }
        } else if record.is_partition() {
            debug!("{} is a partition", record.name);
            match existing {
                Some(id) => id,
                None => match self.add_partition_device(record)? {
                    Some(id) => id,
                    None => return Ok(None),
                },
            }
        } else {
            error!("unknown block device type for: {}", record.name);
            return Ok(None);
        };

        if !self.graph.get(id).map_or(false, |device| device.media_present) {
            return Ok(Some(id));
        }

        self.handle_format(record, id)?;
        if let Some(device) = self.graph.get_mut(id) {
            debug!("got device: {}", device);
            if !device.format.is_none() {
                debug!("got format: {}", device.format);
            }

            device.original_format = device.format.clone();
        }

        Ok(Some(id))
    }

    fn is_ignored(&mut self, record: &DeviceRecord) -> bool {
        if record.sysfs_path.is_empty() {
            return false;
        }

        let name = &record.name;
        if self.config.ignored.contains(name) {
            return true;
        }

        // md containers never appear in the exclusive list
        if record.md_level.as_ref().map_or(false, |level| level == "container") {
            return false;
        }

        if let (Some(_), Some(md_name)) = (record.md_container.as_ref(), record.md_name.as_ref()) {
            let set = self.config.exclusive.iter_mut().find(|entry| is_biosraid_set(entry, md_name));
            if let Some(entry) = set {
                *entry = name.clone();
                return false;
            }
        }

        let composite = RecordFlags::MD | RecordFlags::DM | RecordFlags::BIOSRAID | RecordFlags::MULTIPATH_MEMBER;
        if record.is_disk()
            && !record.flags.intersects(composite)
            && !self.config.exclusive.is_empty()
            && !self.config.exclusive.contains(name)
        {
            self.config.ignored.push(name.clone());
            return true;
        }

        name.starts_with("loop") || name.starts_with("ram")
    }

    fn add_disk_device(&mut self, record: &DeviceRecord) -> Result<DeviceId, DeviceTreeError> {
        debug!("{} is a disk", record.name);
        let mut device = Device::disk(&record.name).existing().with_size(record.size);
        if record.flags.contains(RecordFlags::DM) {
            device.kind = DeviceKind::Composite { kind: "dm".into(), partitionable: false };
        } else if record.flags.contains(RecordFlags::MD) {
            device.kind = DeviceKind::Composite { kind: "mdarray".into(), partitionable: true };
        }

        device.sysfs_path = Some(record.sysfs_path.clone());
        device.major_minor = Some((record.major, record.minor));
        device.uuid = record.uuid.clone();
        device.serial = record.serial.clone();
        device.vendor = Some(record.vendor.clone().unwrap_or_default());
        device.bus = record.bus.clone();
        device.model = record.model.clone();
        device.media_present = record.media_present;

        Ok(self.graph.add(device)?)
    }

    fn add_partition_device(&mut self, record: &DeviceRecord) -> Result<Option<DeviceId>, DeviceTreeError> {
        let parent = Path::new(&record.sysfs_path).parent();
        let parent_sysfs = parent.map_or_else(String::new, |path| path.to_string_lossy().into_owned());
        let disk_name = parent
            .and_then(Path::file_name)
            .map_or_else(String::new, |name| name.to_string_lossy().replace('!', "/"));

        if self.graph.by_name(&disk_name).is_none() {
            match self.enumerator.block_device(&parent_sysfs) {
                Ok(Some(disk)) => {
                    self.add_device(&disk)?;
                }
                Ok(None) => (),
                Err(why) => warn!("unable to read {}: {}", parent_sysfs, why),
            }
        }

        let disk = match self.graph.by_name(&disk_name) {
            Some(disk) => disk,
            None => {
                error!("failure scanning device {}", disk_name);
                return Ok(None);
            }
        };

        let partitions = disk.format.partitions();
        if partitions.is_empty() || !disk.partitionable() {
            debug!("ignoring partition {}", record.name);
            return Ok(None);
        }

        let entry = match partitions.into_iter().find(|entry| entry.name == record.name) {
            Some(entry) => entry,
            None => {
                debug!("{} is not in the partition table of {}", record.name, disk.name);
                return Ok(None);
            }
        };

        let info = PartitionInfo::new(entry.number, entry.part_type, entry.bootable || record.bootable, entry.start);
        let size = if record.size != 0 { record.size } else { entry.length * SECTOR_SIZE };
        let mut device = Device::partition(&record.name, disk, info).existing().with_size(size);
        device.sysfs_path = Some(record.sysfs_path.clone());
        device.major_minor = Some((record.major, record.minor));
        device.uuid = record.uuid.clone();
        device.media_present = record.media_present;

        Ok(Some(self.graph.add(device)?))
    }

    fn handle_format(&mut self, record: &DeviceRecord, id: DeviceId) -> Result<(), DeviceTreeError> {
        if !record.flags.intersects(RecordFlags::BIOSRAID | RecordFlags::MULTIPATH_MEMBER) {
            self.handle_disklabel_format(record, id)?;

            // A disklabel, or the refusal to create one, settles the device.
            let partitioned = self.graph.get(id).map_or(false, Device::partitioned);
            if partitioned || self.is_ignored(record) || !self.graph.contains(id) {
                return Ok(());
            }

            let spurious = self
                .graph
                .get(id)
                .map_or(false, |device| !device.partitionable() && device.format.is_disklabel());
            if spurious {
                return Ok(());
            }
        }

        let device = match self.graph.get(id) {
            Some(device) => device,
            None => return Ok(()),
        };

        let fs_type = match record.format_type() {
            Some(fs_type) if device.format.is_none() => fs_type,
            _ => {
                debug!("no type or existing type for {}, bailing", record.name);
                return Ok(());
            }
        };

        let mut kind = fs_type.to_owned();
        if fs_type == "vfat" && device.partition_info().map_or(false, |info| info.bootable) {
            let (min, max) = self.formats.bounds(FileSystem::Efi);
            if min <= device.size && device.size <= max {
                kind = "efi".into();
            }
        }

        debug!("type detected on '{}' is '{}'", record.name, kind);
        let args = FormatArgs {
            kind,
            uuid: record.uuid.clone(),
            label: record.label.clone(),
            device: device.path.clone(),
            serial: record.serial.clone(),
            exists: true,
            size: device.size,
        };

        let path = device.path.clone();
        let format = self.formats.format(args).unwrap_or_else(|why| {
            debug!("type '{}' on '{}' invalid, assuming no format: {}", fs_type, record.name, why);
            Format::none(&path)
        });

        if let Some(device) = self.graph.get_mut(id) {
            device.format = format;
        }

        Ok(())
    }

    /// Drops a disk whose disklabel cannot be used and remembers it as ignored.
    fn ignore_disk(&mut self, id: DeviceId, name: &str) -> Result<(), DeviceTreeError> {
        self.graph.remove(id, false)?;
        self.config.ignored.push(name.to_owned());
        Ok(())
    }

    fn handle_disklabel_format(&mut self, record: &DeviceRecord, id: DeviceId) -> Result<(), DeviceTreeError> {
        let device = match self.graph.get(id) {
            Some(device) => device.clone(),
            None => return Ok(()),
        };

        if record.format_type().is_some() {
            debug!("device {} does not contain a disklabel", device.name);
            return Ok(());
        }

        if device.partitioned() {
            debug!("disklabel format on {} already set up", device.name);
            return Ok(());
        }

        if let Err(why) = self.backend.setup(&device) {
            debug!("setup of {} failed: {}", device.name, why);
            warn!("aborting disklabel handler for {}", device.name);
            return Ok(());
        }

        if !device.partitionable() {
            // Probes of unpartitioned devices often report empty, spurious tables.
            if let Ok(label) = self.formats.disklabel(&device.path, true) {
                if !label.partitions().is_empty() {
                    if let Some(device) = self.graph.get_mut(id) {
                        device.format = Format::disklabel(&device.path, label);
                    }
                }
            }

            return Ok(());
        }

        let initialize = self.may_reinitialize(record, &device);
        let label = match self.formats.disklabel(&device.path, !initialize) {
            Ok(label) => label,
            Err(why) => {
                debug!("{}", why);
                if !self.confirm_reinitialize(record, &device) {
                    info!("ignoring {}: disklabel will not be reinitialized", device.name);
                    return self.ignore_disk(id, &device.name);
                }

                match self.formats.disklabel(&device.path, false) {
                    Ok(label) => label,
                    Err(why) => {
                        warn!("ignoring {}: {}", device.name, why);
                        return self.ignore_disk(id, &device.name);
                    }
                }
            }
        };

        let format = Format::disklabel(&device.path, label.clone());
        if label.exists() {
            if let Some(device) = self.graph.get_mut(id) {
                device.format = format;
            }

            return Ok(());
        }

        info!("initializing a {} disklabel on {}", label.table_type(), device.name);
        self.register(Operation::destroy_format(device))?;
        let device = match self.graph.get(id) {
            Some(device) => device.clone(),
            None => return Ok(()),
        };
        self.register(Operation::create_format(device.clone(), format))?;

        let partitions = label.partitions();
        if label.table_type() == PartitionTable::Mac && partitions.len() == 1 {
            let entry = &partitions[0];
            if self.graph.by_name(&entry.name).is_none() {
                let info = PartitionInfo::new(entry.number, entry.part_type, entry.bootable, entry.start);
                let partition =
                    Device::partition(&entry.name, &device, info).existing().with_size(entry.length * SECTOR_SIZE);
                self.graph.add(partition)?;
            }
        }

        Ok(())
    }

    /// True if policy allows a fresh disklabel on `device`. Protected
    /// partitions on the disk veto reinitialization.
    fn may_reinitialize(&self, record: &DeviceRecord, device: &Device) -> bool {
        let clear_parts = &self.config.clear_part_disks;
        if !clear_parts.is_empty() && !clear_parts.contains(&device.name) {
            return false;
        }

        let protected = self.protected_dev_names.iter().any(|protected| {
            let disk_name = strip_dm_partition(protected);
            self.enumerator.has_child(&record.sysfs_path, protected)
                || (disk_name != protected && disk_name == device.name)
        });

        if protected {
            debug!("{} holds protected partitions", device.name);
        }

        self.config.reinitialize_disks && !protected
    }

    fn confirm_reinitialize(&self, record: &DeviceRecord, device: &Device) -> bool {
        if self.config.zero_mbr {
            return true;
        }

        let description = device.description();
        let by_path = record.by_path.as_ref().map(|path| {
            Path::new(path).file_name().map_or_else(|| path.clone(), |name| name.to_string_lossy().into_owned())
        });

        let prompt = match by_path {
            Some(path) => {
                let details = format!("\n\nDevice details:\n{}", path);
                ReinitializePrompt::new(path, description, device.size, details)
            }
            None => ReinitializePrompt::new(device.name.clone(), description, device.size, String::new()),
        };

        self.confirm.as_ref().map_or(true, |confirm| confirm(&prompt))
    }
}

/// Matches biosraid set names of the form `isw_<letters>_<md name>`.
fn is_biosraid_set(entry: &str, md_name: &str) -> bool {
    if !entry.starts_with("isw_") {
        return false;
    }

    let rest = &entry[4..];
    let letters = rest.find(|c: char| !c.is_ascii_lowercase()).unwrap_or_else(|| rest.len());
    let rest = &rest[letters..];
    rest.starts_with('_') && rest[1..].starts_with(md_name)
}

/// Resolves protected device specifications into device names.
fn resolve_protected(specs: &[String], records: &[DeviceRecord]) -> Vec<String> {
    let mut names = Vec::new();
    for spec in specs {
        let found = if spec.starts_with("UUID=") {
            let uuid = &spec[5..];
            records.iter().find(|record| record.uuid.as_ref().map_or(false, |u| u == uuid))
        } else if spec.starts_with("LABEL=") {
            let label = &spec[6..];
            records.iter().find(|record| record.label.as_ref().map_or(false, |l| l == label))
        } else {
            let name = spec.trim_start_matches("/dev/");
            records.iter().find(|record| record.name == name)
        };

        match found {
            Some(record) => names.push(record.name.clone()),
            None if !spec.contains('=') => names.push(spec.trim_start_matches("/dev/").to_owned()),
            None => warn!("protected device {} was not found", spec),
        }
    }

    names
}
