use super::table::{overlaps, renumber};
use crate::device::partition_name;
use crate::errors::{DiskLabelCommitError, InvalidDiskLabelError};
use crate::external::{DiskLabelTable, TableEntry};
use disk_types::{PartitionTable, PartitionType};
use libparted::{
    Device, Disk as PedDisk, DiskType as PedDiskType, Geometry, Partition as PedPartition, PartitionFlag,
    PartitionType as PedPartitionType,
};
use std::{
    io,
    path::{Path, PathBuf},
};

/// A partition table edited in memory and written with libparted.
///
/// Removals are written before additions, mirroring the order in which the
/// kernel must release sectors before they can be reused.
#[derive(Debug, Clone)]
pub struct PartedTable {
    path:    PathBuf,
    disk:    String,
    kind:    PartitionTable,
    exists:  bool,
    entries: Vec<TableEntry>,
    /// The entries as they were last read from the device.
    written: Vec<TableEntry>,
}

impl PartedTable {
    pub fn open(device: &str) -> Result<Self, InvalidDiskLabelError> {
        let invalid = || InvalidDiskLabelError { device: device.to_owned() };
        let mut table = PartedTable::fresh(device, PartitionTable::Gpt);
        let (kind, entries) = table.read().map_err(|why| {
            warn!("unable to read disklabel on {}: {}", device, why);
            invalid()
        })?;

        table.kind = kind.ok_or_else(invalid)?;
        table.exists = true;
        table.written = entries.clone();
        table.entries = entries;
        Ok(table)
    }

    pub fn fresh(device: &str, kind: PartitionTable) -> Self {
        let disk = device.trim_start_matches("/dev/").to_owned();
        PartedTable {
            path: Path::new("/dev").join(&disk),
            disk,
            kind,
            exists: false,
            entries: Vec::new(),
            written: Vec::new(),
        }
    }

    fn read(&self) -> io::Result<(Option<PartitionTable>, Vec<TableEntry>)> {
        info!("reading partition table of {}", self.path.display());
        let mut device = Device::get(&self.path)?;
        let disk = PedDisk::new(&mut device)?;
        let kind = disk.get_disk_type_name().and_then(|name| name.parse::<PartitionTable>().ok());

        let mut entries = Vec::new();
        for part in disk.parts() {
            if part.num() < 1 {
                continue;
            }

            let number = part.num() as u32;
            let part_type = match part.type_get_name() {
                "logical" => PartitionType::Logical,
                "extended" => PartitionType::Extended,
                _ => PartitionType::Primary,
            };

            let boot = PartitionFlag::PED_PARTITION_BOOT;
            entries.push(TableEntry {
                number,
                name: partition_name(&self.disk, number),
                start: part.geom_start() as u64,
                length: (part.geom_end() - part.geom_start() + 1) as u64,
                part_type,
                bootable: part.is_flag_available(boot) && part.get_flag(boot),
            });
        }

        entries.sort_by_key(|entry| entry.start);
        Ok((kind, entries))
    }

    fn mklabel(&self) -> io::Result<()> {
        info!("writing {} disklabel to {}", self.kind, self.path.display());
        let kind: &str = self.kind.into();
        let disk_type = PedDiskType::get(kind).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("libparted does not support {} tables", kind))
        })?;

        let mut device = Device::new(&self.path)?;
        PedDisk::new_fresh(&mut device, disk_type)?.commit()?;
        device.sync()
    }

    fn remove_stale(&self) -> io::Result<()> {
        let stale: Vec<u64> = self
            .written
            .iter()
            .filter(|entry| !self.entries.iter().any(|kept| same_extent(kept, entry)))
            .map(|entry| entry.start)
            .collect();

        if stale.is_empty() {
            return Ok(());
        }

        let mut device = Device::new(&self.path)?;
        {
            let mut disk = PedDisk::new(&mut device)?;
            for sector in stale {
                info!("removing partition at sector {} of {}", sector, self.path.display());
                disk.remove_partition_by_sector(sector as i64)?;
            }

            disk.commit()?;
        }

        device.sync()
    }

    fn create(&self, entry: &TableEntry) -> io::Result<()> {
        let mut device = Device::new(&self.path)?;
        {
            let geometry = Geometry::new(&device, entry.start as i64, entry.length as i64)?;
            let part_type = match entry.part_type {
                PartitionType::Primary => PedPartitionType::PED_PARTITION_NORMAL,
                PartitionType::Logical => PedPartitionType::PED_PARTITION_LOGICAL,
                PartitionType::Extended => PedPartitionType::PED_PARTITION_EXTENDED,
            };

            let (start, end) = (geometry.start(), geometry.start() + geometry.length() - 1);
            info!("creating partition {} with {} sectors: {} - {}", entry.name, entry.length, start, end);

            let mut disk = open_disk(&mut device)?;
            let mut part = PedPartition::new(&disk, part_type, None, start, end)?;
            let boot = PartitionFlag::PED_PARTITION_BOOT;
            if entry.bootable && part.is_flag_available(boot) && part.set_flag(boot, true).is_err() {
                error!("unable to set the boot flag on {}", entry.name);
            }

            let constraint = geometry
                .exact()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "exact constraint not found"))?;
            disk.add_partition(&mut part, &constraint)?;
            disk.commit()?;
        }

        device.sync()
    }

    fn write(&mut self) -> io::Result<()> {
        if !self.exists {
            self.mklabel()?;
            self.written.clear();
        }

        self.remove_stale()?;
        let written = &self.written;
        for entry in self.entries.iter().filter(|entry| !written.iter().any(|old| same_extent(old, entry))) {
            self.create(entry)?;
        }

        let (_, entries) = self.read()?;
        self.exists = true;
        self.written = entries.clone();
        self.entries = entries;
        Ok(())
    }

    fn error(&self, why: io::Error) -> DiskLabelCommitError {
        DiskLabelCommitError { device: self.path.to_string_lossy().into_owned(), why }
    }
}

/// Entries that cover the same sectors with the same type are left alone when
/// writing, even when renumbering changed their names.
fn same_extent(a: &TableEntry, b: &TableEntry) -> bool {
    a.start == b.start && a.length == b.length && a.part_type == b.part_type && a.bootable == b.bootable
}

/// Opens the disk on `device` while a geometry still refers to it.
fn open_disk<'a>(device: &'a mut Device) -> io::Result<PedDisk<'a>> {
    let device = device as *mut Device;
    unsafe { PedDisk::new(&mut *device) }
}

impl DiskLabelTable for PartedTable {
    fn table_type(&self) -> PartitionTable { self.kind }

    fn exists(&self) -> bool { self.exists }

    fn partitions(&self) -> Vec<TableEntry> { self.entries.clone() }

    fn add_partition(&mut self, entry: &TableEntry) -> Result<TableEntry, DiskLabelCommitError> {
        if overlaps(&self.entries, entry) {
            let why = io::Error::new(io::ErrorKind::AlreadyExists, "partition overlaps an existing entry");
            return Err(self.error(why));
        }

        let mut entry = entry.clone();
        entry.name = partition_name(&self.disk, entry.number);
        let start = entry.start;
        self.entries.push(entry);
        renumber(&self.disk, self.kind, &mut self.entries);
        self.partition_at(start).ok_or_else(|| {
            self.error(io::Error::new(io::ErrorKind::NotFound, "partition vanished"))
        })
    }

    fn remove_partition(&mut self, start: u64) -> Result<(), DiskLabelCommitError> {
        match self.entries.iter().position(|e| e.start == start) {
            Some(position) => {
                self.entries.remove(position);
                renumber(&self.disk, self.kind, &mut self.entries);
                Ok(())
            }
            None => {
                let why = io::Error::new(io::ErrorKind::NotFound, "no partition starts at this sector");
                Err(self.error(why))
            }
        }
    }

    fn commit(&mut self) -> Result<(), DiskLabelCommitError> {
        self.write().map_err(|why| self.error(why))
    }

    fn reset(&mut self) {
        if !self.exists {
            self.entries.clear();
            return;
        }

        match self.read() {
            Ok((_, entries)) => {
                self.written = entries.clone();
                self.entries = entries;
            }
            Err(why) => warn!("unable to re-read the partition table of {}: {}", self.disk, why),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(number: u32, start: u64, part_type: PartitionType) -> TableEntry {
        TableEntry::new(number, String::new(), start, 2048, part_type, false)
    }

    #[test]
    fn edits_renumber_logicals() {
        let mut table = PartedTable::fresh("/dev/sdc", PartitionTable::Msdos);
        let mut extended = entry(2, 4096, PartitionType::Extended);
        extended.length = 32768;
        table.add_partition(&entry(1, 2048, PartitionType::Primary)).unwrap();
        table.add_partition(&extended).unwrap();
        table.add_partition(&entry(5, 8192, PartitionType::Logical)).unwrap();
        table.add_partition(&entry(6, 12288, PartitionType::Logical)).unwrap();

        let added = table.add_partition(&entry(7, 6144, PartitionType::Logical)).unwrap();
        assert_eq!(added.name, "sdc5");
        assert_eq!(table.partition_at(12288).map(|e| e.name), Some("sdc7".to_owned()));

        table.remove_partition(6144).unwrap();
        let names: Vec<String> = table.partitions().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["sdc1", "sdc2", "sdc5", "sdc6"]);
        assert!(table.remove_partition(6144).is_err());
    }

    #[test]
    fn renumbered_entries_are_not_rewritten() {
        let mut table = PartedTable::fresh("sdc", PartitionTable::Msdos);
        table.written = vec![entry(5, 8192, PartitionType::Logical), entry(6, 12288, PartitionType::Logical)];
        table.entries = table.written.clone();
        table.remove_partition(8192).unwrap();

        let kept = table.partition_at(12288).unwrap();
        assert_eq!(kept.number, 5);
        assert!(same_extent(&kept, &table.written[1]));
        assert!(!table.entries.iter().any(|e| same_extent(e, &table.written[0])));
    }

    #[test]
    fn gpt_numbers_are_kept() {
        let mut table = PartedTable::fresh("nvme0n1", PartitionTable::Gpt);
        table.add_partition(&entry(3, 8192, PartitionType::Primary)).unwrap();
        let added = table.add_partition(&entry(1, 2048, PartitionType::Primary)).unwrap();
        assert_eq!(added.name, "nvme0n1p1");
        assert_eq!(table.partition_at(8192).map(|e| e.number), Some(3));
    }
}
