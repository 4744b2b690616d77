use super::{enumerate::udev_properties, parse_dev, read_value};
use crate::device::partition_name;
use crate::errors::{DiskLabelCommitError, InvalidDiskLabelError};
use crate::external::{DiskLabelTable, TableEntry};
use disk_types::{PartitionTable, PartitionType};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use sysfs_class::{Block, SysClass};

const EXTENDED_TYPES: &[&str] = &["0x5", "0xf", "0x85"];

/// The partition table of a disk as the kernel currently sees it.
///
/// Entries are read from the partition directories below the disk in sysfs.
/// Edits are kept in memory; writing them requires the `parted` feature.
#[derive(Debug, Clone)]
pub struct SysfsTable {
    disk:      String,
    sysfs:     Option<PathBuf>,
    udev_data: PathBuf,
    kind:      PartitionTable,
    exists:    bool,
    entries:   Vec<TableEntry>,
}

impl SysfsTable {
    /// Reads the table on `device`, which is either a name or a `/dev` path.
    pub fn open(udev_data: &Path, device: &str) -> Result<Self, InvalidDiskLabelError> {
        let invalid = || InvalidDiskLabelError { device: device.to_owned() };
        let disk = device.trim_start_matches("/dev/");
        let sysfs = Block::new(disk).and_then(|block| block.path().canonicalize()).map_err(|_| invalid())?;
        let (major, minor) =
            read_value::<String>(&sysfs.join("dev")).as_ref().and_then(|dev| parse_dev(dev)).ok_or_else(invalid)?;

        let kind = udev_properties(udev_data, major, minor)
            .get("ID_PART_TABLE_TYPE")
            .and_then(|kind| kind.parse::<PartitionTable>().ok())
            .ok_or_else(invalid)?;

        let mut table = SysfsTable {
            disk: disk.to_owned(),
            sysfs: Some(sysfs),
            udev_data: udev_data.to_path_buf(),
            kind,
            exists: true,
            entries: Vec::new(),
        };

        table.entries = table.read_entries().map_err(|_| invalid())?;
        Ok(table)
    }

    /// An empty table of type `kind` that has not been written to `device`.
    pub fn fresh(device: &str, kind: PartitionTable) -> Self {
        SysfsTable {
            disk: device.trim_start_matches("/dev/").to_owned(),
            sysfs: None,
            udev_data: PathBuf::from(super::UDEV_DATA),
            kind,
            exists: false,
            entries: Vec::new(),
        }
    }

    fn read_entries(&self) -> io::Result<Vec<TableEntry>> {
        let sysfs = match self.sysfs {
            Some(ref sysfs) => sysfs,
            None => return Ok(Vec::new()),
        };

        let mut entries = Vec::new();
        for child in fs::read_dir(sysfs)? {
            let path = child?.path();
            let number = match read_value::<u32>(&path.join("partition")) {
                Some(number) => number,
                None => continue,
            };

            let properties = read_value::<String>(&path.join("dev"))
                .as_ref()
                .and_then(|dev| parse_dev(dev))
                .map(|(major, minor)| udev_properties(&self.udev_data, major, minor))
                .unwrap_or_default();

            let entry_type = properties.get("ID_PART_ENTRY_TYPE").map(String::as_str).unwrap_or("");
            let part_type = if EXTENDED_TYPES.contains(&entry_type) {
                PartitionType::Extended
            } else if self.kind == PartitionTable::Msdos && number >= 5 {
                PartitionType::Logical
            } else {
                PartitionType::Primary
            };

            entries.push(TableEntry {
                number,
                name: partition_name(&self.disk, number),
                start: read_value(&path.join("start")).unwrap_or(0),
                length: read_value(&path.join("size")).unwrap_or(0),
                part_type,
                bootable: properties.get("ID_PART_ENTRY_FLAGS").map_or(false, |flags| flags == "0x80"),
            });
        }

        entries.sort_by_key(|entry| entry.start);
        Ok(entries)
    }

    fn renumber(&mut self) { renumber(&self.disk, self.kind, &mut self.entries) }

    fn error(&self, kind: io::ErrorKind, why: &str) -> DiskLabelCommitError {
        DiskLabelCommitError {
            device: ["/dev/", self.disk.as_str()].concat(),
            why:    io::Error::new(kind, why.to_owned()),
        }
    }
}

/// True if `entry` shares sectors with an entry other than its extended container.
pub(super) fn overlaps(entries: &[TableEntry], entry: &TableEntry) -> bool {
    let end = entry.start + entry.length;
    entries.iter().any(|e| {
        let nested = match (e.part_type, entry.part_type) {
            (PartitionType::Extended, PartitionType::Logical) => e.start <= entry.start && end <= e.start + e.length,
            (PartitionType::Logical, PartitionType::Extended) => {
                entry.start <= e.start && e.start + e.length <= end
            }
            _ => false,
        };

        !nested && entry.start < e.start + e.length && e.start < end
    })
}

/// Sorts `entries` by start sector and numbers msdos logical partitions
/// consecutively from 5, the way the kernel names them.
pub(super) fn renumber(disk: &str, kind: PartitionTable, entries: &mut [TableEntry]) {
    entries.sort_by_key(|entry| entry.start);
    if kind != PartitionTable::Msdos {
        return;
    }

    let mut next = 5;
    for entry in entries.iter_mut().filter(|e| e.part_type == PartitionType::Logical) {
        entry.number = next;
        entry.name = partition_name(disk, next);
        next += 1;
    }
}

impl DiskLabelTable for SysfsTable {
    fn table_type(&self) -> PartitionTable { self.kind }

    fn exists(&self) -> bool { self.exists }

    fn partitions(&self) -> Vec<TableEntry> { self.entries.clone() }

    fn add_partition(&mut self, entry: &TableEntry) -> Result<TableEntry, DiskLabelCommitError> {
        if overlaps(&self.entries, entry) {
            return Err(self.error(io::ErrorKind::AlreadyExists, "partition overlaps an existing entry"));
        }

        let mut entry = entry.clone();
        entry.name = partition_name(&self.disk, entry.number);
        let start = entry.start;
        self.entries.push(entry);
        self.renumber();
        self.partition_at(start).ok_or_else(|| self.error(io::ErrorKind::NotFound, "partition vanished"))
    }

    fn remove_partition(&mut self, start: u64) -> Result<(), DiskLabelCommitError> {
        let position = self
            .entries
            .iter()
            .position(|e| e.start == start)
            .ok_or_else(|| self.error(io::ErrorKind::NotFound, "no partition starts at this sector"))?;
        self.entries.remove(position);
        self.renumber();
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DiskLabelCommitError> {
        Err(self.error(io::ErrorKind::Other, "writing partition tables requires libparted support"))
    }

    fn reset(&mut self) {
        match self.read_entries() {
            Ok(entries) => self.entries = entries,
            Err(why) => warn!("unable to re-read the partition table of {}: {}", self.disk, why),
        }
    }
}
