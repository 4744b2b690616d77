//! In-memory collaborators for exercising the tree without touching devices.

use crate::device::{partition_name, Device};
use crate::errors::*;
use crate::external::*;
use crate::format::{DiskLabel, Format, FormatArgs};
use crate::operations::{apply_table_changes, Operation};
use crate::config::TreeConfig;
use crate::tree::{DeviceGraph, DeviceTree};
use disk_types::{PartitionTable, PartitionType};
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    io,
    rc::Rc,
};

pub const GIB: u64 = 1024 * 1024 * 1024;

pub fn entry(disk: &str, number: u32, start: u64, part_type: PartitionType) -> TableEntry {
    TableEntry::new(number, partition_name(disk, number), start, 2048, part_type, false)
}

/// A partition table held in memory. Logical partitions on msdos tables are
/// renumbered by start sector whenever the table changes, and `reset`
/// returns to the entries of the last commit.
#[derive(Debug, Clone)]
pub struct MockTable {
    disk:        String,
    kind:        PartitionTable,
    exists:      bool,
    entries:     Vec<TableEntry>,
    committed:   Vec<TableEntry>,
    locked:      bool,
    pub commits: Rc<Cell<usize>>,
    pub resets:  Rc<Cell<usize>>,
    failures:    Rc<Cell<usize>>,
}

impl MockTable {
    pub fn new(disk: &str, kind: PartitionTable, entries: &[TableEntry]) -> Self {
        MockTable {
            disk: disk.to_owned(),
            kind,
            exists: true,
            entries: entries.to_vec(),
            committed: entries.to_vec(),
            locked: false,
            commits: Rc::new(Cell::new(0)),
            resets: Rc::new(Cell::new(0)),
            failures: Rc::new(Cell::new(0)),
        }
    }

    pub fn gpt(disk: &str, entries: &[TableEntry]) -> Self { MockTable::new(disk, PartitionTable::Gpt, entries) }

    pub fn msdos(disk: &str, entries: &[TableEntry]) -> Self {
        MockTable::new(disk, PartitionTable::Msdos, entries)
    }

    pub fn fresh(disk: &str, kind: PartitionTable, entries: &[TableEntry]) -> Self {
        let mut table = MockTable::new(disk, kind, entries);
        table.exists = false;
        table
    }

    /// Fails the next `count` commits.
    pub fn failing(self, count: usize) -> Self {
        self.failures.set(count);
        self
    }

    /// Refuses every entry edit.
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    fn renumber(&mut self) {
        if self.kind != PartitionTable::Msdos {
            return;
        }

        self.entries.sort_by_key(|entry| entry.start);
        let mut next = 5;
        for entry in self.entries.iter_mut().filter(|e| e.part_type == PartitionType::Logical) {
            entry.number = next;
            entry.name = partition_name(&self.disk, next);
            next += 1;
        }
    }

    fn error(&self, why: &str) -> DiskLabelCommitError {
        DiskLabelCommitError {
            device: ["/dev/", self.disk.as_str()].concat(),
            why:    io::Error::new(io::ErrorKind::Other, why.to_owned()),
        }
    }
}

impl DiskLabelTable for MockTable {
    fn table_type(&self) -> PartitionTable { self.kind }

    fn exists(&self) -> bool { self.exists }

    fn partitions(&self) -> Vec<TableEntry> { self.entries.clone() }

    fn add_partition(&mut self, entry: &TableEntry) -> Result<TableEntry, DiskLabelCommitError> {
        if self.locked {
            return Err(self.error("table is locked"));
        }

        if self.entries.iter().any(|e| e.start == entry.start) {
            return Err(self.error("sector already in use"));
        }

        let mut entry = entry.clone();
        entry.name = partition_name(&self.disk, entry.number);
        let start = entry.start;
        self.entries.push(entry);
        self.renumber();
        self.partition_at(start).ok_or_else(|| self.error("partition vanished"))
    }

    fn remove_partition(&mut self, start: u64) -> Result<(), DiskLabelCommitError> {
        if self.locked {
            return Err(self.error("table is locked"));
        }

        let position = self
            .entries
            .iter()
            .position(|e| e.start == start)
            .ok_or_else(|| self.error("no partition at sector"))?;
        self.entries.remove(position);
        self.renumber();
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DiskLabelCommitError> {
        let failures = self.failures.get();
        if failures != 0 {
            self.failures.set(failures - 1);
            return Err(self.error("device is busy"));
        }

        self.commits.set(self.commits.get() + 1);
        self.exists = true;
        self.renumber();
        self.committed = self.entries.clone();
        Ok(())
    }

    fn reset(&mut self) {
        self.resets.set(self.resets.get() + 1);
        self.entries = self.committed.clone();
    }
}

#[derive(Default)]
pub struct MockFactory {
    tables:       RefCell<HashMap<String, MockTable>>,
    fresh:        Option<(PartitionTable, Vec<TableEntry>)>,
    refuse_fresh: bool,
}

impl MockFactory {
    pub fn with_table(self, device: &str, table: MockTable) -> Self {
        self.tables.borrow_mut().insert(device.to_owned(), table);
        self
    }

    /// Fails to create fresh tables, as for devices no table type fits.
    pub fn refusing_fresh(mut self) -> Self {
        self.refuse_fresh = true;
        self
    }

    /// Fresh tables are created with this type and these entries.
    pub fn with_fresh(mut self, kind: PartitionTable, entries: &[TableEntry]) -> Self {
        self.fresh = Some((kind, entries.to_vec()));
        self
    }
}

impl FormatFactory for MockFactory {
    fn format(&self, args: FormatArgs) -> Result<Format, FormatConstructionError> {
        Format::from_args(args)
    }

    fn disklabel(&self, device: &str, exists: bool) -> Result<DiskLabel, InvalidDiskLabelError> {
        if exists {
            return self
                .tables
                .borrow_mut()
                .remove(device)
                .map(DiskLabel::new)
                .ok_or_else(|| InvalidDiskLabelError { device: device.to_owned() });
        }

        if self.refuse_fresh {
            return Err(InvalidDiskLabelError { device: device.to_owned() });
        }

        let disk = device.trim_start_matches("/dev/");
        let table = match self.fresh {
            Some((kind, ref entries)) => MockTable::fresh(disk, kind, entries),
            None => MockTable::fresh(disk, PartitionTable::Gpt, &[]),
        };

        Ok(DiskLabel::new(table))
    }
}

/// Records every call it receives in `log`.
#[derive(Default)]
pub struct MockBackend {
    pub log:          Rc<RefCell<Vec<String>>>,
    pub failing_setup: Vec<String>,
}

impl MockBackend {
    fn record(&self, entry: String) { self.log.borrow_mut().push(entry); }
}

impl StorageBackend for MockBackend {
    fn setup(&self, device: &Device) -> Result<(), DeviceOperationError> {
        if self.failing_setup.contains(&device.name) {
            return Err(DeviceOperationError {
                action: "set up",
                device: device.name.clone(),
                why:    io::Error::new(io::ErrorKind::Other, "device is offline"),
            });
        }

        self.record(format!("setup {}", device.name));
        Ok(())
    }

    fn teardown(&self, device: &Device) -> Result<(), DeviceOperationError> {
        self.record(format!("teardown {}", device.name));
        Ok(())
    }

    fn pre_commit_fixup(&self, device: &Device, _mountpoints: &[String]) {
        self.record(format!("fixup {}", device.name));
    }

    fn execute(&self, operation: &Operation, graph: &DeviceGraph) -> Result<(), ExecuteError> {
        apply_table_changes(operation, graph)?;
        self.record(format!("{} {} {}", operation.kind, operation.target, operation.device.name));
        Ok(())
    }

    fn settle(&self) { self.record("settle".into()); }
}

#[derive(Default)]
pub struct MockEnumerator {
    pub records: Vec<DeviceRecord>,
}

impl DeviceEnumerator for MockEnumerator {
    fn block_devices(&self) -> io::Result<Vec<DeviceRecord>> { Ok(self.records.clone()) }

    fn block_device(&self, sysfs_path: &str) -> io::Result<Option<DeviceRecord>> {
        Ok(self.records.iter().find(|r| r.sysfs_path == sysfs_path).cloned())
    }

    fn has_child(&self, sysfs_path: &str, name: &str) -> bool {
        let child = [sysfs_path, "/", name].concat();
        self.records.iter().any(|r| r.sysfs_path == child)
    }
}

pub fn disk_record(name: &str) -> DeviceRecord {
    DeviceRecord {
        name: name.to_owned(),
        sysfs_path: ["/sys/devices/pci0000:00/block/", name].concat(),
        major: 8,
        size: 100 * GIB,
        model: Some("Mock Disk".into()),
        flags: RecordFlags::DISK,
        ..DeviceRecord::default()
    }
}

pub fn partition_record(disk: &str, name: &str) -> DeviceRecord {
    DeviceRecord {
        name: name.to_owned(),
        sysfs_path: ["/sys/devices/pci0000:00/block/", disk, "/", name].concat(),
        major: 8,
        size: GIB,
        flags: RecordFlags::PARTITION,
        ..DeviceRecord::default()
    }
}

impl DeviceTree {
    /// A tree backed entirely by in-memory collaborators.
    pub fn mock() -> Self {
        DeviceTree::new(
            TreeConfig::default(),
            Box::new(MockEnumerator::default()),
            Box::new(MockFactory::default()),
            Box::new(MockBackend::default()),
        )
    }
}
