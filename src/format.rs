//! Format descriptors bound to devices.

use crate::errors::{DiskLabelCommitError, FormatConstructionError};
use crate::external::{DiskLabelTable, TableEntry};
use disk_types::{FileSystem, PartitionTable, PartitionType};
use std::{
    cell::RefCell,
    fmt,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

static NEXT_FORMAT: AtomicUsize = AtomicUsize::new(0);

/// Identity of a format descriptor, shared by its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormatId(usize);

impl FormatId {
    fn next() -> Self { FormatId(NEXT_FORMAT.fetch_add(1, Ordering::SeqCst)) }
}

/// What kind of content a format describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    None,
    DiskLabel(PartitionTable),
    Swap,
    FileSystem(FileSystem),
}

/// A shared handle to the partition table of a disk.
///
/// Clones refer to the same table, so a disk's `format` and its
/// `original_format` snapshot observe the same state.
#[derive(Clone)]
pub struct DiskLabel(Rc<RefCell<Box<dyn DiskLabelTable>>>);

impl DiskLabel {
    pub fn new<T: DiskLabelTable + 'static>(table: T) -> Self {
        DiskLabel(Rc::new(RefCell::new(Box::new(table))))
    }

    pub fn table_type(&self) -> PartitionTable { self.0.borrow().table_type() }

    pub fn exists(&self) -> bool { self.0.borrow().exists() }

    pub fn partitions(&self) -> Vec<TableEntry> { self.0.borrow().partitions() }

    pub fn partition_at(&self, start: u64) -> Option<TableEntry> {
        self.0.borrow().partition_at(start)
    }

    pub fn has_logical_partitions(&self) -> bool {
        self.partitions().iter().any(|entry| entry.part_type == PartitionType::Logical)
    }

    pub fn add_partition(&self, entry: &TableEntry) -> Result<TableEntry, DiskLabelCommitError> {
        self.0.borrow_mut().add_partition(entry)
    }

    pub fn remove_partition(&self, start: u64) -> Result<(), DiskLabelCommitError> {
        self.0.borrow_mut().remove_partition(start)
    }

    pub fn commit(&self) -> Result<(), DiskLabelCommitError> { self.0.borrow_mut().commit() }

    pub fn reset(&self) { self.0.borrow_mut().reset() }

    /// True if both handles point at the same table.
    pub fn same_table(&self, other: &DiskLabel) -> bool { Rc::ptr_eq(&self.0, &other.0) }
}

impl fmt::Debug for DiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let table = self.0.borrow();
        f.debug_struct("DiskLabel")
            .field("table_type", &table.table_type())
            .field("exists", &table.exists())
            .field("partitions", &table.partitions().len())
            .finish()
    }
}

/// Constructor fields handed to a `FormatFactory`.
#[derive(Debug, Clone, Default)]
pub struct FormatArgs {
    /// The probed type tag, such as `ext4`, `vfat`, `swap`, or `efi`.
    pub kind:   String,
    pub uuid:   Option<String>,
    pub label:  Option<String>,
    pub device: String,
    pub serial: Option<String>,
    pub exists: bool,
    pub size:   u64,
}

/// Describes the content of a device: a file system, swap, a disklabel, or nothing.
#[derive(Debug, Clone)]
pub struct Format {
    pub id:          FormatId,
    pub kind:        FormatKind,
    pub uuid:        Option<String>,
    pub label:       Option<String>,
    pub mountpoint:  Option<String>,
    pub exists:      bool,
    /// Path of the device this format lives on.
    pub device:      String,
    pub serial:      Option<String>,
    pub size:        u64,
    pub target_size: u64,
    pub migrate:     bool,
    disklabel:       Option<DiskLabel>,
}

impl Format {
    fn new(kind: FormatKind, device: &str) -> Self {
        Format {
            id: FormatId::next(),
            kind,
            uuid: None,
            label: None,
            mountpoint: None,
            exists: false,
            device: device.to_owned(),
            serial: None,
            size: 0,
            target_size: 0,
            migrate: false,
            disklabel: None,
        }
    }

    /// The explicit "no format" value.
    pub fn none(device: &str) -> Self { Format::new(FormatKind::None, device) }

    pub fn swap(device: &str) -> Self { Format::new(FormatKind::Swap, device) }

    pub fn filesystem(fs: FileSystem, device: &str) -> Self {
        match fs {
            FileSystem::Swap => Format::swap(device),
            fs => Format::new(FormatKind::FileSystem(fs), device),
        }
    }

    pub fn disklabel(device: &str, label: DiskLabel) -> Self {
        let mut format = Format::new(FormatKind::DiskLabel(label.table_type()), device);
        format.exists = label.exists();
        format.disklabel = Some(label);
        format
    }

    /// Builds a non-disklabel format from probed or requested fields.
    pub fn from_args(args: FormatArgs) -> Result<Self, FormatConstructionError> {
        let mut format = match args.kind.as_str() {
            "" | "none" => Format::none(&args.device),
            "disklabel" => {
                return Err(FormatConstructionError::Invalid {
                    kind:   args.kind.clone(),
                    device: args.device.clone(),
                    why:    "disklabels are read from the partition table".into(),
                });
            }
            kind => match kind.parse::<FileSystem>() {
                Ok(fs) => Format::filesystem(fs, &args.device),
                Err(why) => {
                    return Err(FormatConstructionError::Unsupported { device: args.device, why });
                }
            },
        };

        format.uuid = args.uuid;
        format.label = args.label;
        format.serial = args.serial;
        format.exists = args.exists;
        format.size = args.size;
        format.target_size = args.size;
        Ok(format)
    }

    pub fn with_mountpoint<S: Into<String>>(mut self, mountpoint: S) -> Self {
        self.mountpoint = Some(mountpoint.into());
        self
    }

    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_uuid<S: Into<String>>(mut self, uuid: S) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn existing(mut self) -> Self {
        self.exists = true;
        self
    }

    pub fn is_none(&self) -> bool { self.kind == FormatKind::None }

    pub fn is_disklabel(&self) -> bool {
        match self.kind {
            FormatKind::DiskLabel(_) => true,
            _ => false,
        }
    }

    /// The partition table handle, for disklabel formats.
    pub fn table(&self) -> Option<&DiskLabel> { self.disklabel.as_ref() }

    /// Entries of the partition table, or nothing if this is not a disklabel.
    pub fn partitions(&self) -> Vec<TableEntry> {
        self.disklabel.as_ref().map_or_else(Vec::new, DiskLabel::partitions)
    }

    /// The mount target of a mountable file system.
    pub fn mountpoint(&self) -> Option<&str> {
        match self.kind {
            FormatKind::FileSystem(fs) if fs.is_mountable() => self.mountpoint.as_ref().map(String::as_str),
            _ => None,
        }
    }

    /// Short name of the format type, or `None` for an empty format.
    pub fn type_name(&self) -> Option<&'static str> {
        match self.kind {
            FormatKind::None => None,
            FormatKind::DiskLabel(_) => Some("disklabel"),
            FormatKind::Swap => Some("swap"),
            FormatKind::FileSystem(fs) => Some(fs.into()),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            FormatKind::None => write!(f, "none on {}", self.device),
            FormatKind::DiskLabel(table) => write!(f, "{} disklabel on {}", table, self.device),
            FormatKind::Swap => write!(f, "swap on {}", self.device),
            FormatKind::FileSystem(fs) => match self.mountpoint() {
                Some(target) => write!(f, "{} on {} ({})", fs, self.device, target),
                None => write!(f, "{} on {}", fs, self.device),
            },
        }
    }
}
