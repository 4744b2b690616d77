#[cfg(feature = "parted")]
use super::PartedTable;
#[cfg(not(feature = "parted"))]
use super::SysfsTable;
use super::UDEV_DATA;
use crate::device::{Device, DeviceKind};
use crate::errors::*;
use crate::external::{FormatFactory, StorageBackend};
use crate::format::{DiskLabel, Format, FormatArgs, FormatKind};
use crate::operations::{apply_table_changes, format_kind, Operation, OperationKind, OperationTarget, Previous};
use crate::tree::DeviceGraph;
use disk_types::{FileSystem, PartitionTable};
use external_::{
    active_swaps, dmsetup_remove, mdadm_stop, migrate_fs, mkfs, pvs, reread_partition_table, resize_fs, swapoff,
    udev_settle, vgdeactivate, wipefs,
};
use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};

/// The table type given to disks that are initialized from scratch: GPT on
/// EFI systems, and msdos otherwise.
pub fn default_table() -> PartitionTable {
    if Path::new("/sys/firmware/efi").exists() {
        PartitionTable::Gpt
    } else {
        PartitionTable::Msdos
    }
}

/// Builds formats from probed types and opens disklabels on real disks.
#[derive(Debug, Clone)]
pub struct SystemFormats {
    #[cfg_attr(feature = "parted", allow(dead_code))]
    udev_data: PathBuf,
}

impl Default for SystemFormats {
    fn default() -> Self { SystemFormats { udev_data: PathBuf::from(UDEV_DATA) } }
}

impl FormatFactory for SystemFormats {
    fn format(&self, args: FormatArgs) -> Result<Format, FormatConstructionError> { Format::from_args(args) }

    #[cfg(feature = "parted")]
    fn disklabel(&self, device: &str, exists: bool) -> Result<DiskLabel, InvalidDiskLabelError> {
        if exists {
            PartedTable::open(device).map(DiskLabel::new)
        } else {
            Ok(DiskLabel::new(PartedTable::fresh(device, default_table())))
        }
    }

    #[cfg(not(feature = "parted"))]
    fn disklabel(&self, device: &str, exists: bool) -> Result<DiskLabel, InvalidDiskLabelError> {
        if exists {
            SysfsTable::open(&self.udev_data, device).map(DiskLabel::new)
        } else {
            Ok(DiskLabel::new(SysfsTable::fresh(device, default_table())))
        }
    }
}

/// One step of releasing a device so that the disks below it can be rewritten.
#[derive(Debug, Clone, PartialEq)]
enum Release {
    Swapoff(String),
    DeactivateGroup(String),
    RemoveMap(String),
    StopArray(String),
}

impl Release {
    fn run(&self) -> io::Result<()> {
        match *self {
            Release::Swapoff(ref path) => swapoff(path),
            Release::DeactivateGroup(ref group) => vgdeactivate(group),
            Release::RemoveMap(ref path) => dmsetup_remove(path),
            Release::StopArray(ref path) => mdadm_stop(path),
        }
    }
}

/// Swap devices and volume groups that are active on the system.
#[derive(Debug, Default)]
struct ActiveStorage {
    groups: BTreeMap<PathBuf, Option<String>>,
    swaps:  Vec<PathBuf>,
}

impl ActiveStorage {
    fn scan() -> Self {
        let groups = pvs().unwrap_or_else(|why| {
            debug!("no physical volumes listed: {}", why);
            BTreeMap::new()
        });

        let swaps = active_swaps().unwrap_or_else(|why| {
            warn!("unable to read active swaps: {}", why);
            Vec::new()
        });

        ActiveStorage { groups, swaps }
    }

    /// What must be stopped before `device` is no longer in use, outermost first.
    fn releases(&self, device: &Device) -> Vec<Release> {
        let path = Path::new(&device.path);
        let mut steps = Vec::new();

        if self.swaps.iter().any(|swap| swap == path) {
            steps.push(Release::Swapoff(device.path.clone()));
        }

        if let Some(Some(group)) = self.groups.get(path) {
            steps.push(Release::DeactivateGroup(group.clone()));
        }

        if let DeviceKind::Composite { ref kind, .. } = device.kind {
            match kind.as_str() {
                "dm" | "lvmlv" => steps.push(Release::RemoveMap(device.path.clone())),
                "mdarray" => steps.push(Release::StopArray(device.path.clone())),
                _ => (),
            }
        }

        steps
    }
}

/// Executes operations with the system's partitioning and file system tools.
#[derive(Debug, Default)]
pub struct SystemBackend;

impl SystemBackend {
    fn execute_format(&self, operation: &Operation) -> Result<(), ExecuteError> {
        let path = operation.device.path.as_str();
        let command = |why: io::Error| ExecuteError::ExternalCommand { device: path.to_owned(), why };
        let unsupported = || ExecuteError::Unsupported { operation: operation.to_string() };
        let label = operation.format.as_ref().and_then(|format| format.label.as_ref()).map(String::as_str);

        match operation.kind {
            OperationKind::Create => match format_kind(operation) {
                FormatKind::FileSystem(fs) => mkfs(path, fs, label).map_err(command),
                FormatKind::Swap => mkfs(path, FileSystem::Swap, label).map_err(command),
                FormatKind::DiskLabel(_) | FormatKind::None => Ok(()),
            },
            OperationKind::Destroy => {
                if operation.format.as_ref().map_or(false, |format| format.exists) {
                    wipefs(path).map_err(command)?;
                }
                Ok(())
            }
            OperationKind::Resize => {
                let size = operation.size.ok_or_else(unsupported)?;
                match operation.device.format.kind {
                    FormatKind::FileSystem(fs) => resize_fs(path, fs, size).map_err(command),
                    FormatKind::Swap => resize_fs(path, FileSystem::Swap, size).map_err(command),
                    _ => Err(unsupported()),
                }
            }
            OperationKind::Migrate => {
                let from = match operation.previous {
                    Previous::Format(ref format) => format.kind,
                    _ => operation.device.format.kind,
                };

                match (from, format_kind(operation)) {
                    (FormatKind::FileSystem(from), FormatKind::FileSystem(target)) => {
                        migrate_fs(path, from, target).map_err(command)
                    }
                    _ => Err(unsupported()),
                }
            }
        }
    }
}

impl StorageBackend for SystemBackend {
    fn setup(&self, device: &Device) -> Result<(), DeviceOperationError> {
        if !device.exists || !Path::new(&device.path).exists() {
            return Err(DeviceOperationError {
                action: "set up",
                device: device.path.clone(),
                why:    io::Error::new(io::ErrorKind::NotFound, "device node is not present"),
            });
        }

        debug!("{} is ready", device.path);
        Ok(())
    }

    fn teardown(&self, device: &Device) -> Result<(), DeviceOperationError> {
        if !device.exists || !Path::new(&device.path).exists() {
            debug!("{} has no node to release", device.path);
            return Ok(());
        }

        for step in ActiveStorage::scan().releases(device) {
            step.run().map_err(|why| DeviceOperationError {
                action: "tear down",
                device: device.path.clone(),
                why,
            })?;
        }

        debug!("{} is released", device.path);
        Ok(())
    }

    fn execute(&self, operation: &Operation, graph: &DeviceGraph) -> Result<(), ExecuteError> {
        let changed_table = apply_table_changes(operation, graph)?;
        if changed_table {
            let disk = match operation.target {
                OperationTarget::Device => operation.device.disk().and_then(|id| graph.get(id)),
                OperationTarget::Format => Some(&operation.device),
            };

            if let Some(disk) = disk {
                if let Err(why) = reread_partition_table(&disk.path) {
                    warn!("kernel did not re-read the partition table of {}: {}", disk.path, why);
                }
            }
        }

        match operation.target {
            OperationTarget::Format => self.execute_format(operation),
            OperationTarget::Device if operation.device.partition_info().is_some() => Ok(()),
            OperationTarget::Device => Err(ExecuteError::Unsupported { operation: operation.to_string() }),
        }
    }

    fn settle(&self) {
        if let Err(why) = udev_settle() {
            warn!("udevadm settle failed: {}", why);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;

    #[test]
    fn missing_devices_cannot_be_set_up() {
        let disk = Device::disk("sdzz").existing();
        assert!(SystemBackend.setup(&disk).is_err());
        assert!(SystemBackend.setup(&Device::disk("sda")).is_err());
        assert!(SystemBackend.teardown(&disk).is_ok());
    }

    #[test]
    fn releases_follow_device_usage() {
        let mut storage = ActiveStorage::default();
        storage.swaps.push("/dev/sda3".into());
        storage.groups.insert("/dev/sda2".into(), Some("vg0".into()));
        storage.groups.insert("/dev/sdb1".into(), None);

        let sda = Device::disk("sda");
        let swap = Device::disk("sda3");
        let pv = Device::disk("sda2");
        let unused = Device::disk("sdb1");
        let lv = Device::composite("vg0-root", "lvmlv", false, &[&pv]);
        let array = Device::composite("md127", "mdarray", true, &[&sda]);

        assert_eq!(storage.releases(&swap), vec![Release::Swapoff("/dev/sda3".into())]);
        assert_eq!(storage.releases(&pv), vec![Release::DeactivateGroup("vg0".into())]);
        assert_eq!(storage.releases(&unused), Vec::new());
        assert_eq!(storage.releases(&lv), vec![Release::RemoveMap("/dev/vg0-root".into())]);
        assert_eq!(storage.releases(&array), vec![Release::StopArray("/dev/md127".into())]);
    }

    #[test]
    fn whole_disk_devices_are_not_created() {
        let graph = DeviceGraph::default();
        let operation = Operation::create_device(Device::disk("sdzz"));
        match SystemBackend.execute(&operation, &graph) {
            Err(ExecuteError::Unsupported { .. }) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn destroying_a_new_format_runs_nothing() {
        let graph = DeviceGraph::default();
        let disk = Device::disk("sdzz").with_format(Format::filesystem(FileSystem::Ext4, "/dev/sdzz"));
        let operation = Operation::destroy_format(disk);
        assert!(SystemBackend.execute(&operation, &graph).is_ok());
    }

    #[test]
    fn probed_formats() {
        let args = FormatArgs { kind: "xfs".into(), device: "/dev/sdzz1".into(), exists: true, ..Default::default() };
        let format = SystemFormats::default().format(args).unwrap();
        assert_eq!(format.kind, FormatKind::FileSystem(FileSystem::Xfs));
        assert!(format.exists);
    }
}
