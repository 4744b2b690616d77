use super::{parse_dev, read_value, UDEV_DATA};
use crate::device::SECTOR_SIZE;
use crate::external::{DeviceEnumerator, DeviceRecord, RecordFlags};
use external_::blkid_partition;
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};
use sysfs_class::{Block, SysClass};

/// Properties that udev recorded for a device.
pub type UdevProperties = HashMap<String, String>;

/// Parses an entry of the udev database.
///
/// `E:` lines become properties. `S:` lines are device links, collected
/// into a space-separated `DEVLINKS` property.
pub fn parse_udev_properties(data: &str) -> UdevProperties {
    let mut properties = HashMap::new();
    let mut links = Vec::new();
    for line in data.lines() {
        if line.starts_with("E:") {
            let mut fields = line[2..].splitn(2, '=');
            if let (Some(key), Some(value)) = (fields.next(), fields.next()) {
                properties.insert(key.to_owned(), value.to_owned());
            }
        } else if line.starts_with("S:") {
            links.push(["/dev/", &line[2..]].concat());
        }
    }

    if !links.is_empty() {
        properties.entry("DEVLINKS".into()).or_insert_with(|| links.join(" "));
    }

    properties
}

/// Reads the udev properties of the block device `major:minor`.
pub(crate) fn udev_properties(udev_data: &Path, major: u32, minor: u32) -> UdevProperties {
    let path = udev_data.join(format!("b{}:{}", major, minor));
    fs::read_to_string(&path).map(|data| parse_udev_properties(&data)).unwrap_or_default()
}

/// Enumerates block devices through sysfs and the udev database.
#[derive(Debug, Clone)]
pub struct SysfsEnumerator {
    udev_data: PathBuf,
}

impl Default for SysfsEnumerator {
    fn default() -> Self { SysfsEnumerator { udev_data: PathBuf::from(UDEV_DATA) } }
}

impl SysfsEnumerator {
    pub fn new() -> Self { SysfsEnumerator::default() }

    /// Reads udev properties from `path` instead of the system database.
    pub fn with_udev_data<P: Into<PathBuf>>(path: P) -> Self { SysfsEnumerator { udev_data: path.into() } }

    fn record(&self, block: &Block) -> io::Result<DeviceRecord> {
        let sysfs = block.path().canonicalize()?;
        let name = block.id().to_owned();
        let (major, minor) = read_value::<String>(&sysfs.join("dev"))
            .as_ref()
            .and_then(|dev| parse_dev(dev))
            .unwrap_or((0, 0));

        let properties = udev_properties(&self.udev_data, major, minor);
        let property = |key: &str| properties.get(key).filter(|value| !value.is_empty()).cloned();

        let mut flags = RecordFlags::empty();
        flags |= if sysfs.join("partition").exists() { RecordFlags::PARTITION } else { RecordFlags::DISK };
        if sysfs.join("dm").exists() {
            flags |= RecordFlags::DM;
        }

        if sysfs.join("md").exists() {
            flags |= RecordFlags::MD;
        }

        let mut fs_type = property("ID_FS_TYPE");
        if fs_type.as_ref().map_or(false, |kind| kind.ends_with("_raid_member")) {
            flags |= RecordFlags::BIOSRAID;
        }

        if property("DM_MULTIPATH_DEVICE_PATH").map_or(false, |value| value == "1") {
            flags |= RecordFlags::MULTIPATH_MEMBER;
        }

        if fs_type.is_none() && flags.contains(RecordFlags::PARTITION) {
            fs_type = blkid_partition(["/dev/", name.as_str()].concat()).map(|fs| <&str>::from(fs).to_owned());
        }

        let size = block.size().unwrap_or(0) * SECTOR_SIZE;
        let removable = read_value::<u8>(&sysfs.join("removable")) == Some(1);
        let by_path = property("DEVLINKS").and_then(|links| {
            links.split_whitespace().find(|link| link.starts_with("/dev/disk/by-path/")).map(String::from)
        });

        Ok(DeviceRecord {
            name,
            sysfs_path: sysfs.to_string_lossy().into_owned(),
            uuid: property("ID_FS_UUID"),
            label: property("ID_FS_LABEL"),
            fs_type,
            major,
            minor,
            bus: property("ID_BUS"),
            serial: property("ID_SERIAL_SHORT").or_else(|| property("ID_SERIAL")),
            vendor: property("ID_VENDOR"),
            model: property("ID_MODEL").or_else(|| read_value(&sysfs.join("device/model"))),
            size,
            by_path,
            table_type: property("ID_PART_TABLE_TYPE"),
            md_level: property("MD_LEVEL"),
            md_container: property("MD_CONTAINER"),
            md_name: property("MD_DEVNAME"),
            bootable: property("ID_PART_ENTRY_FLAGS").map_or(false, |flags| flags == "0x80"),
            media_present: !(removable && size == 0),
            flags,
        })
    }
}

impl DeviceEnumerator for SysfsEnumerator {
    fn block_devices(&self) -> io::Result<Vec<DeviceRecord>> {
        let mut records = Vec::new();
        for block in Block::all()? {
            match self.record(&block) {
                Ok(record) => records.push(record),
                Err(why) => warn!("unable to read block device {}: {}", block.id(), why),
            }
        }

        // disks are scanned before partitions
        records.sort_by_key(|record| record.is_partition());
        Ok(records)
    }

    fn block_device(&self, sysfs_path: &str) -> io::Result<Option<DeviceRecord>> {
        let path = Path::new(sysfs_path);
        if !path.join("dev").exists() {
            return Ok(None);
        }

        self.record(&Block::from_path(path)?).map(Some)
    }
}
