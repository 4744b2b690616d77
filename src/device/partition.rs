use disk_types::PartitionType;

/// Partition-table details for a device that lives on a disk.
///
/// The start sector is the key used to find the partition's entry in the
/// disk's table, since partition numbers may shift when the table is
/// committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct PartitionInfo {
    pub number:    u32,
    pub part_type: PartitionType,
    pub bootable:  bool,
    pub start:     u64,
}

impl PartitionInfo {
    pub fn is_extended(&self) -> bool { self.part_type == PartitionType::Extended }

    pub fn is_logical(&self) -> bool { self.part_type == PartitionType::Logical }
}

/// Builds the kernel name of partition `number` on `disk`.
///
/// Disks whose names end in a digit (`nvme0n1`, `mmcblk0`, `md127`) separate
/// the number with a `p`.
pub fn partition_name(disk: &str, number: u32) -> String {
    if disk.chars().last().map_or(false, |c| c.is_ascii_digit()) {
        format!("{}p{}", disk, number)
    } else {
        format!("{}{}", disk, number)
    }
}

/// Strips a device-mapper style `p<N>` suffix, yielding the disk name.
pub(crate) fn strip_dm_partition(name: &str) -> &str {
    let digits = name.chars().rev().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return name;
    }

    let rest = &name[..name.len() - digits];
    if rest.ends_with('p') {
        &rest[..rest.len() - 1]
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_names() {
        assert_eq!(partition_name("sda", 2), "sda2");
        assert_eq!(partition_name("nvme0n1", 3), "nvme0n1p3");
    }

    #[test]
    fn dm_partition_suffix() {
        assert_eq!(strip_dm_partition("isw_raid_vol0p1"), "isw_raid_vol0");
        assert_eq!(strip_dm_partition("sda1"), "sda1");
        assert_eq!(strip_dm_partition("mapper"), "mapper");
    }
}
