use std::{fmt, str::FromStr};

/// The kind of partition table (disklabel) written on a disk.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum PartitionTable {
    Msdos,
    Gpt,
    /// Apple partition map. A fresh map carries a single partition that holds the map itself.
    Mac,
    /// A whole-disk file system reported as a table by libparted.
    Loop,
}

impl PartitionTable {
    /// True if the table has a separate notion of primary, extended and logical partitions.
    pub fn supports_logical_partitions(self) -> bool { self == PartitionTable::Msdos }
}

impl FromStr for PartitionTable {
    type Err = &'static str;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string {
            "msdos" | "dos" | "mbr" => Ok(PartitionTable::Msdos),
            "gpt" => Ok(PartitionTable::Gpt),
            "mac" => Ok(PartitionTable::Mac),
            "loop" => Ok(PartitionTable::Loop),
            _ => Err("invalid partition table"),
        }
    }
}

impl From<PartitionTable> for &'static str {
    fn from(table: PartitionTable) -> Self {
        match table {
            PartitionTable::Msdos => "msdos",
            PartitionTable::Gpt => "gpt",
            PartitionTable::Mac => "mac",
            PartitionTable::Loop => "loop",
        }
    }
}

impl fmt::Display for PartitionTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let str: &'static str = (*self).into();
        f.write_str(str)
    }
}
