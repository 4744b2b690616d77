use std::str::FromStr;

/// Defines whether the partition is a primary, logical, or extended partition.
///
/// # Note
///
/// This only applies for MBR partition tables. Partitions are always `Primary` on GPT.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum PartitionType {
    Primary,
    Logical,
    Extended,
}

impl Default for PartitionType {
    fn default() -> Self { PartitionType::Primary }
}

impl FromStr for PartitionType {
    type Err = &'static str;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string {
            "primary" | "normal" => Ok(PartitionType::Primary),
            "logical" => Ok(PartitionType::Logical),
            "extended" => Ok(PartitionType::Extended),
            _ => Err("invalid partition type"),
        }
    }
}
