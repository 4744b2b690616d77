use std::{fmt, str::FromStr};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;

const EFI_MIN: u64 = 50 * MIB;
const EFI_MAX: u64 = 256 * MIB;
const FAT16_MIN: u64 = 16 * MIB;
const FAT16_MAX: u64 = (4096 - 1) * MIB;
const FAT32_MIN: u64 = 33 * MIB;
const FAT32_MAX: u64 = 2 * TIB;
const EXT4_MAX: u64 = 16 * TIB;
const BTRFS_MIN: u64 = 250 * MIB;

/// Describes a file system format, such as ext4 or fat32.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub enum FileSystem {
    Btrfs,
    /// A FAT file system serving as an EFI system partition.
    Efi,
    Exfat,
    Ext2,
    Ext3,
    Ext4,
    F2fs,
    Fat16,
    Fat32,
    Ntfs,
    Swap,
    Xfs,
    Luks,
    Lvm,
}

/// Indicates that a partition is either too small or too large.
#[derive(Debug, PartialEq)]
pub enum PartitionSizeError {
    TooSmall(u64, u64),
    TooLarge(u64, u64),
}

/// A file system name which could not be mapped to a known `FileSystem`.
#[derive(Debug, Error, PartialEq)]
pub enum FileSystemError {
    #[error(display = "'{}' is not a supported file system", name)]
    Unknown { name: String },
}

impl FileSystem {
    /// The inclusive minimum and maximum sizes, in bytes, that this file system accepts.
    ///
    /// Only file systems with hard limits report bounds.
    pub fn size_bounds(self) -> Option<(u64, u64)> {
        match self {
            FileSystem::Efi => Some((EFI_MIN, EFI_MAX)),
            FileSystem::Fat16 => Some((FAT16_MIN, FAT16_MAX)),
            FileSystem::Fat32 => Some((FAT32_MIN, FAT32_MAX)),
            FileSystem::Btrfs => Some((BTRFS_MIN, u64::max_value())),
            FileSystem::Ext4 => Some((0, EXT4_MAX)),
            _ => None,
        }
    }

    /// Check if a given size, in bytes, is valid for this file system.
    ///
    /// # Possible Values
    /// - `Ok(())` indicates a valid partition size.
    /// - `Err(PartitionSizeError::TooSmall)` for a partition that is too small.
    /// - `Err(PartitionSizeError::TooLarge)` for a partition that is too large.
    pub fn validate_size(self, size: u64) -> Result<(), PartitionSizeError> {
        match self.size_bounds() {
            Some((min, _)) if size < min => Err(PartitionSizeError::TooSmall(size, min)),
            Some((_, max)) if size > max => Err(PartitionSizeError::TooLarge(size, max)),
            _ => Ok(()),
        }
    }

    /// True for the FAT family, including the EFI system partition.
    pub fn is_fat(self) -> bool {
        match self {
            FileSystem::Efi | FileSystem::Fat16 | FileSystem::Fat32 => true,
            _ => false,
        }
    }

    /// True if the format can be mounted somewhere in the file system hierarchy.
    pub fn is_mountable(self) -> bool {
        match self {
            FileSystem::Swap | FileSystem::Luks | FileSystem::Lvm => false,
            _ => true,
        }
    }
}

impl FromStr for FileSystem {
    type Err = FileSystemError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let type_ = match string.to_lowercase().as_str() {
            "btrfs" => FileSystem::Btrfs,
            "efi" => FileSystem::Efi,
            "exfat" => FileSystem::Exfat,
            "ext2" => FileSystem::Ext2,
            "ext3" => FileSystem::Ext3,
            "ext4" => FileSystem::Ext4,
            "f2fs" => FileSystem::F2fs,
            "fat16" => FileSystem::Fat16,
            "fat32" | "vfat" => FileSystem::Fat32,
            "swap" | "linux-swap(v1)" => FileSystem::Swap,
            "ntfs" => FileSystem::Ntfs,
            "xfs" => FileSystem::Xfs,
            "lvm" | "lvm2_member" => FileSystem::Lvm,
            "luks" | "crypto_luks" => FileSystem::Luks,
            _ => return Err(FileSystemError::Unknown { name: string.into() }),
        };
        Ok(type_)
    }
}

impl From<FileSystem> for &'static str {
    fn from(val: FileSystem) -> Self {
        match val {
            FileSystem::Btrfs => "btrfs",
            FileSystem::Efi => "efi",
            FileSystem::Exfat => "exfat",
            FileSystem::Ext2 => "ext2",
            FileSystem::Ext3 => "ext3",
            FileSystem::Ext4 => "ext4",
            FileSystem::F2fs => "f2fs",
            FileSystem::Fat16 => "fat16",
            FileSystem::Fat32 => "fat32",
            FileSystem::Ntfs => "ntfs",
            FileSystem::Swap => "linux-swap(v1)",
            FileSystem::Xfs => "xfs",
            FileSystem::Lvm => "lvm",
            FileSystem::Luks => "luks",
        }
    }
}

impl fmt::Display for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let str: &'static str = (*self).into();
        f.write_str(str)
    }
}
