use self::FileSystem::*;
use super::exec;
use crate::retry::Retry;
use disk_types::FileSystem;
use std::{
    ffi::{OsStr, OsString},
    fs, io,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// Erase all signatures on a device.
pub fn wipefs<P: AsRef<Path>>(device: P) -> io::Result<()> {
    info!("using wipefs to wipe signatures from {:?}", device.as_ref());
    exec("wipefs", None, None, &["-a".into(), device.as_ref().into()])
}

/// Utilized for ensuring that block & partition information has synced with
/// the OS.
pub fn blockdev<P: AsRef<Path>, S: AsRef<OsStr>, I: IntoIterator<Item = S>>(
    disk: P,
    args: I,
) -> io::Result<()> {
    exec("blockdev", None, None, &{
        let mut args = args.into_iter().map(|x| x.as_ref().into()).collect::<Vec<OsString>>();
        args.push(disk.as_ref().into());
        args
    })
}

/// Asks the kernel to re-read the partition table of `disk`.
pub fn reread_partition_table<P: AsRef<Path>>(disk: P) -> io::Result<()> {
    Retry::default()
        .attempts(5)
        .interval(1000)
        .retry_until_ok(|| blockdev(disk.as_ref(), &["--flushbufs", "--rereadpt"]))
}

/// Obtains the file system on a partition via blkid
pub fn blkid_partition<P: AsRef<Path>>(part: P) -> Option<FileSystem> {
    let output = Command::new("blkid")
        .arg(part.as_ref())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .ok()?
        .stdout;

    String::from_utf8_lossy(&output)
        .split_whitespace()
        .find(|field| field.starts_with("TYPE="))
        .and_then(|field| {
            let length = field.len();
            if length > 7 {
                field[6..length - 1].parse::<FileSystem>().ok()
            } else {
                None
            }
        })
}

/// Formats the supplied `part` device with the file system specified.
pub fn mkfs<P: AsRef<Path>>(part: P, kind: FileSystem, label: Option<&str>) -> io::Result<()> {
    let (cmd, args): (&'static str, &'static [&'static str]) = match kind {
        Btrfs => ("mkfs.btrfs", &["-f"]),
        Exfat => ("mkfs.exfat", &[]),
        Ext2 => ("mkfs.ext2", &["-F", "-q"]),
        Ext3 => ("mkfs.ext3", &["-F", "-q"]),
        Ext4 => ("mkfs.ext4", &["-F", "-q", "-E", "lazy_itable_init"]),
        F2fs => ("mkfs.f2fs", &["-f", "-q"]),
        Fat16 => ("mkfs.fat", &["-F", "16"]),
        Efi | Fat32 => ("mkfs.fat", &["-F", "32"]),
        Ntfs => ("mkfs.ntfs", &["-FQ", "-q"]),
        Swap => ("mkswap", &["-f"]),
        Xfs => ("mkfs.xfs", &["-f"]),
        Luks | Lvm => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} cannot be created with mkfs", kind),
            ))
        }
    };

    exec(cmd, None, None, &{
        let mut args = args.iter().map(Into::into).collect::<Vec<OsString>>();
        if let Some(label) = label {
            args.push(label_flag(kind).into());
            args.push(label.into());
        }
        args.push(part.as_ref().into());
        args
    })
}

fn label_flag(kind: FileSystem) -> &'static str {
    match kind {
        Efi | Fat16 | Fat32 => "-n",
        Ntfs => "--label",
        _ => "-L",
    }
}

/// Resizes the file system on `part` to `size` bytes.
pub fn resize_fs<P: AsRef<Path>>(part: P, kind: FileSystem, size: u64) -> io::Result<()> {
    let part = part.as_ref();
    let kib = format!("{}K", size / 1024);
    match kind {
        Ext2 | Ext3 | Ext4 => {
            exec("e2fsck", None, Some(&[1]), &["-fy".into(), part.into()])?;
            exec("resize2fs", None, None, &[part.into(), kib.into()])
        }
        Ntfs => exec(
            "ntfsresize",
            Some(b"y\n"),
            None,
            &["--force".into(), "--size".into(), size.to_string().into(), part.into()],
        ),
        Swap => mkfs(part, Swap, None),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("resizing {} is not supported", kind),
        )),
    }
}

/// Converts the ext2 or ext3 file system on `part` into `target` in place.
pub fn migrate_fs<P: AsRef<Path>>(part: P, from: FileSystem, target: FileSystem) -> io::Result<()> {
    let part = part.as_ref();
    match (from, target) {
        (Ext2, Ext3) => exec("tune2fs", None, None, &["-j".into(), part.into()]),
        (Ext2, Ext4) | (Ext3, Ext4) => {
            let features = match from {
                Ext2 => "has_journal,extents,uninit_bg,dir_index",
                _ => "extents,uninit_bg,dir_index",
            };
            exec("tune2fs", None, None, &["-O".into(), features.into(), part.into()])?;
            exec("e2fsck", None, Some(&[1]), &["-fyD".into(), part.into()])
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("migrating {} to {} is not supported", from, target),
        )),
    }
}

/// Stops the md array at `device`.
pub fn mdadm_stop<P: AsRef<Path>>(device: P) -> io::Result<()> {
    info!("stopping md array {:?}", device.as_ref());
    exec("mdadm", None, None, &["--stop".into(), device.as_ref().into()])
}

/// Disables swapping on `device`.
pub fn swapoff<P: AsRef<Path>>(device: P) -> io::Result<()> {
    info!("disabling swap on {:?}", device.as_ref());
    exec("swapoff", None, None, &[device.as_ref().into()])
}

/// Paths of the devices currently in use as swap.
pub fn active_swaps() -> io::Result<Vec<PathBuf>> {
    fs::read_to_string("/proc/swaps").map(|swaps| parse_swaps(&swaps))
}

fn parse_swaps(swaps: &str) -> Vec<PathBuf> {
    swaps
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fat_labels_use_n() {
        assert_eq!(label_flag(Efi), "-n");
        assert_eq!(label_flag(Ext4), "-L");
        assert_eq!(label_flag(Ntfs), "--label");
    }

    #[test]
    fn only_ext_file_systems_migrate() {
        let result = migrate_fs("/dev/null", Xfs, Ext4);
        assert_eq!(result.map_err(|why| why.kind()), Err(io::ErrorKind::InvalidInput));
    }

    #[test]
    fn swap_devices_skip_the_header() {
        let swaps = "Filename\tType\tSize\tUsed\tPriority\n\
                     /dev/sda3 partition\t8388604\t0\t-2\n\
                     /dev/dm-1 partition\t4194300\t0\t-3\n";
        assert_eq!(parse_swaps(swaps), vec![PathBuf::from("/dev/sda3"), PathBuf::from("/dev/dm-1")]);
    }
}
