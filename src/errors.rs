use disk_types::FileSystemError;
use std::io;

/// Violations of the structural rules of the device graph.
#[rustfmt::skip]
#[derive(Debug, Fail)]
pub enum TreeInvariantError {
    #[fail(display = "device {} is already in the tree", path)]
    DuplicatePath { path: String },
    #[fail(display = "device {} (id {}) was already added to the tree", name, id)]
    DuplicateDevice { name: String, id: usize },
    #[fail(display = "parent device of {} is not in the tree", name)]
    MissingParent { name: String },
    #[fail(display = "device '{}' is not in the tree", name)]
    NotInTree { name: String },
    #[fail(display = "cannot remove non-leaf device '{}' ({} kids)", name, kids)]
    NotLeaf { name: String, kids: usize },
    #[fail(display = "cannot remove extended partition {}: logical partitions present", name)]
    LogicalPartitionsPresent { name: String },
    #[fail(display = "duplicate paths in device tree: {}", path)]
    DuplicatePathsInTree { path: String },
    #[fail(display = "unable to remove {} from its partition table: {}", name, why)]
    TableEntry { name: String, why: DiskLabelCommitError },
}

/// A request to register or cancel an operation was rejected.
#[rustfmt::skip]
#[derive(Debug, Fail)]
pub enum OperationError {
    #[fail(display = "device {} is not in the tree", device)]
    DeviceNotInTree { device: String },
    #[fail(display = "mountpoint {} is already in use by {}", mountpoint, device)]
    MountpointInUse { mountpoint: String, device: String },
    #[fail(display = "operation {} is not registered", operation)]
    NotRegistered { operation: String },
    #[fail(display = "invalid operation: {}", operation)]
    Invalid { operation: String },
    #[fail(display = "{}", why)]
    Tree { why: TreeInvariantError },
}

impl From<TreeInvariantError> for OperationError {
    fn from(why: TreeInvariantError) -> OperationError { OperationError::Tree { why } }
}

/// The partition table could not be written to the device.
#[derive(Debug, Fail)]
#[fail(display = "unable to commit disklabel on {}: {}", device, why)]
pub struct DiskLabelCommitError {
    pub device: String,
    pub why:    io::Error,
}

/// No usable partition table was found on the device.
#[derive(Debug, Fail)]
#[fail(display = "no valid disklabel found on {}", device)]
pub struct InvalidDiskLabelError {
    pub device: String,
}

/// A format descriptor could not be built from the probed type.
#[rustfmt::skip]
#[derive(Debug, Fail)]
pub enum FormatConstructionError {
    #[fail(display = "format type on {} is not supported: {}", device, why)]
    Unsupported { device: String, why: FileSystemError },
    #[fail(display = "format '{}' on {} is invalid: {}", kind, device, why)]
    Invalid { kind: String, device: String, why: String },
}

/// Bringing a device online or offline failed.
#[derive(Debug, Fail)]
#[fail(display = "unable to {} {}: {}", action, device, why)]
pub struct DeviceOperationError {
    pub action: &'static str,
    pub device: String,
    pub why:    io::Error,
}

/// Failures reported by a storage backend while executing an operation.
#[rustfmt::skip]
#[derive(Debug, Fail)]
pub enum ExecuteError {
    #[fail(display = "{}", why)]
    DiskLabelCommit { why: DiskLabelCommitError },
    #[fail(display = "{}", why)]
    Device { why: DeviceOperationError },
    #[fail(display = "problem executing external command on {}: {}", device, why)]
    ExternalCommand { device: String, why: io::Error },
    #[fail(display = "disk {} for partition {} has no disklabel", disk, partition)]
    NoDiskLabel { disk: String, partition: String },
    #[fail(display = "{} is not supported by this backend", operation)]
    Unsupported { operation: String },
    #[fail(display = "partition {} has no size", partition)]
    EmptyPartition { partition: String },
}

impl From<DiskLabelCommitError> for ExecuteError {
    fn from(why: DiskLabelCommitError) -> ExecuteError { ExecuteError::DiskLabelCommit { why } }
}

impl From<DeviceOperationError> for ExecuteError {
    fn from(why: DeviceOperationError) -> ExecuteError { ExecuteError::Device { why } }
}

/// Errors surfaced by the public `DeviceTree` methods.
#[rustfmt::skip]
#[derive(Debug, Fail)]
pub enum DeviceTreeError {
    #[fail(display = "{}", why)]
    Invariant { why: TreeInvariantError },
    #[fail(display = "{}", why)]
    Operation { why: OperationError },
    #[fail(display = "{}", why)]
    DiskLabel { why: InvalidDiskLabelError },
    #[fail(display = "operation '{}' failed: {}", operation, why)]
    Execute { operation: String, why: ExecuteError },
    #[fail(display = "unable to enumerate block devices: {}", why)]
    Enumerate { why: io::Error },
}

impl From<TreeInvariantError> for DeviceTreeError {
    fn from(why: TreeInvariantError) -> DeviceTreeError { DeviceTreeError::Invariant { why } }
}

impl From<OperationError> for DeviceTreeError {
    fn from(why: OperationError) -> DeviceTreeError { DeviceTreeError::Operation { why } }
}

impl From<InvalidDiskLabelError> for DeviceTreeError {
    fn from(why: InvalidDiskLabelError) -> DeviceTreeError { DeviceTreeError::DiskLabel { why } }
}
