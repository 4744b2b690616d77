use disktree::{DeviceTreeError, OperationError};

#[rustfmt::skip]
#[derive(Debug, Fail)]
pub(crate) enum CliError {
    #[fail(display = "{}", why)]
    Tree { why: DeviceTreeError },
    #[fail(display = "unable to schedule operation: {}", why)]
    Operation { why: OperationError },
    #[fail(display = "device '{}' was not found", device)]
    DeviceNotFound { device: String },
    #[fail(display = "format argument requires DEVICE:FS[:MOUNTPOINT], found '{}'", arg)]
    FormatArgs { arg: String },
    #[fail(display = "provided file system, '{}', was invalid", fs)]
    InvalidFileSystem { fs: String },
    #[fail(display = "argument '{}' is not a size in MiB", arg)]
    ArgNaN { arg: String },
    #[fail(display = "resize argument requires DEVICE:MIB, found '{}'", arg)]
    ResizeArgs { arg: String },
}

impl From<DeviceTreeError> for CliError {
    fn from(why: DeviceTreeError) -> CliError { CliError::Tree { why } }
}

impl From<OperationError> for CliError {
    fn from(why: OperationError) -> CliError { CliError::Operation { why } }
}
