use super::exec;
use crate::retry::Retry;
use std::io;

/// Waits for the udev event queue to drain, so that device nodes reflect the
/// latest partition table changes.
pub fn udev_settle() -> io::Result<()> {
    Retry::default()
        .attempts(3)
        .interval(500)
        .retry_until_ok(|| exec("udevadm", None, None, &["settle".into(), "--timeout=30".into()]))
}
