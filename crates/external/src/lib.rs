//! A collection of external commands used throughout the program.

extern crate disk_types;
#[macro_use]
extern crate log;
#[macro_use]
extern crate smart_default;

pub mod block;
pub mod lvm;
pub mod retry;
pub mod udev;

pub use self::{block::*, lvm::*, retry::Retry, udev::*};

use std::{
    ffi::OsString,
    io::{self, Write},
    process::{Command, ExitStatus, Stdio},
};

/// Runs `cmd` with `args`, optionally feeding `stdin` to it.
///
/// Exit codes listed in `valid_codes` count as success. On failure the
/// error carries the last line the command wrote to stderr.
pub fn exec(
    cmd: &str,
    stdin: Option<&[u8]>,
    valid_codes: Option<&'static [i32]>,
    args: &[OsString],
) -> io::Result<()> {
    info!("running {} {:?}", cmd, args);

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    if let (Some(input), Some(handle)) = (stdin, child.stdin.as_mut()) {
        handle.write_all(input)?;
    }

    let output = child.wait_with_output()?;
    if accepted(output.status, valid_codes) {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let reason = stderr.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or("");
    let status = output.status.code().map_or_else(|| "signal".into(), |code| code.to_string());
    Err(io::Error::new(
        io::ErrorKind::Other,
        format!("{} exited with {}: {}", cmd, status, reason.trim()),
    ))
}

/// Runs `cmd` and returns what it wrote to stdout.
pub fn exec_output(cmd: &str, args: &[OsString]) -> io::Result<String> {
    debug!("reading output of {} {:?}", cmd, args);
    let output = Command::new(cmd).args(args).stdin(Stdio::null()).stderr(Stdio::null()).output()?;
    if !output.status.success() {
        return Err(io::Error::new(io::ErrorKind::Other, format!("{} exited with {}", cmd, output.status)));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn accepted(status: ExitStatus, valid_codes: Option<&[i32]>) -> bool {
    status.success()
        || match (status.code(), valid_codes) {
            (Some(code), Some(codes)) => codes.contains(&code),
            _ => false,
        }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_report_the_command() {
        let why = exec("false", None, None, &[]).unwrap_err();
        assert!(why.to_string().starts_with("false exited with 1"));
    }

    #[test]
    fn listed_codes_are_accepted() {
        assert!(exec("false", None, Some(&[1]), &[]).is_ok());
        assert!(exec("true", None, None, &[]).is_ok());
    }
}
