//! Log output for front ends and for inspecting a commit after the fact.

use fern::FormatCallback;
use log::{Level, LevelFilter, Record};
use std::{
    fmt, io,
    path::{Path, PathBuf},
};

const LOG_FILE: &str = "disktree.log";

/// Installs the logger at `Debug` level.
pub fn log<F: Fn(Level, &str) + Send + Sync + 'static>(callback: F) -> Result<(), fern::InitError> {
    log_with_level(LevelFilter::Debug, callback)
}

/// Sends every record at or above `level` to `callback`, to stderr, and to
/// `disktree.log` in `/tmp` and the home directory.
pub fn log_with_level<F>(level: LevelFilter, callback: F) -> Result<(), fern::InitError>
where
    F: Fn(Level, &str) + Send + Sync + 'static,
{
    let mut output = fern::Dispatch::new().format(format_record).chain(io::stderr());
    for path in log_files() {
        match fern::log_file(&path) {
            Ok(file) => output = output.chain(file),
            Err(why) => eprintln!("unable to log to {}: {}", path.display(), why),
        }
    }

    fern::Dispatch::new()
        .level(level)
        .chain(fern::Output::call(move |record| callback(record.level(), &record.args().to_string())))
        .chain(output)
        .apply()?;

    Ok(())
}

fn format_record(out: FormatCallback, message: &fmt::Arguments, record: &Record) {
    let location = match (record.module_path(), record.line()) {
        (Some(module), Some(line)) => format!(" {}:{}", module, line),
        _ => String::new(),
    };

    out.finish(format_args!("[{}{}] {}", record.level(), location, message))
}

fn log_files() -> Vec<PathBuf> {
    let mut files = vec![Path::new("/tmp").join(LOG_FILE)];
    if let Some(home) = dirs::home_dir() {
        files.push(home.join(LOG_FILE));
    }

    files
}
