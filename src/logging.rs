//! Tracing setup for the binary and integration tests.
//!
//! Events go to stdout through a compact formatter, filtered by `RUST_LOG`
//! (default `info`). Setting `DOCGATE_LOG_FILE` adds a second layer that
//! appends the same events to the named file through a non-blocking writer;
//! the worker guard lives for the whole process so buffered lines survive
//! until exit.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// Without `DOCGATE_LOG_FILE` the process logs to stdout only. A file target
/// that cannot be opened is reported on stderr and skipped rather than
/// failing startup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false).compact();
    let base = tracing_subscriber::registry().with(filter).with(stdout);

    let file = std::env::var("DOCGATE_LOG_FILE").ok().and_then(open_log_file);
    match file {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let _ = FILE_GUARD.set(guard);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false).compact();
            base.with(file_layer).init();
        }
        None => base.init(),
    }
}

/// Open the log file for appending, creating parent directories as needed.
fn open_log_file(path: String) -> Option<std::fs::File> {
    if let Some(parent) = Path::new(&path).parent()
        && !parent.as_os_str().is_empty()
        && let Err(error) = std::fs::create_dir_all(parent)
    {
        eprintln!("Cannot create log directory {}: {error}", parent.display());
        return None;
    }
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => Some(file),
        Err(error) => {
            eprintln!("Cannot open log file {path}: {error}");
            None
        }
    }
}
