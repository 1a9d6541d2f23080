//! Tracing setup shared by the binaries.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use enrich_core::config::paths;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// File that receives a plain-text copy of every log line.
pub fn log_file_path() -> PathBuf {
    paths::logs_dir().join("enrich.log")
}

/// Installs the global subscriber: stderr plus an appending log file.
///
/// `RUST_LOG` overrides the default `info` filter. Falls back to stderr
/// only when the log file cannot be opened.
pub fn init() {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_path = log_file_path();
    let file = log_path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| OpenOptions::new().create(true).append(true).open(&log_path));

    match file {
        Ok(file) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true);
            tracing_subscriber::registry()
                .with(filter())
                .with(stderr_layer)
                .with(file_layer)
                .init();
            tracing::debug!(path = %log_path.display(), "File logging initialized");
        }
        Err(err) => {
            tracing_subscriber::registry()
                .with(filter())
                .with(stderr_layer)
                .init();
            tracing::warn!(path = %log_path.display(), error = %err, "File logging disabled");
        }
    }
}
