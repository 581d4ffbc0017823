//! Tracing subscriber setup

use crate::config::LogLevel;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Mutex;

/// Install the global subscriber, writing to `log_file` or stderr
pub fn init_logging(level: LogLevel, log_file: Option<&Path>) -> Result<()> {
    let level = tracing::Level::from(level);

    let result = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
