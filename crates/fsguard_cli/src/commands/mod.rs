//! CLI commands.

pub mod init;
pub mod integrity;
pub mod log;
pub mod ops;
pub mod recovery;

use anyhow::{Context, Result};
use chrono::DateTime;
use fsguard_core::Guard;
use std::path::Path;

/// Opens the guard for `root`.
pub(crate) fn open(root: &Path) -> Result<Guard> {
    Guard::open(root).with_context(|| format!("Failed to open fsguard state in {}", root.display()))
}

/// Formats unix milliseconds as a UTC timestamp.
pub(crate) fn format_millis(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string()
}
