//! Operation audit log.
//!
//! Every state transition of the core components is recorded twice: as a
//! `tracing` event and, when enabled, as one JSON object per line in
//! `.fsguard/logs/operations.jsonl`. Writing the audit file is best-effort;
//! a failing log never fails the operation being logged.

use crate::error::{GuardError, Result};
use crate::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// File name of the active audit log.
pub const LOG_FILE: &str = "operations.jsonl";

/// Outcome recorded for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    /// Operation began.
    Started,
    /// Operation succeeded.
    Success,
    /// Operation failed.
    Failure,
    /// Operation was rolled back.
    RolledBack,
    /// Operation was cancelled before running.
    Cancelled,
    /// Noteworthy but not a failure.
    Warning,
}

/// Optional fields for a log entry.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Human description.
    pub description: Option<String>,
    /// Free-form structured context.
    pub context: Option<serde_json::Value>,
}

/// One operation line in the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    /// Log entry ID (returned by `start_operation`).
    pub id: String,
    /// Operation kind, e.g. `write` or `conflict_resolution`.
    pub kind: String,
    /// Recorded status.
    pub status: LogStatus,
    /// Files involved.
    pub files: Vec<PathBuf>,
    /// Unix ms when the operation started.
    pub started_at: i64,
    /// Unix ms when the operation completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// Elapsed milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Error text for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    /// Process that wrote the entry.
    pub process_id: u32,
}

/// One security line in the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityLogEntry {
    /// Event name, e.g. `critical_conflict`.
    pub event: String,
    /// Structured details.
    pub details: serde_json::Value,
    /// Unix ms timestamp.
    pub timestamp: i64,
    /// Process that wrote the entry.
    pub process_id: u32,
}

/// A line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    /// Operation record.
    Operation(OperationLogEntry),
    /// Security record.
    Security(SecurityLogEntry),
}

/// Operation logger shared by all components.
pub struct OperationLogger {
    path: Option<PathBuf>,
    max_bytes: u64,
    max_rotated: usize,
    clock: Clock,
    open: Mutex<HashMap<String, OperationLogEntry>>,
    write_lock: Mutex<()>,
}

impl OperationLogger {
    /// Creates a logger appending to `dir/operations.jsonl`.
    pub fn new(dir: impl AsRef<Path>, max_bytes: u64, max_rotated: usize, clock: Clock) -> Self {
        Self {
            path: Some(dir.as_ref().join(LOG_FILE)),
            max_bytes,
            max_rotated,
            clock,
            open: Mutex::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a logger that only emits tracing events.
    pub fn tracing_only(clock: Clock) -> Self {
        Self {
            path: None,
            max_bytes: 0,
            max_rotated: 0,
            clock,
            open: Mutex::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the active log file, if file logging is enabled.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Records the start of an operation and returns its log ID.
    pub fn start_operation(&self, kind: &str, files: &[PathBuf], opts: LogOptions) -> String {
        let entry = OperationLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            status: LogStatus::Started,
            files: files.to_vec(),
            started_at: self.clock.now_millis(),
            completed_at: None,
            duration_ms: None,
            description: opts.description,
            error: None,
            context: opts.context,
            process_id: std::process::id(),
        };

        info!(log_id = %entry.id, kind = %entry.kind, files = entry.files.len(), "Operation started");
        self.append(&LogRecord::Operation(entry.clone()));

        let id = entry.id.clone();
        if let Ok(mut open) = self.open.lock() {
            open.insert(id.clone(), entry);
        }
        id
    }

    /// Records the completion of an operation started with `start_operation`.
    ///
    /// Unknown IDs are logged as a warning and otherwise ignored.
    pub fn complete_operation(
        &self,
        id: &str,
        status: LogStatus,
        error: Option<&str>,
        context: Option<serde_json::Value>,
    ) {
        let started = self.open.lock().ok().and_then(|mut open| open.remove(id));
        let Some(mut entry) = started else {
            warn!(log_id = %id, "complete_operation for unknown log entry");
            return;
        };

        let now = self.clock.now_millis();
        entry.status = status;
        entry.completed_at = Some(now);
        entry.duration_ms = Some(now - entry.started_at);
        entry.error = error.map(str::to_string);
        if context.is_some() {
            entry.context = context;
        }

        match status {
            LogStatus::Failure => {
                warn!(log_id = %id, kind = %entry.kind, error = ?entry.error, "Operation failed")
            }
            _ => info!(log_id = %id, kind = %entry.kind, status = ?status, "Operation completed"),
        }
        self.append(&LogRecord::Operation(entry));
    }

    /// Records a finished operation in one call.
    pub fn log_operation(&self, kind: &str, status: LogStatus, files: &[PathBuf], opts: LogOptions) {
        let now = self.clock.now_millis();
        let entry = OperationLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            status,
            files: files.to_vec(),
            started_at: now,
            completed_at: Some(now),
            duration_ms: Some(0),
            description: opts.description,
            error: None,
            context: opts.context,
            process_id: std::process::id(),
        };
        info!(kind = %entry.kind, status = ?status, "Operation logged");
        self.append(&LogRecord::Operation(entry));
    }

    /// Records a security-relevant event.
    pub fn log_security_event(&self, event: &str, details: serde_json::Value) {
        warn!(event = %event, details = %details, "Security event");
        let entry = SecurityLogEntry {
            event: event.to_string(),
            details,
            timestamp: self.clock.now_millis(),
            process_id: std::process::id(),
        };
        self.append(&LogRecord::Security(entry));
    }

    /// Reads the most recent records from the active log file, oldest first.
    ///
    /// Lines that fail to parse are skipped.
    pub fn read_recent(&self, limit: usize) -> Result<Vec<LogRecord>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(path).map_err(|e| GuardError::at(path, e))?;
        let mut records: Vec<LogRecord> = BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();

        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
        Ok(records)
    }

    fn append(&self, record: &LogRecord) {
        let Some(path) = &self.path else {
            return;
        };
        let Ok(_guard) = self.write_lock.lock() else {
            return;
        };
        if let Err(e) = self.append_locked(path, record) {
            warn!(path = %path.display(), error = %e, "Failed to write operation log");
        }
    }

    fn append_locked(&self, path: &Path, record: &LogRecord) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed(path)?;

        let mut line =
            serde_json::to_string(record).map_err(|e| GuardError::Serialization(e.to_string()))?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Shifts `log.N` to `log.N+1`, dropping the oldest, once the active
    /// file exceeds the size limit.
    fn rotate_if_needed(&self, path: &Path) -> Result<()> {
        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if self.max_bytes == 0 || size < self.max_bytes {
            return Ok(());
        }

        if self.max_rotated == 0 {
            fs::remove_file(path)?;
            return Ok(());
        }

        let rotated = |n: usize| PathBuf::from(format!("{}.{}", path.display(), n));
        let oldest = rotated(self.max_rotated);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.max_rotated).rev() {
            let from = rotated(n);
            if from.exists() {
                fs::rename(&from, rotated(n + 1))?;
            }
        }
        fs::rename(path, rotated(1))?;
        Ok(())
    }
}

impl std::fmt::Debug for OperationLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationLogger")
            .field("path", &self.path)
            .field("max_bytes", &self.max_bytes)
            .field("max_rotated", &self.max_rotated)
            .finish()
    }
}
