//! Atomic operation records, step definitions and rollback actions.

use crate::error::{GuardError, Result};
use crate::fsutil::{self, relocate, set_mode, set_times, write_staged};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Kind of an atomic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create a new file.
    Create,
    /// Replace or create a file's content.
    Write,
    /// Delete a file.
    Delete,
    /// Move a file or directory.
    Move,
    /// Copy a file.
    Copy,
    /// Change permission bits.
    Chmod,
    /// Create a directory.
    Mkdir,
    /// Remove a directory.
    Rmdir,
    /// Several steps executed in order.
    Batch,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Chmod => "chmod",
            Self::Mkdir => "mkdir",
            Self::Rmdir => "rmdir",
            Self::Batch => "batch",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of an atomic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Scheduled, not started. Only state where cancel succeeds.
    Pending,
    /// Steps are running.
    Executing,
    /// All steps applied.
    Completed,
    /// Failed and could not be fully rolled back (or rollback was disabled).
    Failed,
    /// All recorded actions were undone.
    RolledBack,
    /// Cancelled before it started.
    Cancelled,
}

impl OperationStatus {
    /// Returns true for statuses an operation never leaves on its own.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Executing)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One step of an atomic operation, with kind-specific fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStep {
    /// Replace the content of `path`, creating it if missing.
    Write {
        /// Target file.
        path: PathBuf,
        /// New content.
        content: Vec<u8>,
    },
    /// Create `path`; fails if it already exists.
    Create {
        /// New file.
        path: PathBuf,
        /// Initial content.
        content: Vec<u8>,
    },
    /// Delete the file at `path`.
    Delete {
        /// File to delete.
        path: PathBuf,
    },
    /// Move `source` to `destination`, displacing an existing destination.
    Move {
        /// Current location.
        source: PathBuf,
        /// New location.
        destination: PathBuf,
    },
    /// Copy `source` to `destination`, displacing an existing destination.
    Copy {
        /// File to copy.
        source: PathBuf,
        /// Copy location.
        destination: PathBuf,
    },
    /// Set permission bits on `path`.
    Chmod {
        /// Target path.
        path: PathBuf,
        /// New mode bits.
        mode: u32,
    },
    /// Create a directory (and missing parents).
    Mkdir {
        /// Directory to create.
        path: PathBuf,
    },
    /// Remove a directory with its content.
    Rmdir {
        /// Directory to remove.
        path: PathBuf,
    },
}

impl BatchStep {
    /// Write step.
    pub fn write(path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        Self::Write {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Create step.
    pub fn create(path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        Self::Create {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Delete step.
    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self::Delete { path: path.into() }
    }

    /// Move step.
    pub fn move_file(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Move {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Copy step.
    pub fn copy_file(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Copy {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Chmod step.
    pub fn chmod(path: impl Into<PathBuf>, mode: u32) -> Self {
        Self::Chmod {
            path: path.into(),
            mode,
        }
    }

    /// Mkdir step.
    pub fn mkdir(path: impl Into<PathBuf>) -> Self {
        Self::Mkdir { path: path.into() }
    }

    /// Rmdir step.
    pub fn rmdir(path: impl Into<PathBuf>) -> Self {
        Self::Rmdir { path: path.into() }
    }

    /// Operation kind of this step.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Write { .. } => OperationKind::Write,
            Self::Create { .. } => OperationKind::Create,
            Self::Delete { .. } => OperationKind::Delete,
            Self::Move { .. } => OperationKind::Move,
            Self::Copy { .. } => OperationKind::Copy,
            Self::Chmod { .. } => OperationKind::Chmod,
            Self::Mkdir { .. } => OperationKind::Mkdir,
            Self::Rmdir { .. } => OperationKind::Rmdir,
        }
    }

    /// Paths this step reads or mutates.
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Self::Write { path, .. }
            | Self::Create { path, .. }
            | Self::Delete { path }
            | Self::Chmod { path, .. }
            | Self::Mkdir { path }
            | Self::Rmdir { path } => vec![path.as_path()],
            Self::Move {
                source,
                destination,
            }
            | Self::Copy {
                source,
                destination,
            } => vec![source.as_path(), destination.as_path()],
        }
    }

    /// Source path for move/copy steps.
    pub fn source(&self) -> Option<&Path> {
        match self {
            Self::Move { source, .. } | Self::Copy { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Path the step produces or changes.
    pub fn target(&self) -> &Path {
        match self {
            Self::Move { destination, .. } | Self::Copy { destination, .. } => destination,
            Self::Write { path, .. }
            | Self::Create { path, .. }
            | Self::Delete { path }
            | Self::Chmod { path, .. }
            | Self::Mkdir { path }
            | Self::Rmdir { path } => path,
        }
    }

    /// Bytes this step is expected to write.
    pub fn expected_bytes(&self) -> u64 {
        match self {
            Self::Write { content, .. } | Self::Create { content, .. } => content.len() as u64,
            Self::Move { source, .. } | Self::Copy { source, .. } => {
                fs::metadata(source).map(|m| m.len()).unwrap_or(0)
            }
            _ => 0,
        }
    }
}

/// Options shared by every operation kind.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOptions {
    /// Snapshot existing files through the backup facility before destroying them.
    pub backup: bool,
    /// Undo completed steps when a later step fails (default: true).
    pub rollback_on_failure: bool,
    /// Human description.
    pub description: Option<String>,
    /// Scheduling priority; informational.
    pub priority: u8,
    /// Advisory timeout; exceeding it is logged, not enforced.
    pub timeout: Option<Duration>,
    /// Extra attempts for a failing step before giving up (default: 0).
    pub retry_count: u32,
    /// Operations that must have completed before this one may execute.
    pub dependencies: Vec<String>,
    /// Create missing parent directories (default: true).
    pub create_parents: bool,
    /// Override the configured fsync behavior.
    pub fsync: Option<bool>,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            backup: false,
            rollback_on_failure: true,
            description: None,
            priority: 0,
            timeout: None,
            retry_count: 0,
            dependencies: Vec::new(),
            create_parents: true,
            fsync: None,
        }
    }
}

impl OperationOptions {
    /// Options with backups enabled.
    pub fn with_backup() -> Self {
        Self {
            backup: true,
            ..Self::default()
        }
    }

    /// Sets the description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Metadata recorded on an operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OperationMetadata {
    /// Human description.
    pub description: Option<String>,
    /// Scheduling priority.
    pub priority: u8,
    /// Advisory timeout.
    pub timeout: Option<Duration>,
    /// Allowed retries per step.
    pub retry_count: u32,
    /// Required predecessor operations.
    pub dependencies: Vec<String>,
    /// Backups taken while executing.
    pub backups: Vec<PathBuf>,
}

/// Pre- or post-image of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    /// Snapshotted path.
    pub path: PathBuf,
    /// Whether anything existed at the path.
    pub exists: bool,
    /// Whether it was a directory.
    pub is_dir: bool,
    /// Size in bytes (0 for directories and missing paths).
    pub size: u64,
    /// Permission bits.
    pub mode: Option<u32>,
    /// Modification time in unix ms.
    pub modified: Option<i64>,
}

impl FileSnapshot {
    /// Captures the current state of `path`.
    pub fn capture(path: &Path) -> Self {
        match fs::symlink_metadata(path) {
            Ok(meta) => Self {
                path: path.to_path_buf(),
                exists: true,
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
                mode: Some(fsutil::mode_of(&meta)),
                modified: fsutil::modified_millis(&meta),
            },
            Err(_) => Self {
                path: path.to_path_buf(),
                exists: false,
                is_dir: false,
                size: 0,
                mode: None,
                modified: None,
            },
        }
    }
}

/// Inverse of one completed forward step.
///
/// Actions are recorded in execution order and undone in reverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackAction {
    /// Move `from` back to `path`.
    RestoreFile {
        /// Original location.
        path: PathBuf,
        /// Where the file currently lives.
        from: PathBuf,
    },
    /// Delete a file the operation created.
    DeleteFile {
        /// File to delete.
        path: PathBuf,
    },
    /// Rewrite a file with its saved content and attributes.
    RestoreContent {
        /// File to rewrite.
        path: PathBuf,
        /// Saved bytes.
        content: Vec<u8>,
        /// Saved modification time (unix ms).
        modified: Option<i64>,
        /// Saved access time (unix ms).
        accessed: Option<i64>,
        /// Saved permission bits.
        mode: Option<u32>,
    },
    /// Reapply saved permission bits.
    RestorePermissions {
        /// Target path.
        path: PathBuf,
        /// Saved mode.
        mode: u32,
    },
    /// Remove a directory the operation created (must be empty).
    DeleteDirectory {
        /// Directory to remove.
        path: PathBuf,
    },
}

impl RollbackAction {
    /// Path the action restores.
    pub fn path(&self) -> &Path {
        match self {
            Self::RestoreFile { path, .. }
            | Self::DeleteFile { path }
            | Self::RestoreContent { path, .. }
            | Self::RestorePermissions { path, .. }
            | Self::DeleteDirectory { path } => path,
        }
    }

    /// Applies the inverse step.
    pub fn undo(&self, fsync: bool) -> Result<()> {
        match self {
            Self::RestoreFile { path, from } => {
                if let Ok(meta) = fs::symlink_metadata(path) {
                    if meta.is_dir() {
                        return Err(GuardError::DestinationExists(path.clone()));
                    }
                    fs::remove_file(path).map_err(|e| GuardError::at(path, e))?;
                }
                relocate(from, path)
            }
            Self::DeleteFile { path } => match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(GuardError::at(path, e)),
            },
            Self::RestoreContent {
                path,
                content,
                modified,
                accessed,
                mode,
            } => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| GuardError::at(parent, e))?;
                }
                let staging = fsutil::partial_path(path, "rollback");
                write_staged(path, &staging, content, fsync)?;
                if let Some(mode) = mode {
                    set_mode(path, *mode)?;
                }
                set_times(path, *modified, *accessed)
            }
            Self::RestorePermissions { path, mode } => set_mode(path, *mode),
            Self::DeleteDirectory { path } => match fs::remove_dir(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(GuardError::at(path, e)),
            },
        }
    }
}

/// An atomic operation and everything needed to undo it.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicOperation {
    /// Operation ID.
    pub id: String,
    /// Kind (`Batch` for multi-step operations).
    pub kind: OperationKind,
    /// Unix ms when the operation was scheduled.
    pub timestamp: i64,
    /// Current status.
    pub status: OperationStatus,
    /// Steps in execution order.
    pub steps: Vec<BatchStep>,
    /// Number of steps that completed.
    pub completed_steps: usize,
    /// State of every touched path before execution.
    pub original_state: Vec<FileSnapshot>,
    /// State of every touched path after execution.
    pub target_state: Vec<FileSnapshot>,
    /// Inverse actions in execution order.
    pub rollback_actions: Vec<RollbackAction>,
    /// Options-derived metadata.
    pub metadata: OperationMetadata,
    /// Failure text, if any.
    pub error: Option<String>,
    /// Unix ms when a terminal status was reached.
    pub finished_at: Option<i64>,
}

impl AtomicOperation {
    /// Every distinct path touched by the steps, in first-use order.
    pub fn touched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for step in &self.steps {
            for p in step.paths() {
                if !paths.iter().any(|existing| existing == p) {
                    paths.push(p.to_path_buf());
                }
            }
        }
        paths
    }
}

/// Structured outcome returned by every public atomic operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    /// Whether the operation achieved its goal.
    pub success: bool,
    /// Operation ID (empty for housekeeping calls).
    pub operation_id: String,
    /// Steps applied (or undone, for rollbacks).
    pub steps_affected: usize,
    /// Wall time spent.
    pub duration: Duration,
    /// Success message.
    pub message: Option<String>,
    /// Failure text.
    pub error: Option<String>,
}

impl OperationResult {
    pub(crate) fn ok(id: &str, steps: usize, duration: Duration, message: impl Into<String>) -> Self {
        Self {
            success: true,
            operation_id: id.to_string(),
            steps_affected: steps,
            duration,
            message: Some(message.into()),
            error: None,
        }
    }

    pub(crate) fn fail(id: &str, steps: usize, duration: Duration, error: impl ToString) -> Self {
        Self {
            success: false,
            operation_id: id.to_string(),
            steps_affected: steps,
            duration,
            message: None,
            error: Some(error.to_string()),
        }
    }
}
