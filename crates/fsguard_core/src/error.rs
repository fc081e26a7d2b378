//! Error types for fsguard_core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for fsguard_core operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error tied to a specific path.
    #[error("I/O error at {}: {}", path.display(), source)]
    PathIo {
        /// Path that was being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Atomic operation with the given ID is unknown.
    #[error("operation not found: {0}")]
    OperationNotFound(String),

    /// Operation is in a state that does not allow the requested action.
    #[error("operation {id} is {status}, cannot {action}")]
    InvalidOperationState {
        /// Operation ID
        id: String,
        /// Current status
        status: String,
        /// Requested action
        action: String,
    },

    /// Operation was already rolled back.
    #[error("operation already rolled back: {0}")]
    AlreadyRolledBack(String),

    /// A batch step failed.
    #[error("step {index} ({kind}) failed: {reason}")]
    StepFailed {
        /// Zero-based step index
        index: usize,
        /// Step kind
        kind: String,
        /// Failure description
        reason: String,
    },

    /// Source path for a move/copy does not exist.
    #[error("source does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    /// Destination exists and overwriting was not requested.
    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    /// One or more rollback actions failed.
    #[error("rollback of {id} incomplete: {failures} action(s) failed")]
    RollbackIncomplete {
        /// Operation ID
        id: String,
        /// Number of failed rollback actions
        failures: usize,
    },

    /// Conflict with the given ID is unknown.
    #[error("conflict not found: {0}")]
    ConflictNotFound(String),

    /// No integrity record exists for the path.
    #[error("no integrity record for {}", .0.display())]
    RecordNotFound(PathBuf),

    /// Interrupted operation with the given ID is unknown.
    #[error("interrupted operation not found: {0}")]
    InterruptedNotFound(String),

    /// Backup could not be created or restored.
    #[error("backup failed for {}: {}", path.display(), reason)]
    BackupFailed {
        /// File being backed up
        path: PathBuf,
        /// Failure description
        reason: String,
    },

    /// Serialization error for persisted records.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error for persisted records.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Integrity registry store failure.
    #[error("integrity registry error: {0}")]
    Registry(String),

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A component's in-memory state lock was poisoned by a panicking thread.
    #[error("{0} state poisoned")]
    StatePoisoned(&'static str),

    /// Directory is not an fsguard root.
    #[error("not an fsguard root: {}", .0.display())]
    NotInitialized(PathBuf),

    /// fsguard state already exists in the directory.
    #[error("fsguard already initialized at {}", .0.display())]
    AlreadyInitialized(PathBuf),

    /// The state directory is locked by another live process.
    #[error("state directory locked by another process (PID: {pid})")]
    StateLocked {
        /// Process ID holding the lock
        pid: u32,
    },
}

impl GuardError {
    pub(crate) fn at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PathIo {
            path: path.into(),
            source,
        }
    }

    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::RollbackIncomplete { .. } => Some(
                "Some files could not be restored. Run 'fsguard recovery scan' and inspect .fsguard/hold.",
            ),
            Self::RecordNotFound(_) => {
                Some("Create a record first with 'fsguard integrity scan <dir>'.")
            }
            Self::Registry(_) => {
                Some("The integrity registry may be damaged. Remove it and rescan the directory.")
            }
            Self::NotInitialized(_) => Some("Run 'fsguard init' in the project root."),
            Self::AlreadyInitialized(_) => Some("Use the existing state or remove .fsguard first."),
            Self::StateLocked { .. } => Some(
                "Wait for the other process to finish, or remove .fsguard/LOCK if the process is dead.",
            ),
            Self::InterruptedNotFound(_) => {
                Some("Run 'fsguard recovery scan' to refresh the list of interrupted operations.")
            }
            Self::BackupFailed { .. } => Some("Check free disk space and permissions on .fsguard/backups."),
            Self::StatePoisoned(_) => Some(
                "A background task panicked. Restart the process; interrupted work is picked up by 'fsguard recovery scan'.",
            ),
            _ => None,
        }
    }
}


/// Convenience Result type for fsguard_core operations.
pub type Result<T> = std::result::Result<T, GuardError>;
