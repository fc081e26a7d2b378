//! fsguard Core Library
//!
//! A safety layer for local file-system mutations, providing:
//! - Atomic single and batched operations with LIFO rollback
//! - Advisory per-path locking with conflict detection and resolution
//! - Checksum-based integrity records and corruption detection
//! - Discovery and recovery of operations interrupted by a crash
//!
//! # Quick Start
//!
//! ```
//! use fsguard_core::Guard;
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let guard = Guard::init(tmp.path()).unwrap();
//!
//! let target = tmp.path().join("notes.txt");
//! let result = guard.atomic().atomic_write(&target, b"hello", Default::default());
//! assert!(result.success);
//! assert_eq!(std::fs::read(&target).unwrap(), b"hello");
//! ```
//!
//! # Components
//!
//! ## Atomic operations
//!
//! Every step records a rollback action right after it succeeds. A failing
//! batch undoes the completed steps in reverse order:
//!
//! ```
//! use fsguard_core::{BatchStep, Guard, OperationOptions};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let guard = Guard::init(tmp.path()).unwrap();
//!
//! let a = tmp.path().join("a.txt");
//! let steps = vec![
//!     BatchStep::write(&a, b"first".to_vec()),
//!     BatchStep::delete(tmp.path().join("missing.txt")),
//! ];
//! let result = guard.atomic().atomic_batch(steps, OperationOptions::default());
//! assert!(!result.success);
//! assert!(!a.exists());
//! ```
//!
//! ## Integrity records
//!
//! ```
//! use fsguard_core::Guard;
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let guard = Guard::init(tmp.path()).unwrap();
//! let file = tmp.path().join("data.bin");
//! std::fs::write(&file, vec![7u8; 1000]).unwrap();
//!
//! guard.integrity().create_integrity_record(&file, Default::default()).unwrap();
//! assert!(guard.integrity().verify_file(&file).success);
//! ```

mod atomic;
mod backup;
mod checksum;
mod config;
mod conflict;
mod context;
mod error;
mod events;
mod fsutil;
mod guard;
mod integrity;
mod monitor;
mod oplog;
mod recovery;
mod sidecar;
mod statelock;

pub use atomic::{
    AtomicManager, AtomicOperation, BatchStep, FileSnapshot, OperationKind, OperationMetadata,
    OperationOptions, OperationResult, OperationStatus, RollbackAction,
};
pub use backup::{BackupEntry, BackupManager};
pub use checksum::{checksum_bytes, checksum_file, ChecksumAlgorithm};
pub use config::{
    AtomicConfig, BackupConfig, Config, ConflictConfig, IntegrityConfig, LoggingConfig,
    MonitoringConfig, RecoveryConfig, RegistryBackend,
};
pub use conflict::{
    assess_severity, default_strategy, operations_conflict, ConflictClaim, ConflictContext,
    ConflictKind, ConflictResolution, ConflictResolver, ConflictSeverity, ConflictStats,
    ConflictStatus, FileConflict, LockClaim, LockOperation, ResolutionResult,
    ResolutionStrategy,
};
pub use context::GuardContext;
pub use error::{GuardError, Result};
pub use events::{EventBus, GuardEvent};
pub use fsutil::{is_partial, partial_path, partial_target, PARTIAL_SUFFIX};
pub use guard::{Guard, STATE_DIR};
pub use integrity::{
    CorruptionInfo, CorruptionKind, IntegrityRecord, IntegrityReport, IntegrityStats,
    IntegrityVerifier, JsonRegistry, RecordOptions, RedbRegistry, RegistryStore,
    VerificationResult,
};
pub use monitor::{spawn_monitor, MonitorHandle};
pub use oplog::{
    LogOptions, LogRecord, LogStatus, OperationLogEntry, OperationLogger, SecurityLogEntry,
};
pub use recovery::{
    InterruptedMetadata, InterruptedOperation, InterruptedStatus, InterruptionDetector,
    InterruptionSource, RecoveryManager, RecoveryPlan, RecoveryResult, RecoveryStats,
    RecoveryStrategy, RiskLevel,
};
pub use sidecar::{LockSidecar, OperationProgress, OwnerState, SidecarStore};
pub use statelock::{StateLockRecord, LOCK_FILE};

use std::sync::Arc;

/// Time provider trait for testing.
///
/// Allows injecting controlled time so that age-dependent behavior
/// (recovery windows, history cleanup, backup pruning) can be tested.
pub trait TimeProvider: Send + Sync {
    /// Returns the current Unix timestamp in milliseconds.
    fn now_millis(&self) -> i64;
}

impl<F> TimeProvider for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now_millis(&self) -> i64 {
        self()
    }
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeProvider for SystemClock {
    fn now_millis(&self) -> i64 {
        fsutil::system_time_millis(std::time::SystemTime::now())
    }
}

/// Shared clock handle used by every component.
pub type Clock = Arc<dyn TimeProvider>;

/// Returns a clock backed by the system time.
pub fn system_clock() -> Clock {
    Arc::new(SystemClock)
}
