//! Collaborators shared by every component of one guard instance.

use crate::backup::BackupManager;
use crate::config::Config;
use crate::events::EventBus;
use crate::oplog::OperationLogger;
use crate::sidecar::SidecarStore;
use crate::Clock;
use std::path::{Path, PathBuf};

/// Shared handles owned by the composition root.
///
/// Components hold an `Arc<GuardContext>` instead of reaching for globals.
pub struct GuardContext {
    state_dir: PathBuf,
    session_id: String,
    clock: Clock,
    logger: OperationLogger,
    backups: BackupManager,
    events: EventBus,
    sidecars: SidecarStore,
}

impl GuardContext {
    /// Builds the shared handles for a state directory.
    pub fn new(state_dir: impl Into<PathBuf>, config: &Config, clock: Clock) -> Self {
        let state_dir = state_dir.into();
        let logger = if config.logging.enabled {
            OperationLogger::new(
                state_dir.join("logs"),
                config.logging.max_log_bytes,
                config.logging.max_rotated_logs,
                clock.clone(),
            )
        } else {
            OperationLogger::tracing_only(clock.clone())
        };

        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            backups: BackupManager::new(state_dir.join("backups"), clock.clone()),
            sidecars: SidecarStore::new(state_dir.join("locks")),
            events: EventBus::new(),
            logger,
            clock,
            state_dir,
        }
    }

    /// The `.fsguard` directory.
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Directory where displaced files are held until cleanup.
    pub fn hold_dir(&self) -> PathBuf {
        self.state_dir.join("hold")
    }

    /// Session ID stamped on sidecars written by this instance.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current time in unix milliseconds.
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Clock handle.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Operation logger.
    pub fn logger(&self) -> &OperationLogger {
        &self.logger
    }

    /// Backup facility.
    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Lock sidecar store.
    pub fn sidecars(&self) -> &SidecarStore {
        &self.sidecars
    }
}

impl std::fmt::Debug for GuardContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardContext")
            .field("state_dir", &self.state_dir)
            .field("session_id", &self.session_id)
            .finish()
    }
}
