//! Guard handle wiring the four components to one state directory.

use crate::atomic::AtomicManager;
use crate::config::Config;
use crate::conflict::ConflictResolver;
use crate::context::GuardContext;
use crate::error::{GuardError, Result};
use crate::events::EventBus;
use crate::integrity::IntegrityVerifier;
use crate::monitor::{spawn_monitor, MonitorHandle};
use crate::recovery::RecoveryManager;
use crate::statelock::StateLock;
use crate::{system_clock, Clock};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Name of the state directory inside a guarded root.
pub const STATE_DIR: &str = ".fsguard";

/// fsguard handle for one root directory.
///
/// Holds the state directory's `LOCK` for its whole lifetime, so only one
/// guard per root is live at a time.
pub struct Guard {
    root: PathBuf,
    config: Config,
    ctx: Arc<GuardContext>,
    atomic: Arc<AtomicManager>,
    conflicts: Arc<ConflictResolver>,
    integrity: Arc<IntegrityVerifier>,
    recovery: Arc<RecoveryManager>,
    monitors: Mutex<Vec<MonitorHandle>>,
    lock: StateLock,
}

impl Guard {
    /// Creates the state directory under `root` with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::AlreadyInitialized`] if `.fsguard` exists.
    pub fn init(root: impl AsRef<Path>) -> Result<Self> {
        Self::init_with(root, Config::default(), system_clock())
    }

    /// Creates the state directory with an explicit configuration and clock.
    pub fn init_with(root: impl AsRef<Path>, config: Config, clock: Clock) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let state_dir = root.join(STATE_DIR);

        if state_dir.exists() {
            return Err(GuardError::AlreadyInitialized(root));
        }

        for sub in ["locks", "hold", "backups", "logs"] {
            let dir = state_dir.join(sub);
            fs::create_dir_all(&dir).map_err(|e| GuardError::at(&dir, e))?;
        }
        config.save(&state_dir)?;

        let gitignore = r#"# fsguard transient state
LOCK
locks/
hold/
*.tmp
"#;
        let path = state_dir.join(".gitignore");
        fs::write(&path, gitignore).map_err(|e| GuardError::at(&path, e))?;

        info!(root = %root.display(), "Initialized fsguard state");
        Self::build(root, config, clock)
    }

    /// Opens an existing state directory under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::NotInitialized`] if `.fsguard` is missing, or
    /// [`GuardError::StateLocked`] if a live process holds it.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_clock(root, system_clock())
    }

    /// Opens an existing state directory with a custom time provider.
    ///
    /// Lets tests control the clock behind recovery windows, history
    /// cleanup and backup pruning.
    pub fn open_with_clock(root: impl AsRef<Path>, clock: Clock) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let state_dir = root.join(STATE_DIR);
        if !state_dir.is_dir() {
            return Err(GuardError::NotInitialized(root));
        }
        let config = Config::load(&state_dir)?;
        Self::build(root, config, clock)
    }

    fn build(root: PathBuf, config: Config, clock: Clock) -> Result<Self> {
        let state_dir = root.join(STATE_DIR);
        let ctx = Arc::new(GuardContext::new(&state_dir, &config, clock));
        let lock = StateLock::acquire(&state_dir, ctx.session_id(), ctx.now_millis())?;

        let atomic = Arc::new(AtomicManager::new(config.atomic.clone(), ctx.clone()));
        let conflicts = Arc::new(ConflictResolver::new(config.conflict.clone(), ctx.clone()));
        let integrity = Arc::new(IntegrityVerifier::open(config.integrity.clone(), ctx.clone())?);
        let recovery = Arc::new(RecoveryManager::new(
            config.recovery.clone(),
            ctx.clone(),
            atomic.clone(),
        ));

        debug!(root = %root.display(), session = %ctx.session_id(), "Opened guard");
        Ok(Self {
            root,
            config,
            ctx,
            atomic,
            conflicts,
            integrity,
            recovery,
            monitors: Mutex::new(Vec::new()),
            lock,
        })
    }

    /// Loads persisted state, prunes old backups, runs the startup recovery
    /// scan and starts the monitors, each as configured.
    pub fn initialize(&self) -> Result<()> {
        let records = self.integrity.load()?;
        debug!(records = records, "Integrity registry loaded");

        match self.ctx.backups().prune(self.config.backup.max_age()) {
            Ok(0) => {}
            Ok(pruned) => info!(pruned = pruned, "Pruned old backups"),
            Err(e) => warn!(error = %e, "Failed to prune backups"),
        }

        if self.config.recovery.scan_on_startup {
            let found = self.recovery.scan_for_interrupted_operations()?;
            if !found.is_empty() {
                warn!(count = found.len(), "Interrupted operations found at startup");
            }
        }

        if self.config.monitoring.enabled {
            self.start_monitors()?;
        }
        Ok(())
    }

    /// Stops the monitors, waits for their threads and flushes the
    /// integrity registry.
    pub fn dispose(&self) {
        {
            let mut monitors = match self.monitors.lock() {
                Ok(m) => m,
                Err(poisoned) => poisoned.into_inner(),
            };
            for monitor in monitors.iter_mut() {
                monitor.stop();
            }
            if !monitors.is_empty() {
                debug!(count = monitors.len(), "Monitors stopped");
            }
            monitors.clear();
        }

        if let Err(e) = self.integrity.flush() {
            warn!(error = %e, "Failed to flush integrity registry");
        }
    }

    /// Starts the conflict, integrity and recovery monitors.
    ///
    /// Calling it again while monitors run is a no-op.
    pub fn start_monitors(&self) -> Result<()> {
        let mut monitors = self
            .monitors
            .lock()
            .map_err(|_| GuardError::StatePoisoned("monitor list"))?;
        if !monitors.is_empty() {
            return Ok(());
        }

        let conflicts = self.conflicts.clone();
        let auto_resolve = self.config.conflict.auto_resolve;
        monitors.push(spawn_monitor(
            "conflicts",
            self.config.conflict.detection_interval(),
            move || {
                let found = conflicts.scan_locked_paths();
                if auto_resolve && !found.is_empty() {
                    conflicts.auto_resolve_conflicts();
                }
            },
        )?);

        let integrity = self.integrity.clone();
        monitors.push(spawn_monitor(
            "integrity",
            self.integrity.sweep_interval(),
            move || {
                let report = integrity.verify_all();
                if report.has_issues() {
                    warn!(summary = %report.summary(), "Integrity sweep found issues");
                }
            },
        )?);

        let recovery = self.recovery.clone();
        monitors.push(spawn_monitor(
            "recovery",
            self.config.recovery.scan_interval(),
            move || match recovery.scan_for_interrupted_operations() {
                Ok(found) if !found.is_empty() && recovery.auto_recover() => {
                    recovery.recover_all_operations();
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Recovery scan failed"),
            },
        )?);

        info!(count = monitors.len(), "Monitors started");
        Ok(())
    }

    /// Names of the running monitors.
    pub fn monitor_names(&self) -> Vec<String> {
        self.monitors
            .lock()
            .map(|m| {
                m.iter()
                    .filter(|h| h.is_running())
                    .map(|h| h.name().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The guarded root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `.fsguard` directory.
    pub fn state_dir(&self) -> &Path {
        self.ctx.state_dir()
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared context (logger, backups, sidecars, clock).
    pub fn ctx(&self) -> &Arc<GuardContext> {
        &self.ctx
    }

    /// Event bus.
    pub fn events(&self) -> &EventBus {
        self.ctx.events()
    }

    /// Atomic Operation Manager.
    pub fn atomic(&self) -> &AtomicManager {
        &self.atomic
    }

    /// Conflict Resolver.
    pub fn conflicts(&self) -> &ConflictResolver {
        &self.conflicts
    }

    /// Data Integrity Verifier.
    pub fn integrity(&self) -> &IntegrityVerifier {
        &self.integrity
    }

    /// Interrupted Operation Recovery.
    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard")
            .field("root", &self.root)
            .field("session", &self.ctx.session_id())
            .field("pid", &self.lock.record().process_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::statelock::{StateLockRecord, LOCK_FILE};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let guard = Guard::init(tmp.path()).unwrap();

        let state = tmp.path().join(STATE_DIR);
        assert_eq!(guard.state_dir(), state.as_path());
        for sub in ["locks", "hold", "backups", "logs"] {
            assert!(state.join(sub).is_dir(), "{}", sub);
        }
        assert!(state.join("config.toml").is_file());
        assert!(state.join(LOCK_FILE).is_file());
    }

    #[test]
    fn test_init_twice_fails() {
        let tmp = TempDir::new().unwrap();
        drop(Guard::init(tmp.path()).unwrap());
        assert!(matches!(
            Guard::init(tmp.path()),
            Err(GuardError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_open_requires_init() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            Guard::open(tmp.path()),
            Err(GuardError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_lock_held_while_open() {
        let tmp = TempDir::new().unwrap();
        let guard = Guard::init(tmp.path()).unwrap();

        let err = Guard::open(tmp.path()).unwrap_err();
        assert!(matches!(err, GuardError::StateLocked { pid } if pid == std::process::id()));

        drop(guard);
        assert!(!tmp.path().join(STATE_DIR).join(LOCK_FILE).exists());
        Guard::open(tmp.path()).unwrap();
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        drop(Guard::init(tmp.path()).unwrap());

        let lock = tmp.path().join(STATE_DIR).join(LOCK_FILE);
        #[cfg(unix)]
        {
            StateLockRecord {
                process_id: u32::MAX - 1,
                session_id: "crashed".into(),
                acquired_at: 0,
            }
            .write(&lock)
            .unwrap();
            let guard = Guard::open(tmp.path()).unwrap();
            let record = StateLockRecord::read(&lock).unwrap().unwrap();
            assert_eq!(record.process_id, std::process::id());
            assert_eq!(record.session_id, guard.ctx().session_id());
        }

        fs::write(&lock, "garbage").unwrap();
        Guard::open(tmp.path()).unwrap();
    }

    #[test]
    fn test_config_round_trips_through_open() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.atomic.history_limit = 7;
        drop(Guard::init_with(tmp.path(), config, system_clock()).unwrap());

        let guard = Guard::open(tmp.path()).unwrap();
        assert_eq!(guard.config().atomic.history_limit, 7);
    }

    #[test]
    fn test_monitors_start_and_stop() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.monitoring.enabled = true;
        config.conflict.detection_interval_secs = 3600;
        let guard = Guard::init_with(tmp.path(), config, system_clock()).unwrap();
        guard.initialize().unwrap();

        let mut names = guard.monitor_names();
        names.sort();
        assert_eq!(names, vec!["conflicts", "integrity", "recovery"]);

        // Idempotent
        guard.start_monitors().unwrap();
        assert_eq!(guard.monitor_names().len(), 3);

        guard.dispose();
        assert!(guard.monitor_names().is_empty());
    }

    #[test]
    fn test_records_persist_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("kept.txt");
        fs::write(&file, b"kept").unwrap();
        {
            let guard = Guard::init(tmp.path()).unwrap();
            guard
                .integrity()
                .create_integrity_record(&file, Default::default())
                .unwrap();
        }

        let guard = Guard::open(tmp.path()).unwrap();
        assert!(guard.integrity().get_record(&file).is_some());
        assert!(guard.integrity().verify_file(&file).success);
    }

    #[test]
    fn test_initialize_reports_interrupted_operations() {
        let tmp = TempDir::new().unwrap();
        drop(Guard::init(tmp.path()).unwrap());
        let orphan = tmp.path().join(".data.txt.0badf00d.partial");
        fs::write(&orphan, b"half").unwrap();

        let guard = Guard::open(tmp.path()).unwrap();
        let rx = guard.events().subscribe();
        guard.initialize().unwrap();

        let ops = guard.recovery().list_operations();
        assert_eq!(ops.len(), 1);
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
    }
}
