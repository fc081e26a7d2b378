//! Configuration types for the fsguard safety layer.

use crate::checksum::ChecksumAlgorithm;
use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the configuration inside the state directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Comprehensive configuration for an fsguard root.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Atomic operation manager configuration.
    #[serde(default)]
    pub atomic: AtomicConfig,

    /// Conflict resolver configuration.
    #[serde(default)]
    pub conflict: ConflictConfig,

    /// Integrity verifier configuration.
    #[serde(default)]
    pub integrity: IntegrityConfig,

    /// Interrupted operation recovery configuration.
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Operation log configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Backup facility configuration.
    #[serde(default)]
    pub backup: BackupConfig,

    /// Background monitor configuration.
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Config {
    /// Load configuration from the state directory.
    ///
    /// A missing file yields the defaults.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(CONFIG_FILE);
        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| GuardError::ConfigError(format!("failed to read config: {}", e)))?;
            toml::from_str(&content)
                .map_err(|e| GuardError::ConfigError(format!("failed to parse config: {}", e)))
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to the state directory.
    pub fn save(&self, state_dir: &Path) -> Result<()> {
        let path = state_dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)
            .map_err(|e| GuardError::ConfigError(format!("failed to serialize config: {}", e)))?;
        fs::write(&path, content)
            .map_err(|e| GuardError::ConfigError(format!("failed to write config: {}", e)))?;
        Ok(())
    }
}

/// Atomic operation manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicConfig {
    /// Number of finished operations kept in the history ring (default: 100).
    pub history_limit: usize,

    /// Advisory per-operation timeout in seconds (default: 300).
    pub default_timeout_secs: u64,

    /// fsync staged files and parent directories (default: true).
    pub fsync: bool,

    /// Snapshot files to the backup store before destructive steps (default: false).
    pub backup_by_default: bool,
}

impl Default for AtomicConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            default_timeout_secs: 300,
            fsync: true,
            backup_by_default: false,
        }
    }
}

impl AtomicConfig {
    /// Returns the default timeout as a Duration.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

/// Conflict resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Interval between background re-scans of locked paths (default: 30).
    pub detection_interval_secs: u64,

    /// Attempt resolution inline when a lock request collides (default: true).
    pub resolve_on_acquire: bool,

    /// Enable automatic resolution from the background scan (default: true).
    pub auto_resolve: bool,

    /// Also auto-resolve high and critical conflicts (default: false).
    pub aggressive: bool,

    /// Resolved conflicts kept for statistics (default: 500).
    pub resolved_history_limit: usize,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            detection_interval_secs: 30,
            resolve_on_acquire: true,
            auto_resolve: true,
            aggressive: false,
            resolved_history_limit: 500,
        }
    }
}

impl ConflictConfig {
    /// Returns the detection interval as a Duration.
    pub fn detection_interval(&self) -> Duration {
        Duration::from_secs(self.detection_interval_secs)
    }
}

/// Where integrity records are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegistryBackend {
    /// Flat JSON array file.
    #[default]
    Json,
    /// Embedded redb database.
    Redb,
}

/// Integrity verifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityConfig {
    /// Default checksum algorithm for new records (default: blake3).
    pub algorithm: ChecksumAlgorithm,

    /// Files larger than this are skipped during verification (default: 100 MB).
    pub large_file_threshold_bytes: u64,

    /// Whether the large-file skip policy is active (default: true).
    pub skip_large_files: bool,

    /// Verify multiple files concurrently (default: true).
    pub parallel: bool,

    /// Upper bound on concurrent verifications (default: 4).
    pub max_parallel_verifications: usize,

    /// Interval between background verification sweeps (default: 3600).
    pub sweep_interval_secs: u64,

    /// Registry storage backend (default: json).
    pub registry_backend: RegistryBackend,

    /// Directory and file names skipped by scans.
    pub exclude: Vec<String>,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            algorithm: ChecksumAlgorithm::default(),
            large_file_threshold_bytes: 100 * 1024 * 1024,
            skip_large_files: true,
            parallel: true,
            max_parallel_verifications: 4,
            sweep_interval_secs: 3600,
            registry_backend: RegistryBackend::default(),
            exclude: vec![
                ".git".to_string(),
                ".fsguard".to_string(),
                "target".to_string(),
                "node_modules".to_string(),
            ],
        }
    }
}

impl IntegrityConfig {
    /// Returns the sweep interval as a Duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Interrupted operation recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Sidecars older than this lose confidence (default: 24).
    pub max_recovery_window_hours: u64,

    /// Scan for interrupted operations when the guard initializes (default: true).
    pub scan_on_startup: bool,

    /// Recover recoverable operations from the background scan (default: false).
    pub auto_recover: bool,

    /// Interval between background recovery scans (default: 300).
    pub scan_interval_secs: u64,

    /// Assumed copy throughput used for time estimates (default: 50 MB/s).
    pub assumed_throughput_bytes_per_sec: u64,

    /// Extra directories searched for orphaned partial files.
    /// The guarded root is always searched.
    pub scan_roots: Vec<PathBuf>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_recovery_window_hours: 24,
            scan_on_startup: true,
            auto_recover: false,
            scan_interval_secs: 300,
            assumed_throughput_bytes_per_sec: 50 * 1024 * 1024,
            scan_roots: Vec::new(),
        }
    }
}

impl RecoveryConfig {
    /// Returns the recovery window as a Duration.
    pub fn max_recovery_window(&self) -> Duration {
        Duration::from_secs(self.max_recovery_window_hours.saturating_mul(60 * 60))
    }

    /// Returns the scan interval as a Duration.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

/// Operation log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Write the JSON-lines audit log (default: true).
    pub enabled: bool,

    /// Rotate the log once it grows past this size (default: 10 MB).
    pub max_log_bytes: u64,

    /// Number of rotated files kept (default: 5).
    pub max_rotated_logs: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_log_bytes: 10 * 1024 * 1024,
            max_rotated_logs: 5,
        }
    }
}

/// Backup facility configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Backups older than this are pruned by cleanup (default: 7).
    pub max_age_days: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self { max_age_days: 7 }
    }
}

impl BackupConfig {
    /// Returns the maximum backup age as a Duration.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days.saturating_mul(24 * 60 * 60))
    }
}

/// Background monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MonitoringConfig {
    /// Start conflict, integrity and recovery monitors on initialize (default: false).
    pub enabled: bool,
}
