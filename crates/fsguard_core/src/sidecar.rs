//! Lock sidecar records for in-flight operations.
//!
//! A sidecar is written before an operation mutates anything and removed
//! once it reaches a clean terminal state. A sidecar that outlives its
//! process is the primary signal that an operation was interrupted.

use crate::atomic::OperationKind;
use crate::error::{GuardError, Result};
use crate::fsutil::{fsync_dir, is_process_alive};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SIDECAR_SUFFIX: &str = ".lock.json";

/// Byte progress of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OperationProgress {
    /// Expected total bytes.
    pub total_size: u64,
    /// Bytes processed so far.
    pub processed_size: u64,
    /// `processed / total * 100` (100 when total is zero).
    pub percentage: f64,
}

impl OperationProgress {
    /// Builds a progress value, computing the percentage.
    pub fn new(total_size: u64, processed_size: u64) -> Self {
        let percentage = if total_size == 0 {
            100.0
        } else {
            (processed_size as f64 / total_size as f64 * 100.0).min(100.0)
        };
        Self {
            total_size,
            processed_size,
            percentage,
        }
    }
}

/// Whether the process named by a lock record can still act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerState {
    /// This process.
    Current,
    /// Another running process.
    Live,
    /// The process is gone; whatever it held is abandoned.
    Dead,
}

impl OwnerState {
    /// Classifies the owner `pid`.
    pub fn of(pid: u32) -> Self {
        if pid == std::process::id() {
            Self::Current
        } else if is_process_alive(pid) {
            Self::Live
        } else {
            Self::Dead
        }
    }
}

/// On-disk record of one in-flight operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSidecar {
    /// Atomic operation ID.
    pub operation_id: String,
    /// Operation kind.
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Source path (move/copy).
    #[serde(default)]
    pub source: Option<PathBuf>,
    /// Target path.
    #[serde(default)]
    pub target: Option<PathBuf>,
    /// Progress at the last update.
    #[serde(default)]
    pub progress: OperationProgress,
    /// Owning process.
    pub process_id: u32,
    /// Owning session.
    pub session_id: String,
    /// Staging files that may hold partial output.
    #[serde(default)]
    pub temp_files: Vec<PathBuf>,
    /// Unix ms when the sidecar was first written.
    pub created_at: i64,
    /// Unix ms of the last update.
    #[serde(default)]
    pub updated_at: i64,
}

impl LockSidecar {
    /// Liveness of the process that wrote this sidecar.
    pub fn owner(&self) -> OwnerState {
        OwnerState::of(self.process_id)
    }
}

/// Directory of lock sidecars (`.fsguard/locks/`).
#[derive(Debug, Clone)]
pub struct SidecarStore {
    dir: PathBuf,
}

impl SidecarStore {
    /// Creates a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Sidecar directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the sidecar for an operation.
    pub fn path_for(&self, operation_id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", operation_id, SIDECAR_SUFFIX))
    }

    /// Writes (or replaces) a sidecar atomically.
    pub fn write(&self, sidecar: &LockSidecar) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| GuardError::at(&self.dir, e))?;

        let path = self.path_for(&sidecar.operation_id);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(sidecar)
            .map_err(|e| GuardError::Serialization(e.to_string()))?;

        {
            let mut file = File::create(&tmp).map_err(|e| GuardError::at(&tmp, e))?;
            file.write_all(&data).map_err(|e| GuardError::at(&tmp, e))?;
            file.sync_all().map_err(|e| GuardError::at(&tmp, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| GuardError::at(&path, e))?;
        fsync_dir(&self.dir);

        Ok(path)
    }

    /// Reads the sidecar of an operation, if present.
    pub fn load(&self, operation_id: &str) -> Result<Option<LockSidecar>> {
        let path = self.path_for(operation_id);
        match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| GuardError::Deserialization(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GuardError::at(&path, e)),
        }
    }

    /// Updates the recorded progress of an operation.
    pub fn update_progress(&self, operation_id: &str, progress: OperationProgress, now: i64) -> Result<()> {
        if let Some(mut sidecar) = self.load(operation_id)? {
            sidecar.progress = progress;
            sidecar.updated_at = now;
            self.write(&sidecar)?;
        }
        Ok(())
    }

    /// Deletes the sidecar of an operation. Missing sidecars are not an error.
    pub fn remove(&self, operation_id: &str) -> Result<()> {
        let path = self.path_for(operation_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(operation_id = %operation_id, "Sidecar removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GuardError::at(&path, e)),
        }
    }

    /// All readable sidecars. Malformed files are skipped with a warning.
    pub fn list(&self) -> Result<Vec<LockSidecar>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GuardError::at(&self.dir, e)),
        };

        let mut sidecars = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_sidecar = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(SIDECAR_SUFFIX))
                .unwrap_or(false);
            if !is_sidecar {
                continue;
            }

            match fs::read(&path).map(|data| serde_json::from_slice::<LockSidecar>(&data)) {
                Ok(Ok(sidecar)) => sidecars.push(sidecar),
                Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Skipping malformed sidecar"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to read sidecar"),
            }
        }

        sidecars.sort_by_key(|s| s.created_at);
        Ok(sidecars)
    }
}
