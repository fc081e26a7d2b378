//! Backup snapshots taken before destructive steps.
//!
//! Backups are plain file copies under `.fsguard/backups/`, indexed by an
//! append-only `manifest.jsonl`.

use crate::error::{GuardError, Result};
use crate::fsutil::{absolutize, fsync_dir, millis_before};
use crate::Clock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

const MANIFEST_FILE: &str = "manifest.jsonl";

/// One backup in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Backup ID.
    pub id: String,
    /// Absolute path of the file that was backed up.
    pub original: PathBuf,
    /// Location of the copy.
    pub backup: PathBuf,
    /// Why the backup was taken.
    pub reason: String,
    /// Size in bytes.
    pub size: u64,
    /// Unix ms creation time.
    pub created_at: i64,
}

/// Creates and indexes backup copies.
pub struct BackupManager {
    dir: PathBuf,
    clock: Clock,
    manifest_lock: Mutex<()>,
}

impl BackupManager {
    /// Creates a manager storing backups in `dir`.
    pub fn new(dir: impl Into<PathBuf>, clock: Clock) -> Self {
        Self {
            dir: dir.into(),
            clock,
            manifest_lock: Mutex::new(()),
        }
    }

    /// Backup directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copies `path` into the backup directory and returns the copy's path.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::BackupFailed`] if `path` is not a regular file
    /// or the copy fails.
    pub fn create_backup(&self, path: &Path, reason: &str) -> Result<PathBuf> {
        let original = absolutize(path);
        let meta = fs::metadata(&original).map_err(|e| GuardError::BackupFailed {
            path: original.clone(),
            reason: e.to_string(),
        })?;
        if !meta.is_file() {
            return Err(GuardError::BackupFailed {
                path: original,
                reason: "not a regular file".to_string(),
            });
        }

        fs::create_dir_all(&self.dir).map_err(|e| GuardError::at(&self.dir, e))?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = self.clock.now_millis();
        let name = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let backup = self.dir.join(format!("{}.{}.{}.bak", name, now, &id[..8]));

        let size = fs::copy(&original, &backup).map_err(|e| GuardError::BackupFailed {
            path: original.clone(),
            reason: e.to_string(),
        })?;

        let entry = BackupEntry {
            id,
            original: original.clone(),
            backup: backup.clone(),
            reason: reason.to_string(),
            size,
            created_at: now,
        };
        self.append_manifest(&entry)?;

        debug!(path = %original.display(), backup = %backup.display(), reason = %reason, "Backup created");
        Ok(backup)
    }

    /// Backups of `path` that still exist, oldest first.
    pub fn list_backups(&self, path: &Path) -> Result<Vec<BackupEntry>> {
        let original = absolutize(path);
        Ok(self
            .read_manifest()?
            .into_iter()
            .filter(|e| e.original == original && e.backup.exists())
            .collect())
    }

    /// Most recent surviving backup of `path`.
    pub fn latest_backup(&self, path: &Path) -> Result<Option<BackupEntry>> {
        Ok(self
            .list_backups(path)?
            .into_iter()
            .max_by_key(|e| e.created_at))
    }

    /// All manifest entries.
    pub fn all_backups(&self) -> Result<Vec<BackupEntry>> {
        self.read_manifest()
    }

    /// Deletes backups older than `max_age` and rewrites the manifest.
    ///
    /// Returns the number of backups removed.
    pub fn prune(&self, max_age: Duration) -> Result<usize> {
        let _guard = self
            .manifest_lock
            .lock()
            .map_err(|_| GuardError::StatePoisoned("backup manifest"))?;

        let cutoff = millis_before(self.clock.now_millis(), max_age);
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .read_manifest_unlocked()?
            .into_iter()
            .partition(|e| e.created_at < cutoff);

        for entry in &expired {
            if let Err(e) = fs::remove_file(&entry.backup) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(backup = %entry.backup.display(), error = %e, "Failed to remove expired backup");
                }
            }
        }

        self.rewrite_manifest(&kept)?;
        if !expired.is_empty() {
            info!(removed = expired.len(), "Pruned expired backups");
        }
        Ok(expired.len())
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    fn append_manifest(&self, entry: &BackupEntry) -> Result<()> {
        let _guard = self
            .manifest_lock
            .lock()
            .map_err(|_| GuardError::StatePoisoned("backup manifest"))?;

        let mut line =
            serde_json::to_string(entry).map_err(|e| GuardError::Serialization(e.to_string()))?;
        line.push('\n');

        let path = self.manifest_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| GuardError::at(&path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| GuardError::at(&path, e))?;
        Ok(())
    }

    fn read_manifest(&self) -> Result<Vec<BackupEntry>> {
        let _guard = self
            .manifest_lock
            .lock()
            .map_err(|_| GuardError::StatePoisoned("backup manifest"))?;
        self.read_manifest_unlocked()
    }

    fn read_manifest_unlocked(&self) -> Result<Vec<BackupEntry>> {
        let path = self.manifest_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GuardError::at(&path, e)),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| GuardError::at(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BackupEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "Skipping malformed backup manifest line"),
            }
        }
        Ok(entries)
    }

    fn rewrite_manifest(&self, entries: &[BackupEntry]) -> Result<()> {
        let path = self.manifest_path();
        let tmp = self.dir.join(format!("{}.tmp", MANIFEST_FILE));

        let mut out = String::new();
        for entry in entries {
            out.push_str(
                &serde_json::to_string(entry).map_err(|e| GuardError::Serialization(e.to_string()))?,
            );
            out.push('\n');
        }

        {
            let mut file = File::create(&tmp).map_err(|e| GuardError::at(&tmp, e))?;
            file.write_all(out.as_bytes())
                .map_err(|e| GuardError::at(&tmp, e))?;
            file.sync_all().map_err(|e| GuardError::at(&tmp, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| GuardError::at(&path, e))?;
        fsync_dir(&self.dir);
        Ok(())
    }
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager").field("dir", &self.dir).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn manual_clock(start: i64) -> (Arc<AtomicI64>, Clock) {
        let now = Arc::new(AtomicI64::new(start));
        let n = now.clone();
        (now, Arc::new(move || n.load(Ordering::SeqCst)))
    }

    #[test]
    fn test_backup_copies_content() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("config.toml");
        fs::write(&file, b"key = 1").unwrap();

        let (_, clock) = manual_clock(1_000);
        let backups = BackupManager::new(tmp.path().join("backups"), clock);
        let copy = backups.create_backup(&file, "test").unwrap();

        assert_eq!(fs::read(&copy).unwrap(), b"key = 1");
        let latest = backups.latest_backup(&file).unwrap().unwrap();
        assert_eq!(latest.backup, copy);
        assert_eq!(latest.reason, "test");
    }

    #[test]
    fn test_backup_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let (_, clock) = manual_clock(0);
        let backups = BackupManager::new(tmp.path().join("backups"), clock);
        let result = backups.create_backup(&tmp.path().join("nope"), "test");
        assert!(matches!(result, Err(GuardError::BackupFailed { .. })));
    }

    #[test]
    fn test_latest_of_several() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        let (now, clock) = manual_clock(1_000);
        let backups = BackupManager::new(tmp.path().join("backups"), clock);

        fs::write(&file, b"v1").unwrap();
        backups.create_backup(&file, "first").unwrap();
        now.store(2_000, Ordering::SeqCst);
        fs::write(&file, b"v2").unwrap();
        let second = backups.create_backup(&file, "second").unwrap();

        assert_eq!(backups.list_backups(&file).unwrap().len(), 2);
        assert_eq!(backups.latest_backup(&file).unwrap().unwrap().backup, second);
    }

    #[test]
    fn test_prune_removes_old() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        fs::write(&file, b"x").unwrap();
        let (now, clock) = manual_clock(0);
        let backups = BackupManager::new(tmp.path().join("backups"), clock);

        let old = backups.create_backup(&file, "old").unwrap();
        now.store(10 * 86_400_000, Ordering::SeqCst);
        let fresh = backups.create_backup(&file, "fresh").unwrap();

        let removed = backups.prune(Duration::from_secs(7 * 86_400)).unwrap();
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert_eq!(backups.all_backups().unwrap().len(), 1);
    }
}
