//! Data Integrity Verifier.
//!
//! Files are fingerprinted into [`IntegrityRecord`]s kept in a durable
//! registry. Verification runs the cheap checks first and stops at the
//! first fatal mismatch: existence, size, permissions (non-fatal), then a
//! streamed checksum.

mod record;
mod registry;

pub use record::{
    CorruptionInfo, CorruptionKind, IntegrityRecord, IntegrityReport, IntegrityStats,
    RecordOptions, VerificationResult,
};
pub use registry::{
    JsonRegistry, RedbRegistry, RegistryStore, JSON_REGISTRY_FILE, REDB_REGISTRY_FILE,
};

use crate::checksum::checksum_file;
use crate::config::{IntegrityConfig, RegistryBackend};
use crate::context::GuardContext;
use crate::error::{GuardError, Result};
use crate::events::GuardEvent;
use crate::fsutil::{absolutize, copy_staged, is_partial, mode_of, modified_millis, partial_path, set_mode};
use crate::oplog::{LogOptions, LogStatus};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fingerprints files and detects drift against their records.
pub struct IntegrityVerifier {
    config: IntegrityConfig,
    ctx: Arc<GuardContext>,
    store: Box<dyn RegistryStore>,
    records: RwLock<HashMap<PathBuf, IntegrityRecord>>,
}

impl IntegrityVerifier {
    /// Creates a verifier over an explicit store. Call [`load`](Self::load)
    /// to pick up persisted records.
    pub fn new(config: IntegrityConfig, ctx: Arc<GuardContext>, store: Box<dyn RegistryStore>) -> Self {
        Self {
            config,
            ctx,
            store,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Opens the configured registry backend inside the state directory and
    /// loads its records.
    pub fn open(config: IntegrityConfig, ctx: Arc<GuardContext>) -> Result<Self> {
        let store: Box<dyn RegistryStore> = match config.registry_backend {
            RegistryBackend::Json => {
                Box::new(JsonRegistry::new(ctx.state_dir().join(JSON_REGISTRY_FILE)))
            }
            RegistryBackend::Redb => {
                Box::new(RedbRegistry::open(ctx.state_dir().join(REDB_REGISTRY_FILE))?)
            }
        };
        let verifier = Self::new(config, ctx, store);
        verifier.load()?;
        Ok(verifier)
    }

    /// Replaces the in-memory records with the persisted ones.
    pub fn load(&self) -> Result<usize> {
        let loaded = self.store.load()?;
        let count = loaded.len();
        let mut records = self.write_records();
        records.clear();
        records.extend(loaded.into_iter().map(|r| (r.path.clone(), r)));
        debug!(count = count, store = %self.store.location().display(), "Loaded integrity records");
        Ok(count)
    }

    /// The backing store.
    pub fn store(&self) -> &dyn RegistryStore {
        self.store.as_ref()
    }

    /// Fingerprints `path` and stores (or replaces) its record.
    pub fn create_integrity_record(&self, path: impl AsRef<Path>, opts: RecordOptions) -> Result<IntegrityRecord> {
        let record = self.fingerprint(&absolutize(path.as_ref()), opts)?;
        self.store.upsert(std::slice::from_ref(&record))?;
        self.write_records().insert(record.path.clone(), record.clone());
        debug!(path = %record.path.display(), checksum = %record.checksum, "Created integrity record");
        Ok(record)
    }

    /// Verifies one file against its record.
    pub fn verify_file(&self, path: impl AsRef<Path>) -> VerificationResult {
        let path = absolutize(path.as_ref());
        let record = self.read_records().get(&path).cloned();
        let Some(record) = record else {
            return VerificationResult::error(path.clone(), GuardError::RecordNotFound(path));
        };

        let result = evaluate(&self.config, &record);
        self.commit(std::slice::from_ref(&result));
        result
    }

    /// Verifies many files, concurrently when configured.
    ///
    /// Results come back in input order.
    pub fn verify_files(&self, paths: &[PathBuf]) -> Vec<VerificationResult> {
        let targets: Vec<Target> = {
            let records = self.read_records();
            paths
                .iter()
                .map(|p| {
                    let path = absolutize(p);
                    records.get(&path).cloned().ok_or(path)
                })
                .collect()
        };

        let results: Vec<VerificationResult> = if self.config.parallel && targets.len() > 1 {
            let width = self.config.max_parallel_verifications.max(1);
            let config = &self.config;
            let mut out = Vec::with_capacity(targets.len());
            for batch in targets.chunks(width) {
                thread::scope(|s| {
                    let handles: Vec<_> = batch
                        .iter()
                        .map(|target| s.spawn(move || check_target(config, target)))
                        .collect();
                    for (handle, target) in handles.into_iter().zip(batch) {
                        out.push(handle.join().unwrap_or_else(|_| {
                            VerificationResult::error(target_path(target), "verification worker panicked")
                        }));
                    }
                });
            }
            out
        } else {
            targets.iter().map(|t| check_target(&self.config, t)).collect()
        };

        self.commit(&results);
        results
    }

    /// Verifies every recorded file under `dir`.
    ///
    /// Without `recursive`, only direct children are checked.
    pub fn verify_directory(&self, dir: impl AsRef<Path>, recursive: bool) -> IntegrityReport {
        let started = Instant::now();
        let dir = absolutize(dir.as_ref());
        let mut paths: Vec<PathBuf> = self
            .read_records()
            .keys()
            .filter(|p| {
                if recursive {
                    p.starts_with(&dir) && **p != dir
                } else {
                    p.parent() == Some(dir.as_path())
                }
            })
            .cloned()
            .collect();
        paths.sort();

        let results = self.verify_files(&paths);
        let report = IntegrityReport::from_results(dir, results, started.elapsed());
        info!(
            directory = %report.directory.display(),
            total = report.total_files,
            score = report.integrity_score,
            "Verified directory"
        );
        report
    }

    /// Verifies every record in the registry.
    pub fn verify_all(&self) -> IntegrityReport {
        let started = Instant::now();
        let mut paths: Vec<PathBuf> = self.read_records().keys().cloned().collect();
        paths.sort();
        let results = self.verify_files(&paths);
        IntegrityReport::from_results(PathBuf::new(), results, started.elapsed())
    }

    /// Creates records for the files under `dir` and returns how many were
    /// recorded.
    ///
    /// Excluded names, symlinks, the state directory and partial files are
    /// skipped. Unreadable files are logged and skipped.
    pub fn scan_directory(&self, dir: impl AsRef<Path>, recursive: bool) -> Result<usize> {
        let dir = absolutize(dir.as_ref());
        let mut files = Vec::new();
        self.collect_files(&dir, recursive, &mut files)?;

        let mut fresh = Vec::with_capacity(files.len());
        for file in files {
            match self.fingerprint(&file, RecordOptions::default()) {
                Ok(record) => fresh.push(record),
                Err(e) => warn!(path = %file.display(), error = %e, "Skipping unreadable file"),
            }
        }

        self.store.upsert(&fresh)?;
        let count = fresh.len();
        {
            let mut records = self.write_records();
            for record in fresh {
                records.insert(record.path.clone(), record);
            }
        }

        self.ctx.logger().log_operation(
            "integrity_scan",
            LogStatus::Success,
            std::slice::from_ref(&dir),
            LogOptions {
                description: Some(format!("recorded {} file(s)", count)),
                context: None,
            },
        );
        info!(directory = %dir.display(), count = count, "Scanned directory");
        Ok(count)
    }

    /// Restores `path` from `backup` and re-verifies it.
    ///
    /// Returns false when there is no record, no backup, the copy fails, or
    /// the restored file still does not match.
    pub fn repair_file(&self, path: impl AsRef<Path>, backup: Option<&Path>) -> bool {
        let path = absolutize(path.as_ref());
        let Some(record) = self.get_record(&path) else {
            warn!(path = %path.display(), "No integrity record; cannot repair");
            return false;
        };
        let Some(backup) = backup else {
            warn!(path = %path.display(), "No backup supplied; cannot repair");
            self.log_repair(&path, false, "no backup supplied");
            return false;
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "Failed to create parent directory");
                self.log_repair(&path, false, &e.to_string());
                return false;
            }
        }

        let staging = partial_path(&path, &uuid::Uuid::new_v4().to_string());
        if let Err(e) = copy_staged(backup, &path, &staging, true) {
            warn!(path = %path.display(), backup = %backup.display(), error = %e, "Restore from backup failed");
            self.log_repair(&path, false, &e.to_string());
            return false;
        }
        if let Err(e) = set_mode(&path, record.permissions) {
            warn!(path = %path.display(), error = %e, "Failed to restore permissions");
        }

        let result = self.verify_file(&path);
        let message = if result.success {
            "restored from backup".to_string()
        } else {
            result
                .details
                .clone()
                .unwrap_or_else(|| "restored file still does not match".to_string())
        };
        self.log_repair(&path, result.success, &message);
        result.success
    }

    /// Writes every in-memory record back to the store.
    pub fn flush(&self) -> Result<usize> {
        let records = self.records();
        if !records.is_empty() {
            self.store.upsert(&records)?;
        }
        Ok(records.len())
    }

    /// Drops records whose files no longer exist and returns how many.
    pub fn cleanup(&self) -> Result<usize> {
        let gone: Vec<PathBuf> = self
            .read_records()
            .keys()
            .filter(|p| !p.exists())
            .cloned()
            .collect();
        if gone.is_empty() {
            return Ok(0);
        }

        self.store.remove(&gone)?;
        let mut records = self.write_records();
        for path in &gone {
            records.remove(path);
        }
        info!(removed = gone.len(), "Removed integrity records for missing files");
        Ok(gone.len())
    }

    /// Returns the record for `path`.
    pub fn get_record(&self, path: impl AsRef<Path>) -> Option<IntegrityRecord> {
        self.read_records().get(&absolutize(path.as_ref())).cloned()
    }

    /// All records, sorted by path.
    pub fn records(&self) -> Vec<IntegrityRecord> {
        let mut all: Vec<IntegrityRecord> = self.read_records().values().cloned().collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }

    /// Counters over the registry.
    pub fn get_integrity_stats(&self) -> IntegrityStats {
        let records = self.read_records();
        let mut stats = IntegrityStats {
            total_records: records.len(),
            ..IntegrityStats::default()
        };
        for record in records.values() {
            stats.total_bytes += record.size;
            if record.last_verified.is_none() {
                stats.unverified += 1;
            } else if record.verified {
                stats.verified += 1;
            }
            if let Some(info) = &record.corruption {
                *stats.by_kind.entry(info.kind).or_insert(0) += 1;
                if info.kind != CorruptionKind::PermissionChange {
                    stats.corrupted += 1;
                }
            }
            stats.last_verified = stats.last_verified.max(record.last_verified);
        }
        stats
    }

    /// Interval for background sweeps.
    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval()
    }

    fn fingerprint(&self, path: &Path, opts: RecordOptions) -> Result<IntegrityRecord> {
        let meta = fs::metadata(path).map_err(|e| GuardError::at(path, e))?;
        if !meta.is_file() {
            return Err(GuardError::at(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        let algorithm = opts.algorithm.unwrap_or(self.config.algorithm);
        let (checksum, size) = checksum_file(algorithm, path)?;
        Ok(IntegrityRecord {
            path: path.to_path_buf(),
            checksum,
            algorithm,
            size,
            modified: modified_millis(&meta),
            permissions: mode_of(&meta),
            verified: true,
            last_verified: None,
            created_at: self.ctx.now_millis(),
            corruption: None,
        })
    }

    /// Writes verification outcomes back to the records and announces
    /// divergences.
    fn commit(&self, results: &[VerificationResult]) {
        let now = self.ctx.now_millis();
        let mut updated = Vec::new();
        {
            let mut records = self.write_records();
            for result in results.iter().filter(|r| r.error.is_none()) {
                let Some(record) = records.get_mut(&result.path) else {
                    continue;
                };
                record.verified = result.success;
                record.last_verified = Some(now);
                record.corruption = result.corruption_type.map(|kind| CorruptionInfo {
                    kind,
                    details: result.details.clone().unwrap_or_default(),
                    detected_at: now,
                });
                updated.push(record.clone());
            }
        }

        if let Err(e) = self.store.upsert(&updated) {
            warn!(error = %e, "Failed to persist verification results");
        }

        for result in results {
            let Some(kind) = result.corruption_type else {
                continue;
            };
            self.ctx.events().publish(GuardEvent::CorruptionDetected {
                path: result.path.clone(),
                kind,
            });
            if result.corruption_detected {
                warn!(path = %result.path.display(), kind = %kind, "Corruption detected");
                self.ctx.logger().log_operation(
                    "integrity_verify",
                    LogStatus::Failure,
                    std::slice::from_ref(&result.path),
                    LogOptions {
                        description: result.details.clone(),
                        context: Some(serde_json::json!({ "corruption": kind.to_string() })),
                    },
                );
            } else {
                debug!(path = %result.path.display(), kind = %kind, "Non-fatal drift detected");
            }
        }
    }

    fn log_repair(&self, path: &Path, success: bool, message: &str) {
        self.ctx.logger().log_operation(
            "integrity_repair",
            if success { LogStatus::Success } else { LogStatus::Failure },
            &[path.to_path_buf()],
            LogOptions {
                description: Some(message.to_string()),
                context: None,
            },
        );
    }

    fn collect_files(&self, dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<()> {
        let entries = fs::read_dir(dir).map_err(|e| GuardError::at(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| GuardError::at(dir, e))?;
            let path = entry.path();
            if self.is_excluded(&path) {
                continue;
            }
            let file_type = entry.file_type().map_err(|e| GuardError::at(&path, e))?;
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                if recursive {
                    self.collect_files(&path, true, out)?;
                }
            } else if file_type.is_file() {
                out.push(path);
            }
        }
        Ok(())
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if path.starts_with(self.ctx.state_dir()) || is_partial(path) {
            return true;
        }
        path.file_name()
            .map(|n| {
                let name = n.to_string_lossy();
                self.config.exclude.iter().any(|x| *x == name)
            })
            .unwrap_or(false)
    }

    fn read_records(&self) -> RwLockReadGuard<'_, HashMap<PathBuf, IntegrityRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_records(&self) -> RwLockWriteGuard<'_, HashMap<PathBuf, IntegrityRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for IntegrityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityVerifier")
            .field("store", &self.store)
            .field("records", &self.read_records().len())
            .finish()
    }
}

/// A recorded file, or the path of one without a record.
type Target = std::result::Result<IntegrityRecord, PathBuf>;

fn target_path(target: &Target) -> PathBuf {
    match target {
        Ok(record) => record.path.clone(),
        Err(path) => path.clone(),
    }
}

fn check_target(config: &IntegrityConfig, target: &Target) -> VerificationResult {
    match target {
        Ok(record) => evaluate(config, record),
        Err(path) => VerificationResult::error(path.clone(), GuardError::RecordNotFound(path.clone())),
    }
}

/// Checks one file against its record without touching shared state.
fn evaluate(config: &IntegrityConfig, record: &IntegrityRecord) -> VerificationResult {
    let started = Instant::now();
    let mut result = VerificationResult {
        path: record.path.clone(),
        success: false,
        corruption_detected: false,
        corruption_type: None,
        details: None,
        skipped: false,
        expected_checksum: Some(record.checksum.clone()),
        actual_checksum: None,
        error: None,
        duration: Duration::ZERO,
    };

    let fatal = |mut result: VerificationResult, kind: CorruptionKind, details: String| {
        result.success = false;
        result.corruption_detected = true;
        result.corruption_type = Some(kind);
        result.details = Some(details);
        result.duration = started.elapsed();
        result
    };

    let meta = match fs::metadata(&record.path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return fatal(result, CorruptionKind::MissingFile, "file no longer exists".to_string());
        }
        Err(e) => {
            result.error = Some(e.to_string());
            result.duration = started.elapsed();
            return result;
        }
    };

    if meta.len() != record.size {
        let details = format!("expected {} bytes, found {}", record.size, meta.len());
        return fatal(result, CorruptionKind::SizeMismatch, details);
    }

    let mode = mode_of(&meta);
    if mode != record.permissions {
        result.corruption_type = Some(CorruptionKind::PermissionChange);
        result.details = Some(format!(
            "permissions changed from {:o} to {:o}",
            record.permissions, mode
        ));
    }

    if config.skip_large_files && record.size > config.large_file_threshold_bytes {
        debug!(path = %record.path.display(), size = record.size, "Skipping checksum of large file");
        result.skipped = true;
        result.success = true;
        result.duration = started.elapsed();
        return result;
    }

    match checksum_file(record.algorithm, &record.path) {
        Ok((actual, _)) if actual == record.checksum => {
            result.actual_checksum = Some(actual);
            result.success = true;
            result.duration = started.elapsed();
            result
        }
        Ok((actual, _)) => {
            let details = format!("expected {}, found {}", record.checksum, actual);
            result.actual_checksum = Some(actual);
            fatal(result, CorruptionKind::ChecksumMismatch, details)
        }
        Err(e) => {
            result.error = Some(e.to_string());
            result.duration = started.elapsed();
            result
        }
    }
}
