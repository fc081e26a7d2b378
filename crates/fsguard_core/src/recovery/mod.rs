//! Interrupted Operation Recovery.
//!
//! A scan turns stale lock sidecars and orphaned partial files into
//! [`InterruptedOperation`]s, each with a scored [`RecoveryPlan`]. Plans
//! above 50 confidence are `recoverable`; the rest wait for a human to
//! pick a strategy or abandon them.

mod plan;
mod types;

pub use types::{
    InterruptedMetadata, InterruptedOperation, InterruptedStatus, InterruptionSource,
    RecoveryPlan, RecoveryResult, RecoveryStats, RecoveryStrategy, RiskLevel,
};

use crate::atomic::{AtomicManager, BatchStep, OperationKind, OperationOptions, OperationResult};
use crate::checksum::{checksum_bytes, ChecksumAlgorithm};
use crate::config::RecoveryConfig;
use crate::context::GuardContext;
use crate::error::{GuardError, Result};
use crate::events::GuardEvent;
use crate::fsutil::{
    fsync_dir, is_partial, millis_before, modified_millis, partial_target, relocate,
};
use crate::oplog::{LogOptions, LogStatus};
use crate::sidecar::{LockSidecar, OperationProgress, OwnerState};
use plan::{score, PlanFacts};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Directory names never searched for orphaned partial files.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules"];

/// Extension point for additional interruption heuristics.
///
/// Detectors report candidates; the manager scores them like any other.
pub trait InterruptionDetector: Send + Sync {
    /// Name recorded on the operations it reports.
    fn name(&self) -> &str;

    /// Looks for interruptions under `roots`.
    fn detect(&self, roots: &[PathBuf], now: i64) -> Vec<InterruptedOperation>;
}

#[derive(Default)]
struct RecoveryState {
    operations: HashMap<String, InterruptedOperation>,
    recovering: HashSet<String>,
}

/// Finds and repairs operations left mid-flight by a dead process.
pub struct RecoveryManager {
    config: RecoveryConfig,
    ctx: Arc<GuardContext>,
    atomic: Arc<AtomicManager>,
    detectors: Mutex<Vec<Box<dyn InterruptionDetector>>>,
    state: Mutex<RecoveryState>,
}

impl RecoveryManager {
    /// Creates a manager that redoes steps through `atomic`.
    pub fn new(config: RecoveryConfig, ctx: Arc<GuardContext>, atomic: Arc<AtomicManager>) -> Self {
        Self {
            config,
            ctx,
            atomic,
            detectors: Mutex::new(Vec::new()),
            state: Mutex::new(RecoveryState::default()),
        }
    }

    /// Adds a detector consulted by every scan.
    pub fn register_detector(&self, detector: Box<dyn InterruptionDetector>) {
        if let Ok(mut detectors) = self.detectors.lock() {
            debug!(detector = detector.name(), "Registered interruption detector");
            detectors.push(detector);
        }
    }

    /// Directories searched for orphaned partial files.
    pub fn scan_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        if let Some(root) = self.ctx.state_dir().parent() {
            roots.push(root.to_path_buf());
        }
        for extra in &self.config.scan_roots {
            if !roots.contains(extra) {
                roots.push(extra.clone());
            }
        }
        roots
    }

    /// Scans for interrupted operations and scores each one.
    ///
    /// Previously recovered or abandoned entries are not reported again.
    /// Entries whose artifacts disappeared since the last scan are dropped.
    pub fn scan_for_interrupted_operations(&self) -> Result<Vec<InterruptedOperation>> {
        let now = self.ctx.now_millis();
        let sidecars = self.ctx.sidecars().list()?;

        // Staging files owned by any sidecar are never orphans
        let claimed: HashSet<PathBuf> = sidecars
            .iter()
            .flat_map(|s| s.temp_files.iter().cloned())
            .collect();

        let mut candidates = Vec::new();
        for sidecar in sidecars {
            if self.atomic.is_active(&sidecar.operation_id) {
                continue;
            }
            if sidecar.owner() == OwnerState::Live {
                debug!(
                    operation_id = %sidecar.operation_id,
                    pid = sidecar.process_id,
                    "Sidecar owner still running"
                );
                continue;
            }
            candidates.push(self.from_sidecar(sidecar));
        }

        let roots = self.scan_roots();
        let mut orphans = Vec::new();
        for root in &roots {
            self.collect_partials(root, &mut orphans);
        }
        for path in orphans {
            if !claimed.contains(&path) {
                candidates.push(orphan_operation(&path));
            }
        }

        if let Ok(detectors) = self.detectors.lock() {
            for detector in detectors.iter() {
                for mut op in detector.detect(&roots, now) {
                    op.source_of_detection = InterruptionSource::Detector(detector.name().to_string());
                    op.status = InterruptedStatus::Detecting;
                    candidates.push(op);
                }
            }
        }

        let analyzed: Vec<InterruptedOperation> = candidates
            .into_iter()
            .map(|op| self.analyze(op, now))
            .collect();

        let mut found = Vec::new();
        let mut new_ids = Vec::new();
        {
            let mut state = self.lock_state()?;
            let seen: HashSet<String> = analyzed.iter().map(|op| op.id.clone()).collect();
            let recovering = state.recovering.clone();
            state.operations.retain(|id, op| {
                op.status.is_terminal() || seen.contains(id) || recovering.contains(id)
            });

            for op in analyzed {
                match state.operations.get(&op.id) {
                    Some(existing) if existing.status.is_terminal() => continue,
                    Some(_) if state.recovering.contains(&op.id) => continue,
                    Some(_) => {}
                    None => new_ids.push(op.id.clone()),
                }
                state.operations.insert(op.id.clone(), op.clone());
                found.push(op);
            }
        }

        for id in new_ids {
            self.ctx
                .events()
                .publish(GuardEvent::InterruptedOperationFound { id });
        }
        if !found.is_empty() {
            info!(count = found.len(), "Found interrupted operations");
        }
        Ok(found)
    }

    /// Applies the planned strategy of a recoverable operation.
    pub fn recover_operation(&self, id: &str) -> RecoveryResult {
        let started = Instant::now();
        let op = match self.get_operation(id) {
            Some(op) => op,
            None => {
                return RecoveryResult::fail(id, None, started.elapsed(), GuardError::InterruptedNotFound(id.to_string()))
            }
        };
        let strategy = op.plan.as_ref().map(|p| p.strategy);
        if op.status != InterruptedStatus::Recoverable {
            return RecoveryResult::fail(
                id,
                strategy,
                started.elapsed(),
                GuardError::InvalidOperationState {
                    id: id.to_string(),
                    status: op.status.to_string(),
                    action: "recover automatically".to_string(),
                },
            );
        }
        match strategy {
            Some(strategy) => self.apply(op, strategy, started),
            None => RecoveryResult::fail(id, None, started.elapsed(), "no recovery plan"),
        }
    }

    /// Applies a caller-chosen strategy, overriding the plan.
    ///
    /// Works for unrecoverable and abandoned operations too. `Manual`
    /// always fails.
    pub fn recover_operation_with(&self, id: &str, strategy: RecoveryStrategy) -> RecoveryResult {
        let started = Instant::now();
        let Some(op) = self.get_operation(id) else {
            return RecoveryResult::fail(
                id,
                Some(strategy),
                started.elapsed(),
                GuardError::InterruptedNotFound(id.to_string()),
            );
        };
        if op.status == InterruptedStatus::Recovered {
            return RecoveryResult::fail(
                id,
                Some(strategy),
                started.elapsed(),
                GuardError::InvalidOperationState {
                    id: id.to_string(),
                    status: op.status.to_string(),
                    action: "recover".to_string(),
                },
            );
        }
        self.apply(op, strategy, started)
    }

    /// Recovers every `recoverable` operation.
    pub fn recover_all_operations(&self) -> Vec<RecoveryResult> {
        let ids: Vec<String> = self
            .list_operations()
            .into_iter()
            .filter(|op| op.status == InterruptedStatus::Recoverable)
            .map(|op| op.id)
            .collect();
        ids.iter().map(|id| self.recover_operation(id)).collect()
    }

    /// Gives up on an operation: deletes its sidecar and staging files.
    pub fn abandon_operation(&self, id: &str) -> Result<()> {
        let op = self
            .get_operation(id)
            .ok_or_else(|| GuardError::InterruptedNotFound(id.to_string()))?;
        if op.status == InterruptedStatus::Recovered {
            return Err(GuardError::InvalidOperationState {
                id: id.to_string(),
                status: op.status.to_string(),
                action: "abandon".to_string(),
            });
        }

        discard_files(&op.metadata.temp_files);
        if op.metadata.lock_file.is_some() {
            self.ctx.sidecars().remove(id)?;
        }
        self.set_status(id, InterruptedStatus::Abandoned);

        self.ctx.logger().log_operation(
            "recovery_abandon",
            LogStatus::Cancelled,
            &affected_paths(&op),
            LogOptions {
                description: Some(format!("abandoned interrupted {}", op.kind)),
                context: None,
            },
        );
        self.ctx
            .events()
            .publish(GuardEvent::OperationAbandoned { id: id.to_string() });
        info!(operation_id = %id, "Abandoned interrupted operation");
        Ok(())
    }

    /// Forgets recovered and abandoned entries and deletes unclaimed partial
    /// files older than the recovery window. Returns how many items went.
    pub fn cleanup(&self) -> Result<usize> {
        let forgotten = {
            let mut state = self.lock_state()?;
            let before = state.operations.len();
            state.operations.retain(|_, op| !op.status.is_terminal());
            before - state.operations.len()
        };

        let claimed: HashSet<PathBuf> = self
            .ctx
            .sidecars()
            .list()?
            .into_iter()
            .flat_map(|s| s.temp_files)
            .collect();
        let cutoff = millis_before(self.ctx.now_millis(), self.config.max_recovery_window());

        let mut partials = Vec::new();
        for root in self.scan_roots() {
            self.collect_partials(&root, &mut partials);
        }
        let mut deleted = 0;
        for path in partials.into_iter().filter(|p| !claimed.contains(p)) {
            let stale = fs::metadata(&path)
                .ok()
                .and_then(|m| modified_millis(&m))
                .map(|mtime| mtime < cutoff)
                .unwrap_or(false);
            if stale {
                match fs::remove_file(&path) {
                    Ok(()) => deleted += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete stale partial file"),
                }
            }
        }

        if forgotten + deleted > 0 {
            info!(forgotten = forgotten, deleted = deleted, "Recovery cleanup");
        }
        Ok(forgotten + deleted)
    }

    /// Returns a tracked operation.
    pub fn get_operation(&self, id: &str) -> Option<InterruptedOperation> {
        self.lock_state().ok()?.operations.get(id).cloned()
    }

    /// All tracked operations, oldest first.
    pub fn list_operations(&self) -> Vec<InterruptedOperation> {
        let mut ops: Vec<InterruptedOperation> = self
            .lock_state()
            .map(|s| s.operations.values().cloned().collect())
            .unwrap_or_default();
        ops.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        ops
    }

    /// Counters over tracked operations.
    pub fn get_recovery_stats(&self) -> RecoveryStats {
        let ops = self.list_operations();
        let mut stats = RecoveryStats {
            total: ops.len(),
            ..RecoveryStats::default()
        };
        let mut confidence_sum = 0u64;
        let mut planned = 0u64;
        for op in &ops {
            match op.status {
                InterruptedStatus::Recoverable => stats.recoverable += 1,
                InterruptedStatus::Unrecoverable => stats.unrecoverable += 1,
                InterruptedStatus::Recovered => stats.recovered += 1,
                InterruptedStatus::Abandoned => stats.abandoned += 1,
                InterruptedStatus::Detecting | InterruptedStatus::Analyzed => {}
            }
            if let Some(plan) = &op.plan {
                *stats.by_strategy.entry(plan.strategy).or_insert(0) += 1;
                confidence_sum += u64::from(plan.confidence);
                planned += 1;
            }
        }
        if planned > 0 {
            stats.average_confidence = confidence_sum as f64 / planned as f64;
        }
        stats
    }

    /// Whether the background scan should also recover.
    pub fn auto_recover(&self) -> bool {
        self.config.auto_recover
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, RecoveryState>> {
        self.state
            .lock()
            .map_err(|_| GuardError::StatePoisoned("recovery"))
    }

    fn set_status(&self, id: &str, status: InterruptedStatus) {
        if let Ok(mut state) = self.lock_state() {
            if let Some(op) = state.operations.get_mut(id) {
                op.status = status;
            }
        }
    }

    fn from_sidecar(&self, sidecar: LockSidecar) -> InterruptedOperation {
        InterruptedOperation {
            id: sidecar.operation_id.clone(),
            kind: sidecar.kind,
            timestamp: sidecar.created_at,
            status: InterruptedStatus::Detecting,
            source_of_detection: InterruptionSource::Sidecar,
            source: sidecar.source,
            target: sidecar.target,
            progress: sidecar.progress,
            metadata: InterruptedMetadata {
                process_id: sidecar.process_id,
                session_id: sidecar.session_id,
                lock_file: Some(self.ctx.sidecars().path_for(&sidecar.operation_id)),
                temp_files: sidecar.temp_files,
            },
            plan: None,
        }
    }

    fn analyze(&self, mut op: InterruptedOperation, now: i64) -> InterruptedOperation {
        op.status = InterruptedStatus::Analyzed;
        let plan = score(&PlanFacts::gather(&op, now), &self.config);
        op.status = if plan.confidence > 50 {
            InterruptedStatus::Recoverable
        } else {
            InterruptedStatus::Unrecoverable
        };
        debug!(
            operation_id = %op.id,
            strategy = %plan.strategy,
            confidence = plan.confidence,
            risk = %plan.risk,
            "Scored interrupted operation"
        );
        op.plan = Some(plan);
        op
    }

    fn apply(&self, op: InterruptedOperation, strategy: RecoveryStrategy, started: Instant) -> RecoveryResult {
        let id = op.id.clone();
        {
            let mut state = match self.lock_state() {
                Ok(state) => state,
                Err(e) => return RecoveryResult::fail(&id, Some(strategy), started.elapsed(), e),
            };
            if !state.recovering.insert(id.clone()) {
                return RecoveryResult::fail(&id, Some(strategy), started.elapsed(), "recovery already in progress");
            }
        }

        let outcome = match strategy {
            RecoveryStrategy::Resume => self.resume(&op),
            RecoveryStrategy::Restart => self.restart(&op),
            RecoveryStrategy::Rollback => self.rollback(&op),
            RecoveryStrategy::Manual => Err(GuardError::InvalidOperationState {
                id: id.clone(),
                status: op.status.to_string(),
                action: "recover without an explicit strategy".to_string(),
            }),
        };

        let outcome = outcome.and_then(|message| {
            if op.metadata.lock_file.is_some() {
                self.ctx.sidecars().remove(&id)?;
            }
            Ok(message)
        });

        if let Ok(mut state) = self.lock_state() {
            state.recovering.remove(&id);
            if let Some(entry) = state.operations.get_mut(&id) {
                entry.status = if outcome.is_ok() {
                    InterruptedStatus::Recovered
                } else {
                    InterruptedStatus::Abandoned
                };
            }
        }

        let files = affected_paths(&op);
        match outcome {
            Ok(message) => {
                info!(operation_id = %id, strategy = %strategy, "Recovered interrupted operation");
                self.ctx.logger().log_operation(
                    "recovery",
                    LogStatus::Success,
                    &files,
                    LogOptions {
                        description: Some(message.clone()),
                        context: Some(serde_json::json!({ "strategy": strategy.to_string() })),
                    },
                );
                self.ctx.events().publish(GuardEvent::OperationRecovered {
                    id: id.clone(),
                    strategy,
                });
                RecoveryResult::ok(&id, strategy, message, started.elapsed())
            }
            Err(e) => {
                warn!(operation_id = %id, strategy = %strategy, error = %e, "Recovery failed; operation abandoned");
                self.ctx.logger().log_operation(
                    "recovery",
                    LogStatus::Failure,
                    &files,
                    LogOptions {
                        description: Some(e.to_string()),
                        context: Some(serde_json::json!({ "strategy": strategy.to_string() })),
                    },
                );
                self.ctx
                    .events()
                    .publish(GuardEvent::OperationAbandoned { id: id.clone() });
                RecoveryResult::fail(&id, Some(strategy), started.elapsed(), e)
            }
        }
    }

    fn resume(&self, op: &InterruptedOperation) -> Result<String> {
        let target = require(op, op.target.as_ref(), "resume an operation without a target")?;
        let staged = op.metadata.temp_files.iter().find(|p| p.is_file()).cloned();

        match op.kind {
            OperationKind::Write | OperationKind::Create => {
                let staged = staged.ok_or_else(|| GuardError::SourceMissing(
                    op.metadata.temp_files.first().cloned().unwrap_or_else(|| target.clone()),
                ))?;
                fs::rename(&staged, target).map_err(|e| GuardError::at(target, e))?;
                sync_parent(target);
                Ok(format!("renamed staged content into {}", target.display()))
            }
            OperationKind::Move | OperationKind::Copy => {
                let source = require(op, op.source.as_ref(), "resume a transfer without a source")?;
                if !source.is_file() {
                    return Err(GuardError::SourceMissing(source.clone()));
                }
                let payload = staged.unwrap_or_else(|| target.clone());
                let appended = append_remaining(source, &payload)?;
                if payload != *target {
                    fs::rename(&payload, target).map_err(|e| GuardError::at(target, e))?;
                }
                sync_parent(target);

                if op.kind == OperationKind::Move {
                    let source_len = fs::metadata(source).map_err(|e| GuardError::at(source, e))?.len();
                    let target_len = fs::metadata(target).map_err(|e| GuardError::at(target, e))?.len();
                    if source_len != target_len {
                        return Err(GuardError::StepFailed {
                            index: 0,
                            kind: op.kind.to_string(),
                            reason: format!("target has {} bytes, source {}", target_len, source_len),
                        });
                    }
                    fs::remove_file(source).map_err(|e| GuardError::at(source, e))?;
                }
                Ok(format!("resumed transfer, {} byte(s) appended", appended))
            }
            other => Err(GuardError::InvalidOperationState {
                id: op.id.clone(),
                status: other.to_string(),
                action: "resume".to_string(),
            }),
        }
    }

    fn restart(&self, op: &InterruptedOperation) -> Result<String> {
        let source = require(op, op.source.as_ref(), "restart an operation without a source")?;
        let target = require(op, op.target.as_ref(), "restart an operation without a target")?;
        discard_files(&op.metadata.temp_files);
        // The redo displaces (and backs up) the original under its own id
        self.reinstate_held_target(op)?;

        let opts = OperationOptions::with_backup().describe(format!("restart of interrupted {}", op.id));
        let result = match op.kind {
            OperationKind::Move => self.atomic.atomic_move(source, target, opts),
            OperationKind::Copy => self
                .atomic
                .atomic_batch(vec![BatchStep::copy_file(source, target)], opts),
            other => {
                return Err(GuardError::InvalidOperationState {
                    id: op.id.clone(),
                    status: other.to_string(),
                    action: "restart".to_string(),
                })
            }
        };
        into_message(op, result)
    }

    fn rollback(&self, op: &InterruptedOperation) -> Result<String> {
        discard_files(&op.metadata.temp_files);
        let target_missing = op.target.as_ref().map(|t| !t.exists()).unwrap_or(false);
        if target_missing && self.reinstate_held_target(op)? {
            Ok("discarded partial artifacts and restored the displaced target".to_string())
        } else {
            Ok("discarded partial artifacts".to_string())
        }
    }

    /// Puts back a destination the interrupted operation had moved into
    /// `hold/<id>/` before it died.
    ///
    /// Whatever sits at the target then is partial output of that operation
    /// and is removed first. Returns false when nothing was held.
    fn reinstate_held_target(&self, op: &InterruptedOperation) -> Result<bool> {
        let Some(target) = op.target.as_ref() else {
            return Ok(false);
        };
        let hold = self.ctx.hold_dir().join(&op.id);
        let Some(held) = held_original(&hold, target) else {
            return Ok(false);
        };

        match fs::remove_file(target) {
            Ok(()) => debug!(target = %target.display(), "Discarded partial target"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(GuardError::at(target, e)),
        }
        relocate(&held, target)?;
        sync_parent(target);
        // Only succeeds once the directory is empty
        let _ = fs::remove_dir(&hold);
        info!(operation_id = %op.id, target = %target.display(), "Restored displaced target");
        Ok(true)
    }

    fn collect_partials(&self, dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_symlink() || path.starts_with(self.ctx.state_dir()) {
                continue;
            }
            if file_type.is_dir() {
                let skip = path
                    .file_name()
                    .map(|n| SKIP_DIRS.iter().any(|s| n == *s))
                    .unwrap_or(false);
                if !skip {
                    self.collect_partials(&path, out);
                }
            } else if file_type.is_file() && is_partial(&path) && !out.contains(&path) {
                out.push(path);
            }
        }
    }
}

impl std::fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("config", &self.config)
            .finish()
    }
}

fn orphan_operation(path: &Path) -> InterruptedOperation {
    let digest = checksum_bytes(ChecksumAlgorithm::Blake3, path.to_string_lossy().as_bytes());
    let meta = fs::metadata(path).ok();
    let len = meta.as_ref().map(|m| m.len()).unwrap_or(0);
    InterruptedOperation {
        id: format!("orphan-{}", &digest[..16]),
        kind: OperationKind::Write,
        timestamp: meta.as_ref().and_then(modified_millis).unwrap_or(0),
        status: InterruptedStatus::Detecting,
        source_of_detection: InterruptionSource::OrphanedPartial,
        source: None,
        target: partial_target(path),
        progress: OperationProgress::new(0, len),
        metadata: InterruptedMetadata {
            process_id: 0,
            session_id: String::new(),
            lock_file: None,
            temp_files: vec![path.to_path_buf()],
        },
        plan: None,
    }
}

fn require<'a>(op: &InterruptedOperation, value: Option<&'a PathBuf>, action: &str) -> Result<&'a PathBuf> {
    value.ok_or_else(|| GuardError::InvalidOperationState {
        id: op.id.clone(),
        status: op.status.to_string(),
        action: action.to_string(),
    })
}

fn into_message(op: &InterruptedOperation, result: OperationResult) -> Result<String> {
    if result.success {
        Ok(format!("redone as operation {}", result.operation_id))
    } else {
        Err(GuardError::StepFailed {
            index: 0,
            kind: op.kind.to_string(),
            reason: result.error.unwrap_or_else(|| "restart failed".to_string()),
        })
    }
}

/// Appends the bytes of `source` beyond the current length of `payload`.
fn append_remaining(source: &Path, payload: &Path) -> Result<u64> {
    let done = fs::metadata(payload).map(|m| m.len()).unwrap_or(0);
    let mut reader = File::open(source).map_err(|e| GuardError::at(source, e))?;
    reader
        .seek(SeekFrom::Start(done))
        .map_err(|e| GuardError::at(source, e))?;
    let mut writer = OpenOptions::new()
        .create(true)
        .append(true)
        .open(payload)
        .map_err(|e| GuardError::at(payload, e))?;
    let copied = io::copy(&mut reader, &mut writer).map_err(|e| GuardError::at(payload, e))?;
    writer.sync_all().map_err(|e| GuardError::at(payload, e))?;
    Ok(copied)
}

/// The earliest file in `hold` displaced from `target`.
///
/// Held files are named `<action index>-<file name>`.
fn held_original(hold: &Path, target: &Path) -> Option<PathBuf> {
    let name = target.file_name()?.to_string_lossy().into_owned();
    fs::read_dir(hold)
        .ok()?
        .flatten()
        .filter_map(|entry| {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let (index, rest) = file_name.split_once('-')?;
            let index: usize = index.parse().ok()?;
            (rest == name && entry.path().is_file()).then(|| (index, entry.path()))
        })
        .min_by_key(|(index, _)| *index)
        .map(|(_, path)| path)
}

fn discard_files(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Discarded partial file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to discard partial file"),
        }
    }
}

fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        fsync_dir(parent);
    }
}

fn affected_paths(op: &InterruptedOperation) -> Vec<PathBuf> {
    op.source
        .iter()
        .chain(op.target.iter())
        .cloned()
        .chain(op.metadata.temp_files.iter().cloned())
        .collect()
}
