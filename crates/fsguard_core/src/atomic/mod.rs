//! Atomic Operation Manager.
//!
//! Mutations follow "stage, record, rename": the pre-image of every touched
//! path is captured, new content is staged next to its target and renamed
//! into place, and each step pushes its inverse action only after it
//! succeeded. A failing step triggers a best-effort LIFO rollback of
//! everything recorded so far.

mod operation;

pub use operation::{
    AtomicOperation, BatchStep, FileSnapshot, OperationKind, OperationMetadata, OperationOptions,
    OperationResult, OperationStatus, RollbackAction,
};

use crate::config::AtomicConfig;
use crate::context::GuardContext;
use crate::error::{GuardError, Result};
use crate::events::GuardEvent;
use crate::fsutil::{
    absolutize, accessed_millis, copy_staged, millis_before, mode_of, modified_millis, partial_path,
    relocate, set_mode, write_staged,
};
use crate::oplog::{LogOptions, LogStatus};
use crate::sidecar::{LockSidecar, OperationProgress};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// An operation that has not reached a terminal status.
struct ActiveEntry {
    operation: AtomicOperation,
    options: OperationOptions,
    cancel: Arc<AtomicBool>,
}

#[derive(Default)]
struct ManagerState {
    active: HashMap<String, ActiveEntry>,
    history: VecDeque<AtomicOperation>,
}

/// Rollback actions and backups produced while executing steps.
#[derive(Default)]
struct StepRecorder {
    actions: Vec<RollbackAction>,
    backups: Vec<PathBuf>,
}

/// Executes file mutations as undoable operations.
pub struct AtomicManager {
    config: AtomicConfig,
    ctx: Arc<GuardContext>,
    state: Mutex<ManagerState>,
    #[cfg(test)]
    step_hook: Mutex<Option<Box<dyn Fn(usize) + Send + Sync>>>,
}

impl AtomicManager {
    /// Creates a manager using the shared guard context.
    pub fn new(config: AtomicConfig, ctx: Arc<GuardContext>) -> Self {
        Self {
            config,
            ctx,
            state: Mutex::new(ManagerState::default()),
            #[cfg(test)]
            step_hook: Mutex::new(None),
        }
    }

    /// Atomically replaces (or creates) `path` with `content`.
    pub fn atomic_write(&self, path: impl AsRef<Path>, content: &[u8], opts: OperationOptions) -> OperationResult {
        self.run(vec![BatchStep::write(path.as_ref(), content.to_vec())], opts)
    }

    /// Atomically moves `source` to `destination`.
    ///
    /// An existing destination is displaced into the holding area so that a
    /// rollback can put it back.
    pub fn atomic_move(
        &self,
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
        opts: OperationOptions,
    ) -> OperationResult {
        self.run(
            vec![BatchStep::move_file(source.as_ref(), destination.as_ref())],
            opts,
        )
    }

    /// Executes `steps` strictly in order as one operation.
    ///
    /// If step *k* fails, the actions of steps `0..k` are undone in reverse
    /// order; later steps are never attempted.
    pub fn atomic_batch(&self, steps: Vec<BatchStep>, opts: OperationOptions) -> OperationResult {
        self.run(steps, opts)
    }

    fn run(&self, steps: Vec<BatchStep>, opts: OperationOptions) -> OperationResult {
        let started = Instant::now();
        match self.schedule(steps, opts) {
            Ok(id) => self.execute(&id),
            Err(e) => OperationResult::fail("", 0, started.elapsed(), e),
        }
    }

    /// Registers a pending operation without running it.
    ///
    /// Pending operations can be cancelled until [`execute`](Self::execute)
    /// is called.
    pub fn schedule(&self, steps: Vec<BatchStep>, opts: OperationOptions) -> Result<String> {
        let steps: Vec<BatchStep> = steps.into_iter().map(absolutize_step).collect();
        let kind = match steps.as_slice() {
            [single] => single.kind(),
            _ => OperationKind::Batch,
        };

        let id = uuid::Uuid::new_v4().to_string();
        let mut operation = AtomicOperation {
            id: id.clone(),
            kind,
            timestamp: self.ctx.now_millis(),
            status: OperationStatus::Pending,
            steps,
            completed_steps: 0,
            original_state: Vec::new(),
            target_state: Vec::new(),
            rollback_actions: Vec::new(),
            metadata: OperationMetadata {
                description: opts.description.clone(),
                priority: opts.priority,
                timeout: opts.timeout,
                retry_count: opts.retry_count,
                dependencies: opts.dependencies.clone(),
                backups: Vec::new(),
            },
            error: None,
            finished_at: None,
        };
        operation.original_state = operation
            .touched_paths()
            .iter()
            .map(|p| FileSnapshot::capture(p))
            .collect();

        debug!(operation_id = %id, kind = %kind, steps = operation.steps.len(), "Operation scheduled");
        self.lock_state()?.active.insert(
            id.clone(),
            ActiveEntry {
                operation,
                options: opts,
                cancel: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(id)
    }

    /// Runs a pending operation to a terminal status.
    pub fn execute(&self, id: &str) -> OperationResult {
        let started = Instant::now();

        let (operation, options, cancel) = match self.begin(id) {
            Ok(parts) => parts,
            Err(e) => return OperationResult::fail(id, 0, started.elapsed(), e),
        };
        let fsync = options.fsync.unwrap_or(self.config.fsync);
        let steps = &operation.steps;
        let touched = operation.touched_paths();

        self.ctx.events().publish(GuardEvent::OperationStarted {
            id: id.to_string(),
            kind: operation.kind,
        });
        let log_id = self.ctx.logger().start_operation(
            &operation.kind.to_string(),
            &touched,
            LogOptions {
                description: options.description.clone(),
                context: Some(serde_json::json!({ "operation_id": id, "steps": steps.len() })),
            },
        );

        let sizes: Vec<u64> = steps.iter().map(BatchStep::expected_bytes).collect();
        let total: u64 = sizes.iter().sum();

        if let Err(e) = self.write_sidecar(&operation, total) {
            let error = format!("failed to write lock sidecar: {}", e);
            self.finish(id, OperationStatus::Failed, 0, Vec::new(), Vec::new(), Some(error.clone()));
            self.ctx
                .logger()
                .complete_operation(&log_id, LogStatus::Failure, Some(&error), None);
            return OperationResult::fail(id, 0, started.elapsed(), error);
        }

        let mut rec = StepRecorder::default();
        let mut completed = 0usize;
        let mut processed = 0u64;
        let mut failure: Option<GuardError> = None;
        let mut cancelled = false;
        let mut timeout_reported = false;

        for (index, step) in steps.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                cancelled = true;
                failure = Some(GuardError::StepFailed {
                    index,
                    kind: step.kind().to_string(),
                    reason: "operation cancelled during execution".to_string(),
                });
                break;
            }

            let outcome = self.run_step_with_retries(id, step, &options, fsync, &mut rec);
            self.record_progress(id, &rec, completed);
            #[cfg(test)]
            self.after_step(index);

            if let Err(e) = outcome {
                warn!(operation_id = %id, step = index, kind = %step.kind(), error = %e, "Step failed");
                failure = Some(GuardError::StepFailed {
                    index,
                    kind: step.kind().to_string(),
                    reason: e.to_string(),
                });
                break;
            }

            completed += 1;
            processed += sizes[index];
            self.record_progress(id, &rec, completed);
            if let Err(e) = self.ctx.sidecars().update_progress(
                id,
                OperationProgress::new(total, processed),
                self.ctx.now_millis(),
            ) {
                warn!(operation_id = %id, error = %e, "Failed to update sidecar progress");
            }

            if let Some(limit) = options.timeout {
                if !timeout_reported && started.elapsed() > limit {
                    warn!(operation_id = %id, timeout_ms = limit.as_millis() as u64, "Operation exceeded its advisory timeout");
                    timeout_reported = true;
                }
            }
        }

        // A cancel that landed during the last step still wins
        if failure.is_none() && !self.seal(id, &cancel) {
            cancelled = true;
            failure = Some(GuardError::StepFailed {
                index: steps.len().saturating_sub(1),
                kind: operation.kind.to_string(),
                reason: "operation cancelled during execution".to_string(),
            });
        }

        let Some(error) = failure else {
            let target_state = touched.iter().map(|p| FileSnapshot::capture(p)).collect();
            self.remove_sidecar(id);
            self.finish(id, OperationStatus::Completed, completed, rec.actions, target_state, None);
            self.ctx
                .logger()
                .complete_operation(&log_id, LogStatus::Success, None, None);
            info!(operation_id = %id, steps = completed, "Operation completed");
            return OperationResult::ok(
                id,
                completed,
                started.elapsed(),
                format!("{} step(s) applied", completed),
            );
        };

        let mut error_text = error.to_string();
        let (status, log_status) = if options.rollback_on_failure || cancelled {
            let failures = self.undo_actions(id, &rec.actions, fsync);
            if failures == 0 {
                self.remove_sidecar(id);
                (OperationStatus::RolledBack, LogStatus::RolledBack)
            } else {
                let incomplete = GuardError::RollbackIncomplete {
                    id: id.to_string(),
                    failures,
                };
                error_text = format!("{}; {}", error_text, incomplete);
                (OperationStatus::Failed, LogStatus::Failure)
            }
        } else {
            (OperationStatus::Failed, LogStatus::Failure)
        };

        self.finish(id, status, completed, rec.actions, Vec::new(), Some(error_text.clone()));
        self.ctx
            .logger()
            .complete_operation(&log_id, log_status, Some(&error_text), None);
        OperationResult::fail(id, completed, started.elapsed(), error_text)
    }

    /// Undoes a completed (or failed, non-rolled-back) operation.
    ///
    /// For an executing operation this requests rollback at the next step
    /// boundary.
    pub fn rollback_operation(&self, id: &str) -> OperationResult {
        let started = Instant::now();

        let actions = {
            let mut state = match self.lock_state() {
                Ok(s) => s,
                Err(e) => return OperationResult::fail(id, 0, started.elapsed(), e),
            };

            if let Some(entry) = state.active.get(id) {
                let status = entry.operation.status;
                if status == OperationStatus::Executing {
                    entry.cancel.store(true, Ordering::SeqCst);
                    return OperationResult::ok(
                        id,
                        0,
                        started.elapsed(),
                        "operation is executing; rollback requested",
                    );
                }
                return OperationResult::fail(
                    id,
                    0,
                    started.elapsed(),
                    GuardError::InvalidOperationState {
                        id: id.to_string(),
                        status: status.to_string(),
                        action: "roll back".to_string(),
                    },
                );
            }

            let Some(op) = state.history.iter_mut().find(|op| op.id == id) else {
                return OperationResult::fail(
                    id,
                    0,
                    started.elapsed(),
                    GuardError::OperationNotFound(id.to_string()),
                );
            };

            match op.status {
                OperationStatus::RolledBack => {
                    return OperationResult::fail(
                        id,
                        0,
                        started.elapsed(),
                        GuardError::AlreadyRolledBack(id.to_string()),
                    )
                }
                OperationStatus::Completed | OperationStatus::Failed => {}
                other => {
                    return OperationResult::fail(
                        id,
                        0,
                        started.elapsed(),
                        GuardError::InvalidOperationState {
                            id: id.to_string(),
                            status: other.to_string(),
                            action: "roll back".to_string(),
                        },
                    )
                }
            }
            // Claim the operation so a concurrent rollback sees it as busy
            op.status = OperationStatus::Executing;
            op.rollback_actions.clone()
        };

        let failures = self.undo_actions(id, &actions, self.config.fsync);
        let status = if failures == 0 {
            OperationStatus::RolledBack
        } else {
            OperationStatus::Failed
        };

        if let Ok(mut state) = self.lock_state() {
            if let Some(op) = state.history.iter_mut().find(|op| op.id == id) {
                op.status = status;
                op.finished_at = Some(self.ctx.now_millis());
                if failures > 0 {
                    op.error = Some(
                        GuardError::RollbackIncomplete {
                            id: id.to_string(),
                            failures,
                        }
                        .to_string(),
                    );
                }
            }
        }

        self.ctx.events().publish(GuardEvent::OperationFinished {
            id: id.to_string(),
            status,
        });

        let paths: Vec<PathBuf> = actions.iter().map(|a| a.path().to_path_buf()).collect();
        if failures == 0 {
            self.ctx.logger().log_operation(
                "rollback",
                LogStatus::RolledBack,
                &paths,
                LogOptions {
                    description: Some(format!("rollback of {}", id)),
                    context: None,
                },
            );
            info!(operation_id = %id, actions = actions.len(), "Operation rolled back");
            OperationResult::ok(
                id,
                actions.len(),
                started.elapsed(),
                format!("{} action(s) undone", actions.len()),
            )
        } else {
            self.ctx.logger().log_operation(
                "rollback",
                LogStatus::Failure,
                &paths,
                LogOptions {
                    description: Some(format!("incomplete rollback of {}", id)),
                    context: Some(serde_json::json!({ "failures": failures })),
                },
            );
            OperationResult::fail(
                id,
                actions.len() - failures,
                started.elapsed(),
                GuardError::RollbackIncomplete {
                    id: id.to_string(),
                    failures,
                },
            )
        }
    }

    /// Cancels a pending operation.
    ///
    /// An executing operation cannot be cancelled outright; the request is
    /// redirected to a rollback at the next step boundary.
    pub fn cancel_operation(&self, id: &str) -> OperationResult {
        let started = Instant::now();
        let mut state = match self.lock_state() {
            Ok(s) => s,
            Err(e) => return OperationResult::fail(id, 0, started.elapsed(), e),
        };

        let Some(entry) = state.active.get(id) else {
            let error = match state.history.iter().find(|op| op.id == id) {
                Some(op) => GuardError::InvalidOperationState {
                    id: id.to_string(),
                    status: op.status.to_string(),
                    action: "cancel".to_string(),
                },
                None => GuardError::OperationNotFound(id.to_string()),
            };
            return OperationResult::fail(id, 0, started.elapsed(), error);
        };

        match entry.operation.status {
            OperationStatus::Executing => {
                entry.cancel.store(true, Ordering::SeqCst);
                return OperationResult::ok(
                    id,
                    0,
                    started.elapsed(),
                    "operation is executing; cancellation redirected to rollback",
                );
            }
            OperationStatus::Pending => {}
            other => {
                return OperationResult::fail(
                    id,
                    0,
                    started.elapsed(),
                    GuardError::InvalidOperationState {
                        id: id.to_string(),
                        status: other.to_string(),
                        action: "cancel".to_string(),
                    },
                )
            }
        }

        let Some(entry) = state.active.remove(id) else {
            return OperationResult::fail(id, 0, started.elapsed(), GuardError::OperationNotFound(id.to_string()));
        };
        let mut operation = entry.operation;
        operation.status = OperationStatus::Cancelled;
        operation.finished_at = Some(self.ctx.now_millis());
        let paths = operation.touched_paths();
        let kind = operation.kind;
        self.push_history(&mut state, operation);
        drop(state);

        self.ctx.events().publish(GuardEvent::OperationFinished {
            id: id.to_string(),
            status: OperationStatus::Cancelled,
        });
        self.ctx.logger().log_operation(
            &kind.to_string(),
            LogStatus::Cancelled,
            &paths,
            LogOptions::default(),
        );
        OperationResult::ok(id, 0, started.elapsed(), "operation cancelled")
    }

    /// Current status of an operation, active or in history.
    pub fn get_operation_status(&self, id: &str) -> Option<OperationStatus> {
        self.get_operation(id).map(|op| op.status)
    }

    /// Snapshot of an operation, active or in history.
    pub fn get_operation(&self, id: &str) -> Option<AtomicOperation> {
        let state = self.lock_state().ok()?;
        state
            .active
            .get(id)
            .map(|entry| entry.operation.clone())
            .or_else(|| state.history.iter().find(|op| op.id == id).cloned())
    }

    /// Returns true while the operation is pending or executing.
    pub fn is_active(&self, id: &str) -> bool {
        self.lock_state()
            .map(|s| s.active.contains_key(id))
            .unwrap_or(false)
    }

    /// Pending and executing operations.
    pub fn list_operations(&self) -> Vec<AtomicOperation> {
        let Ok(state) = self.lock_state() else {
            return Vec::new();
        };
        let mut ops: Vec<_> = state.active.values().map(|e| e.operation.clone()).collect();
        ops.sort_by_key(|op| op.timestamp);
        ops
    }

    /// Terminal operations, oldest first.
    pub fn history(&self) -> Vec<AtomicOperation> {
        self.lock_state()
            .map(|s| s.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forgets history entries older than `max_age_hours` and deletes
    /// holding files no longer referenced by any known operation.
    pub fn cleanup(&self, max_age_hours: u64) -> OperationResult {
        let started = Instant::now();
        let max_age = Duration::from_secs(max_age_hours.saturating_mul(60 * 60));
        let cutoff = millis_before(self.ctx.now_millis(), max_age);

        let (removed_history, known): (usize, Vec<String>) = match self.lock_state() {
            Ok(mut state) => {
                let before = state.history.len();
                state
                    .history
                    .retain(|op| op.finished_at.unwrap_or(op.timestamp) >= cutoff);
                let known = state
                    .active
                    .keys()
                    .cloned()
                    .chain(state.history.iter().map(|op| op.id.clone()))
                    .collect();
                (before - state.history.len(), known)
            }
            Err(e) => return OperationResult::fail("", 0, started.elapsed(), e),
        };

        let hold_dir = self.ctx.hold_dir();
        let mut removed_hold = 0usize;
        if let Ok(entries) = fs::read_dir(&hold_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if known.contains(&name) {
                    continue;
                }
                match fs::remove_dir_all(entry.path()) {
                    Ok(()) => removed_hold += 1,
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "Failed to remove holding directory")
                    }
                }
            }
        }

        info!(history = removed_history, hold = removed_hold, "Atomic manager cleanup");
        OperationResult::ok(
            "",
            removed_history + removed_hold,
            started.elapsed(),
            format!(
                "removed {} history entr(ies) and {} holding director(ies)",
                removed_history, removed_hold
            ),
        )
    }

    /// Commits to completion once every step has run.
    ///
    /// Returns false when a cancel or rollback request was accepted first.
    /// Otherwise the entry is marked completed under the state lock, so a
    /// later request is refused instead of silently dropped.
    fn seal(&self, id: &str, cancel: &AtomicBool) -> bool {
        let Ok(mut state) = self.lock_state() else {
            return !cancel.load(Ordering::SeqCst);
        };
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        if let Some(entry) = state.active.get_mut(id) {
            entry.operation.status = OperationStatus::Completed;
        }
        true
    }

    #[cfg(test)]
    fn after_step(&self, index: usize) {
        if let Ok(hook) = self.step_hook.lock() {
            if let Some(hook) = hook.as_ref() {
                hook(index);
            }
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ManagerState>> {
        self.state
            .lock()
            .map_err(|_| GuardError::StatePoisoned("atomic manager"))
    }

    /// Transitions a pending operation to executing.
    fn begin(&self, id: &str) -> Result<(AtomicOperation, OperationOptions, Arc<AtomicBool>)> {
        let mut state = self.lock_state()?;

        let Some(entry) = state.active.get(id) else {
            return Err(match state.history.iter().find(|op| op.id == id) {
                Some(op) => GuardError::InvalidOperationState {
                    id: id.to_string(),
                    status: op.status.to_string(),
                    action: "execute".to_string(),
                },
                None => GuardError::OperationNotFound(id.to_string()),
            });
        };

        if entry.operation.status != OperationStatus::Pending {
            return Err(GuardError::InvalidOperationState {
                id: id.to_string(),
                status: entry.operation.status.to_string(),
                action: "execute".to_string(),
            });
        }

        for dep in &entry.options.dependencies {
            let dep_status = state
                .history
                .iter()
                .find(|op| &op.id == dep)
                .map(|op| op.status)
                .or_else(|| state.active.get(dep).map(|e| e.operation.status));
            if dep_status != Some(OperationStatus::Completed) {
                return Err(GuardError::InvalidOperationState {
                    id: dep.clone(),
                    status: dep_status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                    action: format!("satisfy dependency of {}", id),
                });
            }
        }

        let entry = state
            .active
            .get_mut(id)
            .ok_or_else(|| GuardError::OperationNotFound(id.to_string()))?;
        entry.operation.status = OperationStatus::Executing;
        Ok((
            entry.operation.clone(),
            entry.options.clone(),
            entry.cancel.clone(),
        ))
    }

    /// Mirrors executor-local progress into the active operation.
    fn record_progress(&self, id: &str, rec: &StepRecorder, completed: usize) {
        if let Ok(mut state) = self.lock_state() {
            if let Some(entry) = state.active.get_mut(id) {
                entry.operation.rollback_actions = rec.actions.clone();
                entry.operation.metadata.backups = rec.backups.clone();
                entry.operation.completed_steps = completed;
            }
        }
    }

    fn finish(
        &self,
        id: &str,
        status: OperationStatus,
        completed: usize,
        actions: Vec<RollbackAction>,
        target_state: Vec<FileSnapshot>,
        error: Option<String>,
    ) {
        if let Ok(mut state) = self.lock_state() {
            if let Some(entry) = state.active.remove(id) {
                let mut operation = entry.operation;
                operation.status = status;
                operation.completed_steps = completed;
                operation.rollback_actions = actions;
                operation.target_state = target_state;
                operation.error = error;
                operation.finished_at = Some(self.ctx.now_millis());
                self.push_history(&mut state, operation);
            }
        }
        self.ctx.events().publish(GuardEvent::OperationFinished {
            id: id.to_string(),
            status,
        });
    }

    fn push_history(&self, state: &mut ManagerState, operation: AtomicOperation) {
        state.history.push_back(operation);
        while state.history.len() > self.config.history_limit.max(1) {
            state.history.pop_front();
        }
    }

    fn write_sidecar(&self, operation: &AtomicOperation, total: u64) -> Result<()> {
        let single = match operation.steps.as_slice() {
            [step] => Some(step),
            _ => None,
        };
        let temp_files = operation
            .steps
            .iter()
            .filter(|s| {
                matches!(
                    s,
                    BatchStep::Write { .. } | BatchStep::Create { .. } | BatchStep::Copy { .. }
                )
            })
            .map(|s| partial_path(s.target(), &operation.id))
            .collect();
        let now = self.ctx.now_millis();

        self.ctx.sidecars().write(&LockSidecar {
            operation_id: operation.id.clone(),
            kind: operation.kind,
            source: single.and_then(|s| s.source()).map(Path::to_path_buf),
            target: single.map(|s| s.target().to_path_buf()),
            progress: OperationProgress::new(total, 0),
            process_id: std::process::id(),
            session_id: self.ctx.session_id().to_string(),
            temp_files,
            created_at: now,
            updated_at: now,
        })?;
        Ok(())
    }

    fn remove_sidecar(&self, id: &str) {
        if let Err(e) = self.ctx.sidecars().remove(id) {
            warn!(operation_id = %id, error = %e, "Failed to remove sidecar");
        }
    }

    /// Undoes actions in reverse order. Individual failures are logged and
    /// counted; the remaining actions still run.
    fn undo_actions(&self, id: &str, actions: &[RollbackAction], fsync: bool) -> usize {
        let mut failures = 0;
        for (index, action) in actions.iter().enumerate().rev() {
            if let Err(e) = action.undo(fsync) {
                failures += 1;
                warn!(
                    operation_id = %id,
                    action = index,
                    path = %action.path().display(),
                    error = %e,
                    "Rollback action failed"
                );
            }
        }
        if failures == 0 {
            debug!(operation_id = %id, actions = actions.len(), "Rollback complete");
        }
        failures
    }

    fn run_step_with_retries(
        &self,
        id: &str,
        step: &BatchStep,
        opts: &OperationOptions,
        fsync: bool,
        rec: &mut StepRecorder,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.run_step(id, step, opts, fsync, rec) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < opts.retry_count => {
                    attempt += 1;
                    warn!(operation_id = %id, attempt = attempt, error = %e, "Retrying step");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn run_step(
        &self,
        id: &str,
        step: &BatchStep,
        opts: &OperationOptions,
        fsync: bool,
        rec: &mut StepRecorder,
    ) -> Result<()> {
        match step {
            BatchStep::Write { path, content } => {
                let prior = match fs::symlink_metadata(path) {
                    Ok(meta) if meta.is_dir() => {
                        return Err(GuardError::DestinationExists(path.clone()))
                    }
                    Ok(meta) => Some(meta),
                    Err(_) => None,
                };
                ensure_parents(path, opts.create_parents, rec)?;

                let undo = match &prior {
                    // The link itself is held so rollback puts it back as a link
                    Some(meta) if meta.file_type().is_symlink() => {
                        self.backup_if_requested(path, opts, id, rec)?;
                        let held = self.hold_path(id, rec, path);
                        relocate(path, &held)?;
                        RollbackAction::RestoreFile {
                            path: path.clone(),
                            from: held,
                        }
                    }
                    Some(meta) => {
                        self.backup_if_requested(path, opts, id, rec)?;
                        RollbackAction::RestoreContent {
                            path: path.clone(),
                            content: fs::read(path).map_err(|e| GuardError::at(path, e))?,
                            modified: modified_millis(meta),
                            accessed: accessed_millis(meta),
                            mode: Some(mode_of(meta)),
                        }
                    }
                    None => RollbackAction::DeleteFile { path: path.clone() },
                };

                if let Err(e) = write_staged(path, &partial_path(path, id), content, fsync) {
                    // Nothing was written, but a displaced link must come back
                    if matches!(undo, RollbackAction::RestoreFile { .. }) {
                        rec.actions.push(undo);
                    }
                    return Err(e);
                }
                if let Some(meta) = prior.as_ref().filter(|m| !m.file_type().is_symlink()) {
                    set_mode(path, mode_of(meta))?;
                }
                rec.actions.push(undo);
            }
            BatchStep::Create { path, content } => {
                if fs::symlink_metadata(path).is_ok() {
                    return Err(GuardError::DestinationExists(path.clone()));
                }
                ensure_parents(path, opts.create_parents, rec)?;
                write_staged(path, &partial_path(path, id), content, fsync)?;
                rec.actions.push(RollbackAction::DeleteFile { path: path.clone() });
            }
            BatchStep::Delete { path } => {
                let meta = fs::symlink_metadata(path)
                    .map_err(|_| GuardError::SourceMissing(path.clone()))?;
                if meta.is_dir() {
                    return Err(GuardError::at(
                        path,
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            "is a directory, use rmdir",
                        ),
                    ));
                }
                self.backup_if_requested(path, opts, id, rec)?;
                let held = self.hold_path(id, rec, path);
                relocate(path, &held)?;
                rec.actions.push(RollbackAction::RestoreFile {
                    path: path.clone(),
                    from: held,
                });
            }
            BatchStep::Move {
                source,
                destination,
            } => {
                if fs::symlink_metadata(source).is_err() {
                    return Err(GuardError::SourceMissing(source.clone()));
                }
                if source == destination {
                    return Ok(());
                }
                ensure_parents(destination, opts.create_parents, rec)?;
                self.displace_destination(id, destination, opts, rec)?;
                relocate(source, destination)?;
                rec.actions.push(RollbackAction::RestoreFile {
                    path: source.clone(),
                    from: destination.clone(),
                });
            }
            BatchStep::Copy {
                source,
                destination,
            } => {
                match fs::metadata(source) {
                    Ok(meta) if meta.is_file() => {}
                    _ => return Err(GuardError::SourceMissing(source.clone())),
                }
                ensure_parents(destination, opts.create_parents, rec)?;
                self.displace_destination(id, destination, opts, rec)?;
                copy_staged(source, destination, &partial_path(destination, id), fsync)?;
                rec.actions.push(RollbackAction::DeleteFile {
                    path: destination.clone(),
                });
            }
            BatchStep::Chmod { path, mode } => {
                let meta =
                    fs::metadata(path).map_err(|_| GuardError::SourceMissing(path.clone()))?;
                let previous = mode_of(&meta);
                set_mode(path, *mode)?;
                rec.actions.push(RollbackAction::RestorePermissions {
                    path: path.clone(),
                    mode: previous,
                });
            }
            BatchStep::Mkdir { path } => match fs::symlink_metadata(path) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => return Err(GuardError::DestinationExists(path.clone())),
                Err(_) => create_dir_chain(path, rec)?,
            },
            BatchStep::Rmdir { path } => {
                let meta = fs::symlink_metadata(path)
                    .map_err(|_| GuardError::SourceMissing(path.clone()))?;
                if !meta.is_dir() {
                    return Err(GuardError::at(
                        path,
                        std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
                    ));
                }
                let held = self.hold_path(id, rec, path);
                relocate(path, &held)?;
                rec.actions.push(RollbackAction::RestoreFile {
                    path: path.clone(),
                    from: held,
                });
            }
        }
        Ok(())
    }

    /// Moves an existing destination file into the holding area.
    fn displace_destination(
        &self,
        id: &str,
        destination: &Path,
        opts: &OperationOptions,
        rec: &mut StepRecorder,
    ) -> Result<()> {
        let Ok(meta) = fs::symlink_metadata(destination) else {
            return Ok(());
        };
        if meta.is_dir() {
            return Err(GuardError::DestinationExists(destination.to_path_buf()));
        }
        self.backup_if_requested(destination, opts, id, rec)?;
        let held = self.hold_path(id, rec, destination);
        relocate(destination, &held)?;
        rec.actions.push(RollbackAction::RestoreFile {
            path: destination.to_path_buf(),
            from: held,
        });
        Ok(())
    }

    fn backup_if_requested(
        &self,
        path: &Path,
        opts: &OperationOptions,
        id: &str,
        rec: &mut StepRecorder,
    ) -> Result<()> {
        if opts.backup || self.config.backup_by_default {
            let backup = self
                .ctx
                .backups()
                .create_backup(path, &format!("atomic operation {}", id))?;
            rec.backups.push(backup);
        }
        Ok(())
    }

    fn hold_path(&self, id: &str, rec: &StepRecorder, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entry".to_string());
        self.ctx
            .hold_dir()
            .join(id)
            .join(format!("{}-{}", rec.actions.len(), name))
    }
}

impl std::fmt::Debug for AtomicManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicManager")
            .field("config", &self.config)
            .finish()
    }
}

fn absolutize_step(step: BatchStep) -> BatchStep {
    match step {
        BatchStep::Write { path, content } => BatchStep::Write {
            path: absolutize(&path),
            content,
        },
        BatchStep::Create { path, content } => BatchStep::Create {
            path: absolutize(&path),
            content,
        },
        BatchStep::Delete { path } => BatchStep::Delete {
            path: absolutize(&path),
        },
        BatchStep::Move {
            source,
            destination,
        } => BatchStep::Move {
            source: absolutize(&source),
            destination: absolutize(&destination),
        },
        BatchStep::Copy {
            source,
            destination,
        } => BatchStep::Copy {
            source: absolutize(&source),
            destination: absolutize(&destination),
        },
        BatchStep::Chmod { path, mode } => BatchStep::Chmod {
            path: absolutize(&path),
            mode,
        },
        BatchStep::Mkdir { path } => BatchStep::Mkdir {
            path: absolutize(&path),
        },
        BatchStep::Rmdir { path } => BatchStep::Rmdir {
            path: absolutize(&path),
        },
    }
}

/// Creates missing parent directories of `path`, recording each one.
fn ensure_parents(path: &Path, create: bool, rec: &mut StepRecorder) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.exists() {
        return Ok(());
    }
    if !create {
        return Err(GuardError::at(
            parent,
            std::io::Error::new(std::io::ErrorKind::NotFound, "parent directory does not exist"),
        ));
    }
    create_dir_chain(parent, rec)
}

/// Creates `dir` and its missing ancestors top-down, pushing one
/// `DeleteDirectory` per created directory.
fn create_dir_chain(dir: &Path, rec: &mut StepRecorder) -> Result<()> {
    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(d) = current {
        if d.as_os_str().is_empty() || d.exists() {
            break;
        }
        missing.push(d.to_path_buf());
        current = d.parent();
    }

    for d in missing.into_iter().rev() {
        fs::create_dir(&d).map_err(|e| GuardError::at(&d, e))?;
        rec.actions.push(RollbackAction::DeleteDirectory { path: d });
    }
    Ok(())
}
