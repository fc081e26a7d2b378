//! Conflict Resolver.
//!
//! Keeps the advisory per-path lock table and turns incompatible claims
//! from different processes into [`FileConflict`]s, which are then
//! resolved by strategy or escalated.
//!
//! Locks only coordinate callers of this resolver instance. They do not
//! stop other programs from touching the same files.

mod matrix;
mod types;

pub use matrix::{assess_severity, classify, default_strategy, operations_conflict};
pub use types::{
    ConflictClaim, ConflictContext, ConflictKind, ConflictResolution, ConflictSeverity,
    ConflictStats, ConflictStatus, FileConflict, LockClaim, LockOperation, ResolutionResult,
    ResolutionStrategy,
};

use crate::config::ConflictConfig;
use crate::context::GuardContext;
use crate::error::{GuardError, Result};
use crate::events::GuardEvent;
use crate::fsutil::absolutize;
use crate::oplog::{LogOptions, LogStatus};
use matrix::strategy_confidence;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Default)]
struct ResolverState {
    /// The lock table. Check-then-insert happens under this mutex.
    locks: HashMap<PathBuf, Vec<LockClaim>>,
    /// Detected, analyzing and escalated conflicts.
    open: HashMap<String, FileConflict>,
    /// Resolved and ignored conflicts, oldest first.
    closed: VecDeque<FileConflict>,
}

impl ResolverState {
    fn open_conflict_on(&self, path: &Path) -> Option<String> {
        self.open
            .values()
            .filter(|c| c.path == path)
            .min_by_key(|c| c.detected_at)
            .map(|c| c.id.clone())
    }
}

/// Advisory lock table with conflict detection and resolution.
pub struct ConflictResolver {
    config: ConflictConfig,
    ctx: Arc<GuardContext>,
    state: Mutex<ResolverState>,
}

impl ConflictResolver {
    /// Creates a resolver using the shared guard context.
    pub fn new(config: ConflictConfig, ctx: Arc<GuardContext>) -> Self {
        Self {
            config,
            ctx,
            state: Mutex::new(ResolverState::default()),
        }
    }

    /// Records a claim by `process_id` to perform `operation` on `path`.
    ///
    /// The claim is always recorded. If it collides with claims of other
    /// processes a conflict is created (or an open one on the path is
    /// extended) and, when configured, resolved inline.
    ///
    /// Returns true when the caller may proceed: there was no conflict, or
    /// the conflict was resolved and the caller's claim survived.
    pub fn acquire_file_lock(&self, path: impl AsRef<Path>, operation: LockOperation, process_id: u32) -> bool {
        let path = absolutize(path.as_ref());
        let now = self.ctx.now_millis();

        let (conflict_id, created) = {
            let Ok(mut state) = self.lock_state() else {
                return false;
            };

            let claims = state.locks.entry(path.clone()).or_default();
            if claims
                .iter()
                .any(|c| c.process_id == process_id && c.operation == operation)
            {
                debug!(path = %path.display(), pid = process_id, "Lock already held");
                return true;
            }

            let contenders: Vec<LockClaim> = claims
                .iter()
                .filter(|c| c.process_id != process_id && operations_conflict(c.operation, operation))
                .copied()
                .collect();
            let claim = LockClaim {
                process_id,
                operation,
                timestamp: now,
            };
            claims.push(claim);
            let holders = distinct_pids(claims.iter().map(|c| c.process_id));

            if contenders.is_empty() {
                debug!(path = %path.display(), pid = process_id, op = %operation, "Lock acquired");
                return true;
            }

            match state.open_conflict_on(&path) {
                Some(id) => {
                    if let Some(conflict) = state.open.get_mut(&id) {
                        conflict.claims.push(to_conflict_claim(&path, &claim));
                        conflict.context.lock_holders = holders;
                        conflict.context.affected_processes = conflict.process_ids();
                    }
                    (id, None)
                }
                None => {
                    let kind = classify(contenders[0].operation, operation);
                    let mut claims: Vec<ConflictClaim> = contenders
                        .iter()
                        .map(|c| to_conflict_claim(&path, c))
                        .collect();
                    claims.push(to_conflict_claim(&path, &claim));
                    let conflict = self.new_conflict(&path, kind, claims, holders, now);
                    let id = conflict.id.clone();
                    state.open.insert(id.clone(), conflict.clone());
                    (id, Some(conflict))
                }
            }
        };

        if let Some(conflict) = created {
            self.announce(&conflict);
        }

        if self.config.resolve_on_acquire {
            let severity = self
                .get_conflict(&conflict_id)
                .map(|c| c.severity)
                .unwrap_or(ConflictSeverity::Critical);
            if self.auto_resolvable(severity) {
                let result = self.resolve_with(&conflict_id, None, "auto");
                if !result.success {
                    debug!(conflict_id = %conflict_id, error = ?result.error, "Inline resolution failed");
                }
            } else {
                self.escalate(
                    &conflict_id,
                    &format!("severity {} requires manual resolution", severity),
                );
            }
        }

        let Ok(state) = self.lock_state() else {
            return false;
        };
        let holds = state
            .locks
            .get(&path)
            .map(|claims| claims.iter().any(|c| c.process_id == process_id))
            .unwrap_or(false);
        holds && !state.open.contains_key(&conflict_id)
    }

    /// Drops every claim `process_id` holds on `path`.
    ///
    /// Open conflicts on the path that are left with at most one contending
    /// process are closed. Returns true if a claim was removed.
    pub fn release_file_lock(&self, path: impl AsRef<Path>, process_id: u32) -> bool {
        let path = absolutize(path.as_ref());
        let now = self.ctx.now_millis();

        let closed_ids = {
            let Ok(mut state) = self.lock_state() else {
                return false;
            };

            let Some(claims) = state.locks.get_mut(&path) else {
                return false;
            };
            let before = claims.len();
            claims.retain(|c| c.process_id != process_id);
            let removed = before != claims.len();
            let remaining = distinct_pids(claims.iter().map(|c| c.process_id));
            if claims.is_empty() {
                state.locks.remove(&path);
            }
            if !removed {
                return false;
            }

            let ended: Vec<String> = state
                .open
                .values()
                .filter(|c| c.path == path)
                .filter(|c| {
                    c.process_ids()
                        .iter()
                        .filter(|pid| remaining.contains(pid))
                        .count()
                        <= 1
                })
                .map(|c| c.id.clone())
                .collect();

            for id in &ended {
                if let Some(mut conflict) = state.open.remove(id) {
                    conflict.status = ConflictStatus::Resolved;
                    conflict.context.lock_holders = remaining.clone();
                    self.close(&mut state, conflict);
                }
            }
            ended
        };

        debug!(path = %path.display(), pid = process_id, closed = closed_ids.len(), "Lock released");
        for id in closed_ids {
            info!(conflict_id = %id, at = now, "Conflict closed by lock release");
        }
        true
    }

    /// Checks the claims on `paths` for collisions.
    ///
    /// Returns every open conflict on those paths, including ones created
    /// by this call.
    pub fn detect_conflicts(&self, paths: &[PathBuf]) -> Vec<FileConflict> {
        let now = self.ctx.now_millis();
        let mut created = Vec::new();
        let mut found = Vec::new();

        {
            let Ok(mut state) = self.lock_state() else {
                return Vec::new();
            };

            for raw in paths {
                let path = absolutize(raw);
                let Some(claims) = state.locks.get(&path) else {
                    continue;
                };

                let mut contending: Vec<LockClaim> = Vec::new();
                let mut kind = None;
                for (i, a) in claims.iter().enumerate() {
                    for b in &claims[i + 1..] {
                        if a.process_id != b.process_id && operations_conflict(a.operation, b.operation) {
                            kind.get_or_insert_with(|| classify(a.operation, b.operation));
                            for c in [a, b] {
                                if !contending.contains(c) {
                                    contending.push(*c);
                                }
                            }
                        }
                    }
                }
                let holders = distinct_pids(claims.iter().map(|c| c.process_id));

                let Some(kind) = kind else {
                    continue;
                };

                let has_open = state.open.values().any(|c| c.path == path);
                if !has_open {
                    contending.sort_by_key(|c| c.timestamp);
                    let claims = contending.iter().map(|c| to_conflict_claim(&path, c)).collect();
                    let conflict = self.new_conflict(&path, kind, claims, holders, now);
                    state.open.insert(conflict.id.clone(), conflict.clone());
                    created.push(conflict);
                }

                found.extend(state.open.values().filter(|c| c.path == path).cloned());
            }
        }

        for conflict in &created {
            self.announce(conflict);
        }
        found.sort_by_key(|c| c.detected_at);
        found
    }

    /// Re-scans every locked path. Used by the background monitor.
    pub fn scan_locked_paths(&self) -> Vec<FileConflict> {
        let paths: Vec<PathBuf> = match self.lock_state() {
            Ok(state) => state.locks.keys().cloned().collect(),
            Err(_) => return Vec::new(),
        };
        self.detect_conflicts(&paths)
    }

    /// Resolves a conflict with `strategy`, or the kind's default.
    pub fn resolve_conflict(&self, id: &str, strategy: Option<ResolutionStrategy>) -> ResolutionResult {
        self.resolve_with(id, strategy, "caller")
    }

    /// Resolves every detected conflict whose severity allows automatic
    /// resolution and escalates the rest.
    pub fn auto_resolve_conflicts(&self) -> Vec<ResolutionResult> {
        let pending: Vec<(String, ConflictSeverity)> = match self.lock_state() {
            Ok(state) => {
                let mut open: Vec<&FileConflict> = state
                    .open
                    .values()
                    .filter(|c| c.status == ConflictStatus::Detected)
                    .collect();
                open.sort_by_key(|c| c.detected_at);
                open.iter().map(|c| (c.id.clone(), c.severity)).collect()
            }
            Err(_) => return Vec::new(),
        };

        let mut results = Vec::new();
        for (id, severity) in pending {
            if self.auto_resolvable(severity) {
                results.push(self.resolve_with(&id, None, "auto"));
            } else {
                let reason = format!("severity {} requires manual resolution", severity);
                self.escalate(&id, &reason);
                results.push(ResolutionResult::failed(&id, None, reason));
            }
        }
        results
    }

    /// Marks an open conflict as ignored.
    pub fn ignore_conflict(&self, id: &str) -> Result<()> {
        let mut state = self.lock_state()?;
        let mut conflict = state
            .open
            .remove(id)
            .ok_or_else(|| GuardError::ConflictNotFound(id.to_string()))?;
        conflict.status = ConflictStatus::Ignored;
        self.close(&mut state, conflict);
        info!(conflict_id = %id, "Conflict ignored");
        Ok(())
    }

    /// Open conflicts (detected, analyzing or escalated), oldest first.
    pub fn get_active_conflicts(&self) -> Vec<FileConflict> {
        let Ok(state) = self.lock_state() else {
            return Vec::new();
        };
        let mut open: Vec<FileConflict> = state.open.values().cloned().collect();
        open.sort_by_key(|c| c.detected_at);
        open
    }

    /// Resolved and ignored conflicts, oldest first.
    pub fn resolved_conflicts(&self) -> Vec<FileConflict> {
        self.lock_state()
            .map(|s| s.closed.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Looks up a conflict, open or closed.
    pub fn get_conflict(&self, id: &str) -> Option<FileConflict> {
        let state = self.lock_state().ok()?;
        state
            .open
            .get(id)
            .cloned()
            .or_else(|| state.closed.iter().find(|c| c.id == id).cloned())
    }

    /// Claims currently held on `path`.
    pub fn get_lock_holders(&self, path: impl AsRef<Path>) -> Vec<LockClaim> {
        let path = absolutize(path.as_ref());
        self.lock_state()
            .ok()
            .and_then(|s| s.locks.get(&path).cloned())
            .unwrap_or_default()
    }

    /// Aggregate counters.
    pub fn get_conflict_stats(&self) -> ConflictStats {
        let Ok(state) = self.lock_state() else {
            return ConflictStats::default();
        };

        let mut stats = ConflictStats {
            locked_paths: state.locks.len(),
            total_claims: state.locks.values().map(Vec::len).sum(),
            ..ConflictStats::default()
        };
        for conflict in state.open.values().chain(state.closed.iter()) {
            match conflict.status {
                ConflictStatus::Detected | ConflictStatus::Analyzing => stats.active += 1,
                ConflictStatus::Escalated => stats.escalated += 1,
                ConflictStatus::Resolved => stats.resolved += 1,
                ConflictStatus::Ignored => stats.ignored += 1,
            }
            *stats.by_kind.entry(conflict.kind).or_default() += 1;
            *stats.by_severity.entry(conflict.severity).or_default() += 1;
        }
        stats
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ResolverState>> {
        self.state
            .lock()
            .map_err(|_| GuardError::StatePoisoned("conflict resolver"))
    }

    fn auto_resolvable(&self, severity: ConflictSeverity) -> bool {
        self.config.aggressive || severity <= ConflictSeverity::Medium
    }

    fn new_conflict(
        &self,
        path: &Path,
        kind: ConflictKind,
        claims: Vec<ConflictClaim>,
        holders: Vec<u32>,
        now: i64,
    ) -> FileConflict {
        let mut conflict = FileConflict {
            id: uuid::Uuid::new_v4().to_string(),
            path: path.to_path_buf(),
            kind,
            severity: assess_severity(path, kind),
            status: ConflictStatus::Detected,
            claims,
            resolution: None,
            context: ConflictContext {
                lock_holders: holders,
                affected_processes: Vec::new(),
            },
            detected_at: now,
        };
        conflict.context.affected_processes = conflict.process_ids();
        conflict
    }

    fn announce(&self, conflict: &FileConflict) {
        warn!(
            conflict_id = %conflict.id,
            path = %conflict.path.display(),
            kind = %conflict.kind,
            severity = %conflict.severity,
            "Conflict detected"
        );
        self.ctx.events().publish(GuardEvent::ConflictDetected {
            id: conflict.id.clone(),
            path: conflict.path.clone(),
            kind: conflict.kind,
            severity: conflict.severity,
        });
        if conflict.severity == ConflictSeverity::Critical {
            self.ctx.logger().log_security_event(
                "critical_conflict",
                serde_json::json!({
                    "conflict_id": conflict.id,
                    "path": conflict.path,
                    "kind": conflict.kind,
                    "processes": conflict.context.affected_processes,
                }),
            );
        }
    }

    fn escalate(&self, id: &str, reason: &str) {
        let Ok(mut state) = self.lock_state() else {
            return;
        };
        let changed = match state.open.get_mut(id) {
            Some(conflict) if conflict.status != ConflictStatus::Escalated => {
                conflict.status = ConflictStatus::Escalated;
                true
            }
            _ => false,
        };
        drop(state);

        if changed {
            warn!(conflict_id = %id, reason = %reason, "Conflict escalated");
            self.ctx.events().publish(GuardEvent::ConflictEscalated {
                id: id.to_string(),
                reason: reason.to_string(),
            });
        }
    }

    fn close(&self, state: &mut ResolverState, conflict: FileConflict) {
        state.closed.push_back(conflict);
        while state.closed.len() > self.config.resolved_history_limit.max(1) {
            state.closed.pop_front();
        }
    }

    fn resolve_with(&self, id: &str, strategy: Option<ResolutionStrategy>, applied_by: &str) -> ResolutionResult {
        let conflict = {
            let Ok(mut state) = self.lock_state() else {
                return ResolutionResult::failed(id, strategy, "resolver state unavailable");
            };
            let claimed = match state.open.get_mut(id) {
                Some(conflict) if conflict.status == ConflictStatus::Analyzing => {
                    return ResolutionResult::failed(id, strategy, "resolution already in progress");
                }
                Some(conflict) => {
                    conflict.status = ConflictStatus::Analyzing;
                    Some(conflict.clone())
                }
                None => None,
            };
            match claimed {
                Some(conflict) => conflict,
                None => {
                    let error = if state.closed.iter().any(|c| c.id == id) {
                        format!("conflict {} is already closed", id)
                    } else {
                        GuardError::ConflictNotFound(id.to_string()).to_string()
                    };
                    return ResolutionResult::failed(id, strategy, error);
                }
            }
        };

        let strategy = strategy.unwrap_or_else(|| default_strategy(conflict.kind));
        let mut backup = None;
        if matches!(
            strategy,
            ResolutionStrategy::BackupResolve | ResolutionStrategy::AutoMerge
        ) && conflict.path.is_file()
        {
            match self
                .ctx
                .backups()
                .create_backup(&conflict.path, &format!("conflict {}", id))
            {
                Ok(path) => backup = Some(path),
                Err(e) => {
                    let reason = format!("backup before resolution failed: {}", e);
                    self.escalate(id, &reason);
                    return ResolutionResult::failed(id, Some(strategy), reason);
                }
            }
        }

        let winner = match strategy {
            ResolutionStrategy::BackupResolve | ResolutionStrategy::AutoMerge => {
                conflict.claims.iter().max_by_key(|c| c.timestamp).map(|c| c.process_id)
            }
            ResolutionStrategy::TimestampPriority => {
                conflict.claims.iter().min_by_key(|c| c.timestamp).map(|c| c.process_id)
            }
            ResolutionStrategy::AbortAll => None,
        };
        let released: Vec<u32> = conflict
            .process_ids()
            .into_iter()
            .filter(|pid| Some(*pid) != winner)
            .collect();

        let mut result_text = match winner {
            Some(pid) => format!("process {} proceeds; released {:?}", pid, released),
            None => format!("all claims released: {:?}", released),
        };
        if strategy == ResolutionStrategy::AutoMerge {
            result_text.push_str("; auto_merge applies backup_resolve, no content merge performed");
        }
        let confidence = strategy_confidence(strategy);

        {
            let Ok(mut state) = self.lock_state() else {
                return ResolutionResult::failed(id, Some(strategy), "resolver state unavailable");
            };
            if let Some(claims) = state.locks.get_mut(&conflict.path) {
                claims.retain(|c| !released.contains(&c.process_id));
                if claims.is_empty() {
                    state.locks.remove(&conflict.path);
                }
            }
            if let Some(mut resolved) = state.open.remove(id) {
                resolved.status = ConflictStatus::Resolved;
                resolved.resolution = Some(ConflictResolution {
                    strategy,
                    confidence,
                    applied_by: applied_by.to_string(),
                    result: result_text.clone(),
                    applied_at: self.ctx.now_millis(),
                });
                self.close(&mut state, resolved);
            }
        }

        info!(conflict_id = %id, strategy = %strategy, winner = ?winner, "Conflict resolved");
        self.ctx.events().publish(GuardEvent::ConflictResolved {
            id: id.to_string(),
            strategy,
        });
        self.ctx.logger().log_operation(
            "conflict_resolution",
            LogStatus::Success,
            &[conflict.path.clone()],
            LogOptions {
                description: Some(result_text.clone()),
                context: Some(serde_json::json!({
                    "conflict_id": id,
                    "kind": conflict.kind,
                    "severity": conflict.severity,
                    "strategy": strategy,
                    "applied_by": applied_by,
                })),
            },
        );

        ResolutionResult {
            success: true,
            conflict_id: id.to_string(),
            strategy: Some(strategy),
            confidence,
            winner,
            released,
            backup,
            message: Some(result_text),
            error: None,
        }
    }
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("config", &self.config)
            .finish()
    }
}

fn to_conflict_claim(path: &Path, claim: &LockClaim) -> ConflictClaim {
    ConflictClaim {
        path: path.to_path_buf(),
        operation: claim.operation,
        process_id: claim.process_id,
        timestamp: claim.timestamp,
    }
}

fn distinct_pids(pids: impl Iterator<Item = u32>) -> Vec<u32> {
    let mut out = Vec::new();
    for pid in pids {
        if !out.contains(&pid) {
            out.push(pid);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        ctx: Arc<GuardContext>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            // Every clock read advances by 1 ms so claim order is strict
            let now = Arc::new(AtomicI64::new(1_000));
            let ctx = Arc::new(GuardContext::new(
                tmp.path().join(".fsguard"),
                &Config::default(),
                Arc::new(move || now.fetch_add(1, Ordering::SeqCst)),
            ));
            Self { tmp, ctx }
        }

        fn resolver(&self, config: ConflictConfig) -> ConflictResolver {
            ConflictResolver::new(config, self.ctx.clone())
        }

        fn manual() -> ConflictConfig {
            ConflictConfig {
                resolve_on_acquire: false,
                ..ConflictConfig::default()
            }
        }
    }

    #[test]
    fn test_uncontended_and_same_process() {
        let fx = Fixture::new();
        let resolver = fx.resolver(ConflictConfig::default());
        let path = fx.tmp.path().join("a.rs");

        assert!(resolver.acquire_file_lock(&path, LockOperation::Write, 1));
        assert!(resolver.acquire_file_lock(&path, LockOperation::Write, 1));
        assert!(resolver.acquire_file_lock(&path, LockOperation::Delete, 1));
        assert_eq!(resolver.get_lock_holders(&path).len(), 2);
        assert!(resolver.get_active_conflicts().is_empty());
    }

    #[test]
    fn test_read_claims_never_conflict() {
        let fx = Fixture::new();
        let resolver = fx.resolver(Fixture::manual());
        let path = fx.tmp.path().join("r.txt");

        for (pid, op) in [
            (1, LockOperation::Write),
            (2, LockOperation::Read),
            (3, LockOperation::Read),
        ] {
            assert!(resolver.acquire_file_lock(&path, op, pid));
        }
        assert!(resolver.detect_conflicts(&[path]).is_empty());
    }

    #[test]
    fn test_move_move_timestamp_priority() {
        let fx = Fixture::new();
        let resolver = fx.resolver(Fixture::manual());
        let c = fx.tmp.path().join("c.txt");
        std::fs::write(&c, b"existing").unwrap();

        assert!(resolver.acquire_file_lock(&c, LockOperation::Move, 100));
        assert!(!resolver.acquire_file_lock(&c, LockOperation::Move, 200));

        let conflicts = resolver.detect_conflicts(&[c.clone()]);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::MoveMove);
        assert_eq!(conflict.severity, ConflictSeverity::Medium);
        assert_eq!(default_strategy(conflict.kind), ResolutionStrategy::TimestampPriority);

        let result = resolver.resolve_conflict(&conflict.id, None);
        assert!(result.success);
        assert_eq!(result.strategy, Some(ResolutionStrategy::TimestampPriority));
        assert_eq!(result.winner, Some(100));
        assert_eq!(result.confidence, 90);

        let holders = resolver.get_lock_holders(&c);
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].process_id, 100);
        assert!(resolver.get_active_conflicts().is_empty());
    }

    #[test]
    fn test_inline_resolution_on_acquire() {
        let fx = Fixture::new();
        let resolver = fx.resolver(ConflictConfig::default());
        let path = fx.tmp.path().join("notes.txt");
        std::fs::write(&path, b"text").unwrap();

        assert!(resolver.acquire_file_lock(&path, LockOperation::Write, 1));
        // Write/write defaults to backup_resolve: the latest claim wins
        assert!(resolver.acquire_file_lock(&path, LockOperation::Write, 2));

        let holders = resolver.get_lock_holders(&path);
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].process_id, 2);

        let resolved = resolver.resolved_conflicts();
        assert_eq!(resolved.len(), 1);
        let resolution = resolved[0].resolution.as_ref().unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::BackupResolve);
        assert_eq!(resolution.applied_by, "auto");
        assert!(fx.ctx.backups().latest_backup(&path).unwrap().is_some());
    }

    #[test]
    fn test_high_severity_escalates() {
        let fx = Fixture::new();
        let resolver = fx.resolver(ConflictConfig::default());
        let path = fx.tmp.path().join("Cargo.toml");

        assert!(resolver.acquire_file_lock(&path, LockOperation::Write, 1));
        assert!(!resolver.acquire_file_lock(&path, LockOperation::Write, 2));

        let open = resolver.get_active_conflicts();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].severity, ConflictSeverity::High);
        assert_eq!(open[0].status, ConflictStatus::Escalated);
        assert_eq!(resolver.get_lock_holders(&path).len(), 2);
    }

    #[test]
    fn test_aggressive_resolves_high() {
        let fx = Fixture::new();
        let resolver = fx.resolver(ConflictConfig {
            resolve_on_acquire: false,
            aggressive: true,
            ..ConflictConfig::default()
        });
        let path = fx.tmp.path().join("settings.json");

        resolver.acquire_file_lock(&path, LockOperation::Write, 1);
        resolver.acquire_file_lock(&path, LockOperation::Delete, 2);

        let results = resolver.auto_resolve_conflicts();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert!(resolver.get_active_conflicts().is_empty());
    }

    #[test]
    fn test_auto_resolve_skips_high_without_aggressive() {
        let fx = Fixture::new();
        let resolver = fx.resolver(Fixture::manual());
        let low = fx.tmp.path().join("a.bin");
        let high = fx.tmp.path().join("b.bin");

        resolver.acquire_file_lock(&low, LockOperation::Chmod, 1);
        resolver.acquire_file_lock(&low, LockOperation::Chmod, 2);
        resolver.acquire_file_lock(&high, LockOperation::Write, 1);
        resolver.acquire_file_lock(&high, LockOperation::Delete, 2);

        let results = resolver.auto_resolve_conflicts();
        assert_eq!(results.iter().filter(|r| r.success).count(), 1);

        let open = resolver.get_active_conflicts();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, ConflictKind::WriteDelete);
        assert_eq!(open[0].status, ConflictStatus::Escalated);
    }

    #[test]
    fn test_abort_all_releases_everyone() {
        let fx = Fixture::new();
        let resolver = fx.resolver(Fixture::manual());
        let path = fx.tmp.path().join("x.dat");

        resolver.acquire_file_lock(&path, LockOperation::Rename, 1);
        resolver.acquire_file_lock(&path, LockOperation::Rename, 2);
        let conflict = resolver.get_active_conflicts().remove(0);
        assert_eq!(conflict.kind, ConflictKind::RenameRename);

        let result = resolver.resolve_conflict(&conflict.id, Some(ResolutionStrategy::AbortAll));
        assert!(result.success);
        assert_eq!(result.winner, None);
        assert_eq!(result.confidence, 100);
        assert!(resolver.get_lock_holders(&path).is_empty());
    }

    #[test]
    fn test_auto_merge_is_backup_alias() {
        let fx = Fixture::new();
        let resolver = fx.resolver(Fixture::manual());
        let path = fx.tmp.path().join("merge.txt");
        std::fs::write(&path, b"x").unwrap();

        resolver.acquire_file_lock(&path, LockOperation::Write, 1);
        resolver.acquire_file_lock(&path, LockOperation::Write, 2);
        let conflict = resolver.get_active_conflicts().remove(0);

        let result = resolver.resolve_conflict(&conflict.id, Some(ResolutionStrategy::AutoMerge));
        assert!(result.success);
        assert_eq!(result.winner, Some(2));
        assert!(result.backup.is_some());
        assert!(result.message.unwrap().contains("no content merge"));
    }

    #[test]
    fn test_release_closes_conflict() {
        let fx = Fixture::new();
        let resolver = fx.resolver(Fixture::manual());
        let path = fx.tmp.path().join("shared.log");

        resolver.acquire_file_lock(&path, LockOperation::Write, 1);
        resolver.acquire_file_lock(&path, LockOperation::Write, 2);
        assert_eq!(resolver.get_active_conflicts().len(), 1);

        assert!(resolver.release_file_lock(&path, 2));
        assert!(resolver.get_active_conflicts().is_empty());
        assert_eq!(resolver.resolved_conflicts()[0].status, ConflictStatus::Resolved);

        assert!(!resolver.release_file_lock(&path, 2));
        assert!(resolver.release_file_lock(&path, 1));
        assert_eq!(resolver.get_conflict_stats().locked_paths, 0);
    }

    #[test]
    fn test_ignore_and_stats() {
        let fx = Fixture::new();
        let resolver = fx.resolver(Fixture::manual());
        let path = fx.tmp.path().join("y.dat");

        resolver.acquire_file_lock(&path, LockOperation::Write, 1);
        resolver.acquire_file_lock(&path, LockOperation::Write, 2);
        resolver.acquire_file_lock(&path, LockOperation::Write, 3);

        let open = resolver.get_active_conflicts();
        assert_eq!(open.len(), 1, "third claim joins the open conflict");
        assert_eq!(open[0].process_ids(), vec![1, 2, 3]);

        resolver.ignore_conflict(&open[0].id).unwrap();
        assert!(resolver.ignore_conflict(&open[0].id).is_err());

        let stats = resolver.get_conflict_stats();
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.total_claims, 3);
        assert_eq!(stats.by_kind.get(&ConflictKind::WriteWrite), Some(&1));
    }

    #[test]
    fn test_resolve_unknown_conflict() {
        let fx = Fixture::new();
        let resolver = fx.resolver(ConflictConfig::default());
        let result = resolver.resolve_conflict("missing", None);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("conflict not found"));
    }

    #[test]
    fn test_conflict_events() {
        let fx = Fixture::new();
        let rx = fx.ctx.events().subscribe();
        let resolver = fx.resolver(ConflictConfig::default());
        let path = fx.tmp.path().join("ev.txt");

        resolver.acquire_file_lock(&path, LockOperation::Move, 1);
        resolver.acquire_file_lock(&path, LockOperation::Move, 2);

        let events: Vec<GuardEvent> = rx.try_iter().collect();
        assert!(matches!(events[0], GuardEvent::ConflictDetected { kind: ConflictKind::MoveMove, .. }));
        assert!(matches!(
            events[1],
            GuardEvent::ConflictResolved { strategy: ResolutionStrategy::TimestampPriority, .. }
        ));
    }

    #[test]
    fn test_concurrent_acquire_sees_conflict() {
        let fx = Fixture::new();
        let resolver = Arc::new(fx.resolver(Fixture::manual()));
        let path = fx.tmp.path().join("race.txt");

        let handles: Vec<_> = (1..=8u32)
            .map(|pid| {
                let resolver = resolver.clone();
                let path = path.clone();
                std::thread::spawn(move || resolver.acquire_file_lock(&path, LockOperation::Write, pid))
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        // Only the first claim can observe an empty table
        assert_eq!(granted, 1);
        assert_eq!(resolver.get_active_conflicts().len(), 1);
    }
}
