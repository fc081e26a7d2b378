//! Lock claims, conflicts and resolution records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Operation a lock claim announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOperation {
    /// Reading; never conflicts.
    Read,
    /// Replacing content.
    Write,
    /// Appending content.
    Append,
    /// Deleting.
    Delete,
    /// Moving.
    Move,
    /// Renaming in place; compatibility as for `Move`.
    Rename,
    /// Changing permissions.
    Chmod,
}

impl fmt::Display for LockOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Append => "append",
            Self::Delete => "delete",
            Self::Move => "move",
            Self::Rename => "rename",
            Self::Chmod => "chmod",
        };
        f.write_str(s)
    }
}

/// A process's advisory claim on a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockClaim {
    /// Claiming process.
    pub process_id: u32,
    /// Announced operation.
    pub operation: LockOperation,
    /// Unix ms when the claim was made.
    pub timestamp: i64,
}

/// Kind of collision between two claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Two writers.
    WriteWrite,
    /// A writer and a deleter.
    WriteDelete,
    /// Two movers.
    MoveMove,
    /// Two renamers.
    RenameRename,
    /// A permission change against another mutation.
    PermissionChange,
    /// Any other incompatible pair.
    ConcurrentAccess,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WriteWrite => "write_write",
            Self::WriteDelete => "write_delete",
            Self::MoveMove => "move_move",
            Self::RenameRename => "rename_rename",
            Self::PermissionChange => "permission_change",
            Self::ConcurrentAccess => "concurrent_access",
        };
        f.write_str(s)
    }
}

/// Assessed severity of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    /// Low.
    Low,
    /// Medium.
    Medium,
    /// High.
    High,
    /// Critical (system paths).
    Critical,
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    /// Newly found.
    Detected,
    /// A resolution is being applied.
    Analyzing,
    /// Settled.
    Resolved,
    /// Needs a human.
    Escalated,
    /// Deliberately left alone.
    Ignored,
}

/// How a conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Back up the file; the latest claim proceeds.
    BackupResolve,
    /// The earliest claim proceeds.
    TimestampPriority,
    /// Alias of `BackupResolve`; no content merge is performed.
    AutoMerge,
    /// Release every claim.
    AbortAll,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BackupResolve => "backup_resolve",
            Self::TimestampPriority => "timestamp_priority",
            Self::AutoMerge => "auto_merge",
            Self::AbortAll => "abort_all",
        };
        f.write_str(s)
    }
}

/// One contending claim inside a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictClaim {
    /// Contended path.
    pub path: PathBuf,
    /// Claimed operation.
    pub operation: LockOperation,
    /// Claiming process.
    pub process_id: u32,
    /// Claim time (unix ms).
    pub timestamp: i64,
}

/// Resolution applied to a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// Strategy used.
    pub strategy: ResolutionStrategy,
    /// Confidence 0-100.
    pub confidence: u8,
    /// `auto` or `caller`.
    pub applied_by: String,
    /// Outcome text.
    pub result: String,
    /// Unix ms.
    pub applied_at: i64,
}

/// Lock-table context captured with a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConflictContext {
    /// Processes holding claims on the path at detection time.
    pub lock_holders: Vec<u32>,
    /// Processes taking part in the conflict.
    pub affected_processes: Vec<u32>,
}

/// A detected collision on one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConflict {
    /// Conflict ID.
    pub id: String,
    /// Contended path.
    pub path: PathBuf,
    /// Kind.
    pub kind: ConflictKind,
    /// Severity.
    pub severity: ConflictSeverity,
    /// Status.
    pub status: ConflictStatus,
    /// Contending claims, oldest first.
    pub claims: Vec<ConflictClaim>,
    /// Applied resolution.
    pub resolution: Option<ConflictResolution>,
    /// Lock-table context.
    pub context: ConflictContext,
    /// Unix ms.
    pub detected_at: i64,
}

impl FileConflict {
    /// Distinct processes involved, in claim order.
    pub fn process_ids(&self) -> Vec<u32> {
        let mut pids = Vec::new();
        for claim in &self.claims {
            if !pids.contains(&claim.process_id) {
                pids.push(claim.process_id);
            }
        }
        pids
    }
}

/// Outcome of a resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    /// Whether the conflict is now resolved.
    pub success: bool,
    /// Conflict ID.
    pub conflict_id: String,
    /// Strategy attempted.
    pub strategy: Option<ResolutionStrategy>,
    /// Confidence 0-100.
    pub confidence: u8,
    /// Process allowed to proceed.
    pub winner: Option<u32>,
    /// Processes whose claims were released.
    pub released: Vec<u32>,
    /// Backup taken before resolving.
    pub backup: Option<PathBuf>,
    /// Outcome text.
    pub message: Option<String>,
    /// Failure text.
    pub error: Option<String>,
}

impl ResolutionResult {
    pub(crate) fn failed(conflict_id: &str, strategy: Option<ResolutionStrategy>, error: impl ToString) -> Self {
        Self {
            success: false,
            conflict_id: conflict_id.to_string(),
            strategy,
            confidence: 0,
            winner: None,
            released: Vec::new(),
            backup: None,
            message: None,
            error: Some(error.to_string()),
        }
    }
}

/// Aggregate counters over the resolver state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConflictStats {
    /// Conflicts detected or being analyzed.
    pub active: usize,
    /// Escalated conflicts awaiting a human.
    pub escalated: usize,
    /// Resolved conflicts in history.
    pub resolved: usize,
    /// Ignored conflicts in history.
    pub ignored: usize,
    /// Paths with at least one claim.
    pub locked_paths: usize,
    /// Claims across all paths.
    pub total_claims: usize,
    /// Conflicts per kind (open and historical).
    pub by_kind: HashMap<ConflictKind, usize>,
    /// Conflicts per severity (open and historical).
    pub by_severity: HashMap<ConflictSeverity, usize>,
}
