//! Interrupted operations, recovery plans and results.

use crate::atomic::OperationKind;
use crate::sidecar::OperationProgress;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle of an interrupted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptedStatus {
    /// Found, not yet analyzed.
    Detecting,
    /// Plan computed.
    Analyzed,
    /// Confidence above the threshold.
    Recoverable,
    /// Needs a human decision.
    Unrecoverable,
    /// Recovered; no longer pending.
    Recovered,
    /// Given up on.
    Abandoned,
}

impl InterruptedStatus {
    /// Returns true for `Recovered` and `Abandoned`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Recovered | Self::Abandoned)
    }
}

impl fmt::Display for InterruptedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Detecting => "detecting",
            Self::Analyzed => "analyzed",
            Self::Recoverable => "recoverable",
            Self::Unrecoverable => "unrecoverable",
            Self::Recovered => "recovered",
            Self::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// Risk of applying a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Low.
    Low,
    /// Medium.
    Medium,
    /// High.
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

/// How an interrupted operation is brought to rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Finish a partial copy from where it stopped.
    Resume,
    /// Discard partial state and redo the step.
    Restart,
    /// Discard partial artifacts only.
    Rollback,
    /// Leave it to a human.
    Manual,
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Resume => "resume",
            Self::Restart => "restart",
            Self::Rollback => "rollback",
            Self::Manual => "manual",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RecoveryStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resume" => Ok(Self::Resume),
            "restart" => Ok(Self::Restart),
            "rollback" => Ok(Self::Rollback),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown recovery strategy: {}", other)),
        }
    }
}

/// Scored plan for one interrupted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    /// Chosen strategy.
    pub strategy: RecoveryStrategy,
    /// Confidence 0-100.
    pub confidence: u8,
    /// Rough time to apply the plan.
    pub estimated_time: Duration,
    /// Risk.
    pub risk: RiskLevel,
    /// Why this plan was chosen.
    pub reason: String,
}

/// Where an interruption was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionSource {
    /// A lock sidecar outlived its process.
    Sidecar,
    /// A partial file with no sidecar referencing it.
    OrphanedPartial,
    /// A registered detector, by name.
    Detector(String),
}

/// Process and artifact details of an interrupted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptedMetadata {
    /// Process that owned the operation.
    pub process_id: u32,
    /// Session that owned the operation.
    pub session_id: String,
    /// Sidecar file, if any.
    pub lock_file: Option<PathBuf>,
    /// Staging files that may hold partial output.
    pub temp_files: Vec<PathBuf>,
}

/// An operation whose owning process died before it finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptedOperation {
    /// Atomic operation ID, or a derived ID for orphans.
    pub id: String,
    /// Operation kind.
    pub kind: OperationKind,
    /// Unix ms when the operation started.
    pub timestamp: i64,
    /// Status.
    pub status: InterruptedStatus,
    /// Where it was found.
    pub source_of_detection: InterruptionSource,
    /// Source path (move/copy).
    pub source: Option<PathBuf>,
    /// Target path.
    pub target: Option<PathBuf>,
    /// Last recorded progress.
    pub progress: OperationProgress,
    /// Owner and artifacts.
    pub metadata: InterruptedMetadata,
    /// Computed plan.
    pub plan: Option<RecoveryPlan>,
}

/// Outcome of a recovery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryResult {
    /// Whether the operation is now recovered.
    pub success: bool,
    /// Interrupted operation ID.
    pub operation_id: String,
    /// Strategy applied.
    pub strategy: Option<RecoveryStrategy>,
    /// Outcome text.
    pub message: Option<String>,
    /// Failure text.
    pub error: Option<String>,
    /// Time spent.
    pub duration: Duration,
}

impl RecoveryResult {
    pub(crate) fn ok(id: &str, strategy: RecoveryStrategy, message: String, duration: Duration) -> Self {
        Self {
            success: true,
            operation_id: id.to_string(),
            strategy: Some(strategy),
            message: Some(message),
            error: None,
            duration,
        }
    }

    pub(crate) fn fail(
        id: &str,
        strategy: Option<RecoveryStrategy>,
        duration: Duration,
        error: impl ToString,
    ) -> Self {
        Self {
            success: false,
            operation_id: id.to_string(),
            strategy,
            message: None,
            error: Some(error.to_string()),
            duration,
        }
    }
}

/// Counters over known interrupted operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryStats {
    /// Entries tracked.
    pub total: usize,
    /// Recoverable and waiting.
    pub recoverable: usize,
    /// Waiting for a human.
    pub unrecoverable: usize,
    /// Recovered.
    pub recovered: usize,
    /// Abandoned.
    pub abandoned: usize,
    /// Planned strategies.
    pub by_strategy: HashMap<RecoveryStrategy, usize>,
    /// Mean plan confidence, 0 when nothing is planned.
    pub average_confidence: f64,
}
