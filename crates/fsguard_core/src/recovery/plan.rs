//! Confidence scoring for interrupted operations.

use super::types::{InterruptedOperation, InterruptionSource, RecoveryPlan, RecoveryStrategy, RiskLevel};
use crate::atomic::OperationKind;
use crate::config::RecoveryConfig;
use crate::fsutil::duration_millis;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Filesystem facts a plan is computed from.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlanFacts {
    pub kind: OperationKind,
    pub orphan: bool,
    pub has_source: bool,
    pub source_exists: bool,
    /// First existing staging file, else the target for move/copy.
    pub payload: Option<(PathBuf, u64)>,
    pub expected_len: u64,
    pub age_ms: i64,
}

impl PlanFacts {
    /// Reads the facts for `op` from disk.
    pub fn gather(op: &InterruptedOperation, now: i64) -> Self {
        let len_of = |p: &PathBuf| fs::metadata(p).ok().filter(|m| m.is_file()).map(|m| m.len());

        let source_len = op.source.as_ref().and_then(len_of);
        let mut payload = op
            .metadata
            .temp_files
            .iter()
            .find_map(|p| len_of(p).map(|len| (p.clone(), len)));
        if payload.is_none() && matches!(op.kind, OperationKind::Move | OperationKind::Copy) {
            payload = op.target.as_ref().and_then(|t| len_of(t).map(|len| (t.clone(), len)));
        }

        let expected_len = if op.progress.total_size > 0 {
            op.progress.total_size
        } else {
            source_len.unwrap_or(0)
        };

        Self {
            kind: op.kind,
            orphan: op.source_of_detection == InterruptionSource::OrphanedPartial,
            has_source: op.source.is_some(),
            source_exists: op.source.as_ref().map(|s| s.exists()).unwrap_or(false),
            payload,
            expected_len,
            age_ms: now - op.timestamp,
        }
    }
}

fn transfer_time(bytes: u64, config: &RecoveryConfig) -> Duration {
    let rate = config.assumed_throughput_bytes_per_sec.max(1);
    Duration::from_secs_f64(bytes as f64 / rate as f64)
}

/// Scores a plan from gathered facts.
///
/// Base confidence is 50. Age beyond the recovery window costs 30 points
/// and forces high risk, so older interruptions never score higher.
pub(crate) fn score(facts: &PlanFacts, config: &RecoveryConfig) -> RecoveryPlan {
    let payload_len = facts.payload.as_ref().map(|(_, len)| *len).unwrap_or(0);
    let remaining = facts.expected_len.saturating_sub(payload_len);

    let (strategy, mut confidence, mut risk, estimated_time, reason): (
        RecoveryStrategy,
        u8,
        RiskLevel,
        Duration,
        String,
    ) = if facts.orphan {
        (
            RecoveryStrategy::Rollback,
            75,
            RiskLevel::Low,
            Duration::ZERO,
            "orphaned partial file; discard it".to_string(),
        )
    } else {
        match facts.kind {
            OperationKind::Move | OperationKind::Copy if facts.has_source => {
                if !facts.source_exists {
                    (
                        RecoveryStrategy::Manual,
                        10,
                        RiskLevel::High,
                        Duration::ZERO,
                        "source no longer exists".to_string(),
                    )
                } else {
                    let ratio = if facts.expected_len == 0 {
                        1.0
                    } else {
                        payload_len as f64 / facts.expected_len as f64
                    };
                    if ratio > 1.0 {
                        (
                            RecoveryStrategy::Restart,
                            40,
                            RiskLevel::Medium,
                            transfer_time(facts.expected_len, config),
                            "target is larger than the source".to_string(),
                        )
                    } else if ratio > 0.9 {
                        (
                            RecoveryStrategy::Resume,
                            90,
                            RiskLevel::Low,
                            transfer_time(remaining, config),
                            format!("{:.0}% transferred", ratio * 100.0),
                        )
                    } else if ratio > 0.5 {
                        (
                            RecoveryStrategy::Resume,
                            70,
                            RiskLevel::Medium,
                            transfer_time(remaining, config),
                            format!("{:.0}% transferred", ratio * 100.0),
                        )
                    } else {
                        (
                            RecoveryStrategy::Restart,
                            40,
                            RiskLevel::Medium,
                            transfer_time(facts.expected_len, config),
                            format!("only {:.0}% transferred", ratio * 100.0),
                        )
                    }
                }
            }
            OperationKind::Write | OperationKind::Create => {
                if facts.payload.is_some() && payload_len == facts.expected_len {
                    (
                        RecoveryStrategy::Resume,
                        90,
                        RiskLevel::Low,
                        Duration::ZERO,
                        "staged content is complete; rename it into place".to_string(),
                    )
                } else {
                    (
                        RecoveryStrategy::Rollback,
                        80,
                        RiskLevel::Low,
                        Duration::ZERO,
                        "target was not replaced; discard staged content".to_string(),
                    )
                }
            }
            OperationKind::Batch => (
                RecoveryStrategy::Manual,
                30,
                RiskLevel::High,
                Duration::ZERO,
                "interrupted batch needs review".to_string(),
            ),
            _ => (
                RecoveryStrategy::Manual,
                50,
                RiskLevel::Medium,
                Duration::ZERO,
                "no partial output to recover".to_string(),
            ),
        }
    };

    let window_ms = duration_millis(config.max_recovery_window());
    if facts.age_ms > window_ms {
        confidence = confidence.saturating_sub(30);
        risk = RiskLevel::High;
    }

    RecoveryPlan {
        strategy,
        confidence,
        estimated_time,
        risk,
        reason,
    }
}
