//! Integrity records, verification results and reports.

use crate::checksum::ChecksumAlgorithm;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Kind of divergence between a file and its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionKind {
    /// Content hash differs.
    ChecksumMismatch,
    /// Size differs.
    SizeMismatch,
    /// Permission bits differ (non-fatal).
    PermissionChange,
    /// File is gone.
    MissingFile,
}

impl fmt::Display for CorruptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::SizeMismatch => "size_mismatch",
            Self::PermissionChange => "permission_change",
            Self::MissingFile => "missing_file",
        };
        f.write_str(s)
    }
}

/// Divergence recorded on an integrity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptionInfo {
    /// Kind.
    pub kind: CorruptionKind,
    /// Human details.
    pub details: String,
    /// Unix ms.
    pub detected_at: i64,
}

/// Expected fingerprint of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityRecord {
    /// Absolute path; the registry key.
    pub path: PathBuf,
    /// Hex checksum.
    pub checksum: String,
    /// Algorithm that produced `checksum`.
    pub algorithm: ChecksumAlgorithm,
    /// Size in bytes.
    pub size: u64,
    /// Modification time (unix ms) when recorded.
    pub modified: Option<i64>,
    /// Permission bits.
    pub permissions: u32,
    /// Result of the last verification.
    pub verified: bool,
    /// Unix ms of the last verification.
    #[serde(default)]
    pub last_verified: Option<i64>,
    /// Unix ms when the record was created.
    pub created_at: i64,
    /// Divergence found by the last verification.
    #[serde(default)]
    pub corruption: Option<CorruptionInfo>,
}

/// Options for creating a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordOptions {
    /// Override the configured algorithm.
    pub algorithm: Option<ChecksumAlgorithm>,
}

/// Outcome of verifying one file.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    /// Verified path.
    pub path: PathBuf,
    /// True if the file matches its record (permission drift allowed).
    pub success: bool,
    /// True if a fatal divergence was found.
    pub corruption_detected: bool,
    /// Kind of the divergence, fatal or not.
    pub corruption_type: Option<CorruptionKind>,
    /// Details of the divergence.
    pub details: Option<String>,
    /// The checksum step was skipped for a large file.
    pub skipped: bool,
    /// Recorded checksum.
    pub expected_checksum: Option<String>,
    /// Recomputed checksum, if hashing ran.
    pub actual_checksum: Option<String>,
    /// Usage or I/O failure (e.g. no record).
    pub error: Option<String>,
    /// Time spent.
    pub duration: Duration,
}

impl VerificationResult {
    pub(crate) fn error(path: PathBuf, error: impl ToString) -> Self {
        Self {
            path,
            success: false,
            corruption_detected: false,
            corruption_type: None,
            details: None,
            skipped: false,
            expected_checksum: None,
            actual_checksum: None,
            error: Some(error.to_string()),
            duration: Duration::ZERO,
        }
    }

    /// Permission bits drifted while content stayed intact.
    pub fn permission_changed(&self) -> bool {
        self.corruption_type == Some(CorruptionKind::PermissionChange)
    }
}

/// Aggregated result of verifying a directory.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    /// Directory that was verified.
    pub directory: PathBuf,
    /// Files checked (excluding skipped ones).
    pub total_files: usize,
    /// Files that matched their record.
    pub verified_files: usize,
    /// Files with a checksum mismatch.
    pub corrupted_files: usize,
    /// Files that no longer exist.
    pub missing_files: usize,
    /// Files whose size or permissions changed.
    pub modified_files: usize,
    /// Large files whose checksum was not recomputed.
    pub skipped_files: usize,
    /// `verified / total * 100`; 100 for an empty set.
    pub integrity_score: f64,
    /// Per-file results.
    pub results: Vec<VerificationResult>,
    /// Suggested follow-ups.
    pub recommendations: Vec<String>,
    /// Time spent.
    pub duration: Duration,
}

impl IntegrityReport {
    /// Builds a report, computing counters, score and recommendations.
    pub fn from_results(directory: PathBuf, results: Vec<VerificationResult>, duration: Duration) -> Self {
        let mut report = Self {
            directory,
            duration,
            ..Self::default()
        };

        for r in &results {
            if r.skipped && r.success {
                report.skipped_files += 1;
                continue;
            }
            report.total_files += 1;
            if r.success {
                report.verified_files += 1;
            }
            match r.corruption_type {
                Some(CorruptionKind::ChecksumMismatch) => report.corrupted_files += 1,
                Some(CorruptionKind::MissingFile) => report.missing_files += 1,
                Some(CorruptionKind::SizeMismatch) | Some(CorruptionKind::PermissionChange) => {
                    report.modified_files += 1
                }
                None => {}
            }
        }

        report.integrity_score = if report.total_files == 0 {
            100.0
        } else {
            report.verified_files as f64 / report.total_files as f64 * 100.0
        };

        if report.corrupted_files > 0 {
            report.recommendations.push(format!(
                "{} corrupted file(s): restore them from backup with 'fsguard integrity repair'",
                report.corrupted_files
            ));
        }
        if report.missing_files > 0 {
            report.recommendations.push(format!(
                "{} missing file(s): restore them or drop their records with 'fsguard integrity cleanup'",
                report.missing_files
            ));
        }
        if report.modified_files > 0 {
            report.recommendations.push(format!(
                "{} modified file(s): rescan if the changes are intended",
                report.modified_files
            ));
        }
        if report.integrity_score < 95.0 {
            report.recommendations.push(format!(
                "integrity score {:.1}% is below 95%: review recent file operations",
                report.integrity_score
            ));
        }

        report.results = results;
        report
    }

    /// Returns true if any file failed verification or drifted.
    pub fn has_issues(&self) -> bool {
        self.corrupted_files > 0 || self.missing_files > 0 || self.modified_files > 0
    }

    /// Returns a summary message.
    pub fn summary(&self) -> String {
        if !self.has_issues() {
            format!(
                "All {} file(s) intact ({} skipped).",
                self.total_files, self.skipped_files
            )
        } else {
            let mut issues = Vec::new();
            if self.corrupted_files > 0 {
                issues.push(format!("{} corrupted", self.corrupted_files));
            }
            if self.missing_files > 0 {
                issues.push(format!("{} missing", self.missing_files));
            }
            if self.modified_files > 0 {
                issues.push(format!("{} modified", self.modified_files));
            }
            format!(
                "Integrity score {:.1}%: {}",
                self.integrity_score,
                issues.join(", ")
            )
        }
    }
}

/// Counters over the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrityStats {
    /// Records in the registry.
    pub total_records: usize,
    /// Records whose last verification passed.
    pub verified: usize,
    /// Records with a recorded divergence.
    pub corrupted: usize,
    /// Records never verified since creation.
    pub unverified: usize,
    /// Divergences per kind.
    pub by_kind: HashMap<CorruptionKind, usize>,
    /// Sum of recorded sizes.
    pub total_bytes: u64,
    /// Most recent verification time (unix ms).
    pub last_verified: Option<i64>,
}
