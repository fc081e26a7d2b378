//! Compatibility matrix, conflict classification and severity rules.
//!
//! Everything here is a pure function of its inputs: the same kinds and
//! path always produce the same answer.

use super::types::{ConflictKind, ConflictSeverity, LockOperation, ResolutionStrategy};
use std::path::Path;

/// Operations each kind lists as incompatible.
fn incompatible_with(op: LockOperation) -> &'static [LockOperation] {
    use LockOperation::*;
    match op {
        Write => &[Write, Delete, Move, Rename, Chmod],
        // Read is listed but overridden in operations_conflict
        Delete => &[Write, Read, Move, Rename, Chmod],
        Move | Rename => &[Move, Rename, Write, Delete],
        Chmod => &[Chmod, Write, Delete],
        Append => &[Delete, Move, Rename],
        Read => &[],
    }
}

/// Returns true if claims for `a` and `b` on the same path collide.
///
/// Read never conflicts. Otherwise a pair collides when either side lists
/// the other, so the relation is symmetric.
pub fn operations_conflict(a: LockOperation, b: LockOperation) -> bool {
    if a == LockOperation::Read || b == LockOperation::Read {
        return false;
    }
    incompatible_with(a).contains(&b) || incompatible_with(b).contains(&a)
}

/// Classifies a colliding pair.
pub fn classify(a: LockOperation, b: LockOperation) -> ConflictKind {
    use LockOperation::*;
    match (a, b) {
        (Chmod, _) | (_, Chmod) => ConflictKind::PermissionChange,
        (Write | Append, Write | Append) => ConflictKind::WriteWrite,
        (Delete, Write | Append) | (Write | Append, Delete) => ConflictKind::WriteDelete,
        (Rename, Rename) => ConflictKind::RenameRename,
        (Move | Rename, Move | Rename) => ConflictKind::MoveMove,
        _ => ConflictKind::ConcurrentAccess,
    }
}

const SYSTEM_PREFIXES: &[&str] = &[
    "/etc", "/usr", "/bin", "/sbin", "/boot", "/sys", "/proc", "/dev", "/lib", "/lib64",
    "c:/windows", "c:/program files", "c:/program files (x86)",
];

const CONFIG_EXTENSIONS: &[&str] = &[
    "json", "yaml", "yml", "toml", "ini", "conf", "cfg", "env", "config", "properties", "xml",
    "plist",
];

const CONFIG_NAMES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "cargo.toml",
    "cargo.lock",
    "pyproject.toml",
    "tsconfig.json",
    ".gitignore",
    ".gitattributes",
    ".env",
    ".npmrc",
    ".editorconfig",
    "dockerfile",
    "docker-compose.yml",
    "makefile",
];

/// Returns true for platform-reserved locations.
pub fn is_system_path(path: &Path) -> bool {
    let normalized = path.to_string_lossy().replace('\\', "/").to_lowercase();
    SYSTEM_PREFIXES.iter().any(|prefix| {
        normalized == *prefix
            || normalized
                .strip_prefix(prefix)
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    })
}

/// Returns true for recognized configuration files.
pub fn is_config_file(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
        return false;
    };
    if CONFIG_NAMES.contains(&name.as_str()) || name.starts_with(".env") {
        return true;
    }
    path.extension()
        .map(|ext| CONFIG_EXTENSIONS.contains(&ext.to_string_lossy().to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Severity of a conflict of `kind` on `path`.
pub fn assess_severity(path: &Path, kind: ConflictKind) -> ConflictSeverity {
    if is_system_path(path) {
        return ConflictSeverity::Critical;
    }
    if is_config_file(path) {
        return ConflictSeverity::High;
    }
    match kind {
        ConflictKind::WriteDelete => ConflictSeverity::High,
        ConflictKind::WriteWrite | ConflictKind::MoveMove => ConflictSeverity::Medium,
        ConflictKind::RenameRename
        | ConflictKind::PermissionChange
        | ConflictKind::ConcurrentAccess => ConflictSeverity::Low,
    }
}

/// Strategy applied when the caller does not choose one.
pub fn default_strategy(kind: ConflictKind) -> ResolutionStrategy {
    match kind {
        ConflictKind::WriteWrite | ConflictKind::WriteDelete => ResolutionStrategy::BackupResolve,
        ConflictKind::MoveMove
        | ConflictKind::RenameRename
        | ConflictKind::PermissionChange
        | ConflictKind::ConcurrentAccess => ResolutionStrategy::TimestampPriority,
    }
}

/// Confidence reported for a strategy.
pub fn strategy_confidence(strategy: ResolutionStrategy) -> u8 {
    match strategy {
        ResolutionStrategy::BackupResolve | ResolutionStrategy::AutoMerge => 80,
        ResolutionStrategy::TimestampPriority => 90,
        ResolutionStrategy::AbortAll => 100,
    }
}
