//! Low-level filesystem helpers shared by the components.

use crate::error::{GuardError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Suffix marking a staged, not yet renamed file.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Returns the staging path for `target`: a hidden sibling ending in `.partial`.
///
/// Staging next to the target keeps the final rename on one filesystem.
pub fn partial_path(target: &Path, op_id: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let short = &op_id[..op_id.len().min(8)];
    target.with_file_name(format!(".{}.{}{}", name, short, PARTIAL_SUFFIX))
}

/// Returns true if the path follows the partial-file naming convention.
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') && n.ends_with(PARTIAL_SUFFIX))
        .unwrap_or(false)
}

/// Recovers the intended target of a partial file, if the name is well formed.
pub fn partial_target(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let inner = name.strip_prefix('.')?.strip_suffix(PARTIAL_SUFFIX)?;
    let (original, _short) = inner.rsplit_once('.')?;
    if original.is_empty() {
        return None;
    }
    Some(path.with_file_name(original))
}

/// Writes `content` to `staging`, flushes it, then renames it over `target`.
///
/// The rename is the commit point: readers see either the old file or the new one.
pub fn write_staged(target: &Path, staging: &Path, content: &[u8], fsync: bool) -> Result<()> {
    {
        let mut file = File::create(staging).map_err(|e| GuardError::at(staging, e))?;
        file.write_all(content).map_err(|e| GuardError::at(staging, e))?;
        if fsync {
            file.sync_all().map_err(|e| GuardError::at(staging, e))?;
        }
    }

    if let Err(e) = fs::rename(staging, target) {
        let _ = fs::remove_file(staging);
        return Err(GuardError::at(target, e));
    }

    if fsync {
        if let Some(dir) = target.parent() {
            fsync_dir(dir);
        }
    }

    Ok(())
}

/// Copies `source` into `staging`, then renames it over `target`.
pub fn copy_staged(source: &Path, target: &Path, staging: &Path, fsync: bool) -> Result<u64> {
    let copied = fs::copy(source, staging).map_err(|e| GuardError::at(source, e))?;
    if fsync {
        if let Ok(file) = OpenOptions::new().write(true).open(staging) {
            let _ = file.sync_all();
        }
    }

    if let Err(e) = fs::rename(staging, target) {
        let _ = fs::remove_file(staging);
        return Err(GuardError::at(target, e));
    }

    if fsync {
        if let Some(dir) = target.parent() {
            fsync_dir(dir);
        }
    }

    Ok(copied)
}

/// fsync a directory so a completed rename survives a crash (Unix only).
pub fn fsync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

/// Moves `from` to `to`, falling back to copy + remove for files when a
/// plain rename is impossible (e.g. across filesystems).
pub fn relocate(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| GuardError::at(parent, e))?;
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            let meta = fs::symlink_metadata(from).map_err(|e| GuardError::at(from, e))?;
            if !meta.is_file() {
                return Err(GuardError::at(from, rename_err));
            }
            fs::copy(from, to).map_err(|e| GuardError::at(to, e))?;
            fs::remove_file(from).map_err(|e| GuardError::at(from, e))?;
            Ok(())
        }
    }
}

/// Returns the permission bits of a file.
pub fn mode_of(meta: &fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o7777
    }
    #[cfg(not(unix))]
    {
        if meta.permissions().readonly() {
            0o444
        } else {
            0o644
        }
    }
}

/// Applies permission bits to a path.
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    let perms = {
        use std::os::unix::fs::PermissionsExt;
        fs::Permissions::from_mode(mode)
    };
    #[cfg(not(unix))]
    let perms = {
        let mut perms = fs::metadata(path)
            .map_err(|e| GuardError::at(path, e))?
            .permissions();
        perms.set_readonly(mode & 0o222 == 0);
        perms
    };
    fs::set_permissions(path, perms).map_err(|e| GuardError::at(path, e))
}

/// Modification time in unix milliseconds, if the platform reports one.
pub fn modified_millis(meta: &fs::Metadata) -> Option<i64> {
    meta.modified().ok().map(system_time_millis)
}

/// Access time in unix milliseconds, if the platform reports one.
pub fn accessed_millis(meta: &fs::Metadata) -> Option<i64> {
    meta.accessed().ok().map(system_time_millis)
}

/// Restores access/modification times on a file.
pub fn set_times(path: &Path, modified: Option<i64>, accessed: Option<i64>) -> Result<()> {
    if modified.is_none() && accessed.is_none() {
        return Ok(());
    }
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| GuardError::at(path, e))?;
    let mut times = fs::FileTimes::new();
    if let Some(ms) = modified {
        times = times.set_modified(millis_system_time(ms));
    }
    if let Some(ms) = accessed {
        times = times.set_accessed(millis_system_time(ms));
    }
    file.set_times(times).map_err(|e| GuardError::at(path, e))
}

/// Converts a SystemTime to unix milliseconds (clamped at the epoch).
pub fn system_time_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(duration_millis)
        .unwrap_or(0)
}

/// Milliseconds in `d`, saturating at `i64::MAX`.
pub(crate) fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// The instant `age` before `now`, in unix milliseconds. Never overflows.
pub(crate) fn millis_before(now: i64, age: Duration) -> i64 {
    now.saturating_sub(duration_millis(age))
}

fn millis_system_time(ms: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64)
}

/// Lexically normalizes a path and anchors relative paths at the current
/// directory. Does not touch the filesystem, so it works for missing files.
pub fn absolutize(path: &Path) -> PathBuf {
    use std::path::Component;

    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Returns true if `pid` names a running process.
///
/// Zombies and exiting processes count as dead: they will never release
/// or finish anything they own.
#[cfg(target_os = "linux")]
pub(crate) fn is_process_alive(pid: u32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    // Format is `pid (comm) state ...`; comm may itself contain ')'
    match stat.rfind(')').and_then(|end| stat[end + 1..].split_whitespace().next()) {
        Some(state) => !matches!(state, "Z" | "X" | "x"),
        None => true,
    }
}

/// Returns true if `pid` names a running process.
#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(true)
}

/// Liveness is not checked here; every owner is treated as running.
#[cfg(not(unix))]
pub(crate) fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_naming_roundtrip() {
        let target = Path::new("/tmp/dir/report.txt");
        let partial = partial_path(target, "0123456789abcdef");
        assert_eq!(
            partial,
            Path::new("/tmp/dir/.report.txt.01234567.partial")
        );
        assert!(is_partial(&partial));
        assert_eq!(partial_target(&partial).unwrap(), target);
        assert!(!is_partial(target));
    }

    #[test]
    fn test_write_staged_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a.txt");
        fs::write(&target, b"old").unwrap();

        let staging = partial_path(&target, "op1");
        write_staged(&target, &staging, b"new content", true).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new content");
        assert!(!staging.exists());
    }

    #[test]
    fn test_relocate_file() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("from.txt");
        let to = tmp.path().join("nested/dir/to.txt");
        fs::write(&from, b"payload").unwrap();

        relocate(&from, &to).unwrap();

        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"payload");
    }

    #[test]
    fn test_absolutize_collapses_dots() {
        let p = absolutize(Path::new("/a/b/../c/./d"));
        assert_eq!(p, Path::new("/a/c/d"));
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("m.txt");
        fs::write(&path, b"x").unwrap();
        set_mode(&path, 0o600).unwrap();
        assert_eq!(mode_of(&fs::metadata(&path).unwrap()), 0o600);
    }

    #[test]
    fn test_set_times() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.txt");
        fs::write(&path, b"x").unwrap();
        set_times(&path, Some(1_000_000), None).unwrap();
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(modified_millis(&meta), Some(1_000_000));
    }

    #[test]
    fn test_current_process_alive() {
        assert!(is_process_alive(std::process::id()));
        #[cfg(unix)]
        assert!(!is_process_alive(u32::MAX - 1));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unreaped_child_counts_as_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while is_process_alive(pid) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!is_process_alive(pid));
        child.wait().unwrap();
    }
}
