//! Exclusive ownership of a state directory.
//!
//! `LOCK` holds a JSON [`StateLockRecord`] and stays fs2-locked while its
//! owner lives. A record whose owner is gone is reclaimed on open.

use crate::error::{GuardError, Result};
use crate::sidecar::OwnerState;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the lock file inside the state directory.
pub const LOCK_FILE: &str = "LOCK";

const MAX_RECLAIMS: u32 = 2;

/// Who holds a state directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLockRecord {
    pub process_id: u32,
    pub session_id: String,
    /// Unix milliseconds.
    pub acquired_at: i64,
}

impl StateLockRecord {
    /// Reads the record at `path`. `Ok(None)` if there is no lock file.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| GuardError::Deserialization(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GuardError::at(path, e)),
        }
    }

    /// Overwrites `path` with this record.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| GuardError::Serialization(e.to_string()))?;
        fs::write(path, json).map_err(|e| GuardError::at(path, e))
    }

    pub fn owner(&self) -> OwnerState {
        OwnerState::of(self.process_id)
    }
}

/// Held `LOCK` file. Released and removed on drop.
pub(crate) struct StateLock {
    file: Option<File>,
    path: PathBuf,
    record: StateLockRecord,
}

impl StateLock {
    /// Takes `state_dir/LOCK` for `session_id`.
    ///
    /// # Errors
    ///
    /// [`GuardError::StateLocked`] when another handle holds the lock, with
    /// the holder's pid when it is known and 0 otherwise.
    pub(crate) fn acquire(state_dir: &Path, session_id: &str, now: i64) -> Result<Self> {
        let path = state_dir.join(LOCK_FILE);
        let record = StateLockRecord {
            process_id: std::process::id(),
            session_id: session_id.to_string(),
            acquired_at: now,
        };

        let mut reclaims = 0;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Self::claim(file, path, record),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(GuardError::at(&path, e)),
            }

            if reclaims >= MAX_RECLAIMS {
                return Err(GuardError::StateLocked { pid: 0 });
            }
            reclaims += 1;

            if let Some(pid) = holder(&path)? {
                return Err(GuardError::StateLocked { pid });
            }
        }
    }

    fn claim(mut file: File, path: PathBuf, record: StateLockRecord) -> Result<Self> {
        if file.try_lock_exclusive().is_err() {
            return Err(GuardError::StateLocked { pid: 0 });
        }

        let written = serde_json::to_vec_pretty(&record)
            .map_err(|e| GuardError::Serialization(e.to_string()))
            .and_then(|json| {
                file.write_all(&json)
                    .and_then(|()| file.sync_all())
                    .map_err(|e| GuardError::at(&path, e))
            });
        if let Err(e) = written {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        debug!(path = %path.display(), session = %record.session_id, "State lock acquired");
        Ok(Self {
            file: Some(file),
            path,
            record,
        })
    }

    pub(crate) fn record(&self) -> &StateLockRecord {
        &self.record
    }
}

/// Returns the pid holding an existing `LOCK`, or `None` once a stale lock
/// has been cleared and the caller may retry.
fn holder(path: &Path) -> Result<Option<u32>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(_) => return Ok(Some(0)),
    };
    let held = file.try_lock_exclusive().is_err();
    if !held {
        let _ = FileExt::unlock(&file);
    }
    drop(file);

    let record = match StateLockRecord::read(path) {
        Ok(Some(record)) => record,
        Ok(None) => return Ok(None),
        Err(GuardError::Deserialization(reason)) if !held => {
            warn!(reason = %reason, "Unreadable state lock, reclaiming");
            return clear(path);
        }
        Err(_) => return Ok(Some(0)),
    };

    if held {
        return Ok(Some(record.process_id));
    }
    match record.owner() {
        OwnerState::Live => Ok(Some(record.process_id)),
        OwnerState::Current | OwnerState::Dead => {
            warn!(
                pid = record.process_id,
                session = %record.session_id,
                "State lock left by a finished session, reclaiming"
            );
            clear(path)
        }
    }
}

fn clear(path: &Path) -> Result<Option<u32>> {
    match fs::remove_file(path) {
        Ok(()) => Ok(None),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GuardError::at(path, e)),
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let ours = matches!(
            StateLockRecord::read(&self.path),
            Ok(Some(ref on_disk)) if *on_disk == self.record
        );
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
        if ours {
            let _ = fs::remove_file(&self.path);
        } else {
            warn!(path = %self.path.display(), "State lock was rewritten by another session, leaving it");
        }
    }
}
