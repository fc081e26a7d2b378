//! Persistent storage for integrity records.
//!
//! Two backends share the [`RegistryStore`] trait: a flat JSON array that
//! is rewritten on every mutation, and a redb table keyed by absolute path.

#![allow(clippy::io_other_error)]

use super::record::IntegrityRecord;
use crate::error::{GuardError, Result};
use fs2::FileExt;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// JSON registry file name inside the state directory.
pub const JSON_REGISTRY_FILE: &str = "integrity.json";

/// redb registry file name inside the state directory.
pub const REDB_REGISTRY_FILE: &str = "integrity.redb";

/// Storage for integrity records keyed by absolute path.
pub trait RegistryStore: Send + Sync + std::fmt::Debug {
    /// Loads every record.
    fn load(&self) -> Result<Vec<IntegrityRecord>>;

    /// Inserts or replaces records.
    fn upsert(&self, records: &[IntegrityRecord]) -> Result<()>;

    /// Removes records by path. Unknown paths are ignored.
    fn remove(&self, paths: &[PathBuf]) -> Result<()>;

    /// Where the records live on disk.
    fn location(&self) -> &Path;
}

/// JSON array file, rewritten atomically under an advisory file lock.
#[derive(Debug)]
pub struct JsonRegistry {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonRegistry {
    /// Opens (without creating) the registry at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("json.lock");
        Self { path, lock_path }
    }

    fn lock(&self) -> Result<File> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| GuardError::at(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| GuardError::at(&self.lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| GuardError::Registry(format!("Failed to lock registry: {}", e)))?;
        Ok(file)
    }

    fn read_map(&self) -> Result<BTreeMap<PathBuf, IntegrityRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(GuardError::at(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let records: Vec<IntegrityRecord> = serde_json::from_str(&content)
            .map_err(|e| GuardError::Deserialization(format!("{}: {}", self.path.display(), e)))?;
        Ok(records.into_iter().map(|r| (r.path.clone(), r)).collect())
    }

    fn write_map(&self, map: &BTreeMap<PathBuf, IntegrityRecord>) -> Result<()> {
        let records: Vec<&IntegrityRecord> = map.values().collect();
        let json = serde_json::to_vec_pretty(&records)
            .map_err(|e| GuardError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp).map_err(|e| GuardError::at(&tmp, e))?;
            file.write_all(&json).map_err(|e| GuardError::at(&tmp, e))?;
            file.sync_all().map_err(|e| GuardError::at(&tmp, e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| GuardError::at(&self.path, e))?;
        Ok(())
    }

    fn mutate(&self, f: impl FnOnce(&mut BTreeMap<PathBuf, IntegrityRecord>)) -> Result<()> {
        let lock = self.lock()?;
        let mut map = self.read_map()?;
        f(&mut map);
        let result = self.write_map(&map);
        if let Err(e) = lock.unlock() {
            warn!(path = %self.lock_path.display(), error = %e, "Failed to unlock registry");
        }
        result
    }
}

impl RegistryStore for JsonRegistry {
    fn load(&self) -> Result<Vec<IntegrityRecord>> {
        Ok(self.read_map()?.into_values().collect())
    }

    fn upsert(&self, records: &[IntegrityRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.mutate(|map| {
            for record in records {
                map.insert(record.path.clone(), record.clone());
            }
        })
    }

    fn remove(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.mutate(|map| {
            for path in paths {
                map.remove(path);
            }
        })
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

const RECORDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("integrity_records");

/// redb-backed registry; each record is a JSON value under its path.
pub struct RedbRegistry {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRegistry").field("path", &self.path).finish()
    }
}

fn registry_err(what: &str, e: impl std::fmt::Display) -> GuardError {
    GuardError::Registry(format!("Failed to {}: {}", what, e))
}

fn key_of(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl RedbRegistry {
    /// Opens the database at `path`, creating it and its table if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| GuardError::at(parent, e))?;
        }

        let db = Database::create(&path).map_err(|e| registry_err("open registry", e))?;

        // Create the table so read transactions never see it missing
        let write_txn = db
            .begin_write()
            .map_err(|e| registry_err("begin write transaction", e))?;
        {
            write_txn
                .open_table(RECORDS_TABLE)
                .map_err(|e| registry_err("open records table", e))?;
        }
        write_txn.commit().map_err(|e| registry_err("commit", e))?;

        debug!(path = %path.display(), "Opened redb integrity registry");
        Ok(Self { db, path })
    }

    /// Looks up one record.
    pub fn get(&self, path: &Path) -> Result<Option<IntegrityRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| registry_err("begin read transaction", e))?;
        let table = read_txn
            .open_table(RECORDS_TABLE)
            .map_err(|e| registry_err("open records table", e))?;

        let key = key_of(path);
        match table
            .get(key.as_str())
            .map_err(|e| registry_err("read record", e))?
        {
            Some(value) => {
                let record = serde_json::from_slice(value.value())
                    .map_err(|e| GuardError::Deserialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

impl RegistryStore for RedbRegistry {
    fn load(&self) -> Result<Vec<IntegrityRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| registry_err("begin read transaction", e))?;
        let table = read_txn
            .open_table(RECORDS_TABLE)
            .map_err(|e| registry_err("open records table", e))?;

        let mut records = Vec::new();
        for entry in table.iter().map_err(|e| registry_err("iterate records", e))? {
            let (key, value) = entry.map_err(|e| registry_err("read record", e))?;
            match serde_json::from_slice::<IntegrityRecord>(value.value()) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = key.value(), error = %e, "Skipping malformed integrity record"),
            }
        }
        Ok(records)
    }

    fn upsert(&self, records: &[IntegrityRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| registry_err("begin write transaction", e))?;
        {
            let mut table = write_txn
                .open_table(RECORDS_TABLE)
                .map_err(|e| registry_err("open records table", e))?;
            for record in records {
                let bytes = serde_json::to_vec(record)
                    .map_err(|e| GuardError::Serialization(e.to_string()))?;
                let key = key_of(&record.path);
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(|e| registry_err("insert record", e))?;
            }
        }
        write_txn.commit().map_err(|e| registry_err("commit", e))?;
        Ok(())
    }

    fn remove(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| registry_err("begin write transaction", e))?;
        {
            let mut table = write_txn
                .open_table(RECORDS_TABLE)
                .map_err(|e| registry_err("open records table", e))?;
            for path in paths {
                let key = key_of(path);
                table
                    .remove(key.as_str())
                    .map_err(|e| registry_err("remove record", e))?;
            }
        }
        write_txn.commit().map_err(|e| registry_err("commit", e))?;
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}
