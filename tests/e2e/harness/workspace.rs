use super::clock::MockClock;
use anyhow::{Context, Result};
use fsguard_core::{is_partial, Config, Guard, STATE_DIR};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Manages isolated test environments with tempfile
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    /// Create an empty workspace
    pub fn empty() -> Result<Self> {
        let dir = TempDir::new().context("Failed to create temp directory")?;
        Ok(Self { dir })
    }

    /// Create workspace with initial files
    pub fn with_files(files: HashMap<String, Vec<u8>>) -> Result<Self> {
        let workspace = Self::empty()?;
        for (path, content) in files {
            workspace.write_file(&path, &content)?;
        }
        Ok(workspace)
    }

    /// Get workspace path
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of a workspace-relative file
    pub fn abs(&self, path: &str) -> PathBuf {
        self.path().join(path)
    }

    /// The `.fsguard` directory
    pub fn state_dir(&self) -> PathBuf {
        self.path().join(STATE_DIR)
    }

    /// Initialize fsguard in the workspace
    pub fn init_guard(&self, config: Config, clock: &MockClock) -> Result<Guard> {
        Ok(Guard::init_with(self.path(), config, clock.as_clock())?)
    }

    /// Open the existing fsguard state
    pub fn open_guard(&self, clock: &MockClock) -> Result<Guard> {
        Ok(Guard::open_with_clock(self.path(), clock.as_clock())?)
    }

    /// Write file to workspace, bypassing the guard
    pub fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.abs(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directories for {}", path))?;
        }

        fs::write(&full_path, content)
            .with_context(|| format!("Failed to write file: {}", path))?;

        Ok(())
    }

    /// Read file from workspace
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.abs(path)).with_context(|| format!("Failed to read file: {}", path))
    }

    /// Delete file from workspace, bypassing the guard
    pub fn delete_file(&self, path: &str) -> Result<()> {
        fs::remove_file(self.abs(path)).with_context(|| format!("Failed to delete file: {}", path))
    }

    /// Check if file exists
    pub fn file_exists(&self, path: &str) -> bool {
        self.abs(path).exists()
    }

    /// Partial files anywhere outside the state directory
    pub fn partial_files(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        collect_partials(self.path(), &self.state_dir(), &mut found);
        found
    }
}

fn collect_partials(dir: &Path, skip: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path == skip {
            continue;
        }
        if path.is_dir() {
            collect_partials(&path, skip, out);
        } else if is_partial(&path) {
            out.push(path);
        }
    }
}
