//! Initialize fsguard state.

use anyhow::{Context, Result};
use fsguard_core::{Guard, STATE_DIR};
use std::path::Path;

/// Create the `.fsguard` directory under `root`.
pub fn run(root: &Path) -> Result<()> {
    let guard = Guard::init(root).context("Failed to initialize fsguard")?;

    println!("Initialized fsguard in {}/", STATE_DIR);
    println!();
    println!("Directory structure:");
    println!("  {}/locks/    - Progress sidecars of running operations", STATE_DIR);
    println!("  {}/hold/     - Displaced files from conflict resolution", STATE_DIR);
    println!("  {}/backups/  - Snapshots taken before destructive steps", STATE_DIR);
    println!("  {}/logs/     - Operation audit log", STATE_DIR);
    println!();
    println!("Configuration written to {}/config.toml", STATE_DIR);
    println!("Session: {}", guard.ctx().session_id());

    Ok(())
}
