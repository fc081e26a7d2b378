//! Atomic write, move and copy commands.

use anyhow::{bail, Context, Result};
use console::style;
use fsguard_core::{BatchStep, OperationOptions, OperationResult};
use std::fs;
use std::path::Path;

fn options(backup: bool, description: String) -> OperationOptions {
    let opts = if backup {
        OperationOptions::with_backup()
    } else {
        OperationOptions::default()
    };
    opts.describe(description)
}

fn report(result: OperationResult) -> Result<()> {
    if result.success {
        println!(
            "{} {} ({} step(s), {:.1} ms)",
            style("✓").green(),
            result.message.as_deref().unwrap_or("Done"),
            result.steps_affected,
            result.duration.as_secs_f64() * 1000.0
        );
        println!("  Operation: {}", style(&result.operation_id).dim());
        Ok(())
    } else {
        println!(
            "{} Operation {} failed and was rolled back",
            style("×").red(),
            style(&result.operation_id).dim()
        );
        bail!(result.error.unwrap_or_else(|| "unknown error".to_string()))
    }
}

/// Atomically replace `path` with the given content.
pub fn write(
    root: &Path,
    path: &Path,
    content: Option<String>,
    from: Option<&Path>,
    backup: bool,
) -> Result<()> {
    let bytes = match (content, from) {
        (Some(text), _) => text.into_bytes(),
        (None, Some(file)) => {
            fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?
        }
        (None, None) => bail!("Provide --content or --from"),
    };

    let guard = super::open(root)?;
    let description = format!("cli write {}", path.display());
    report(
        guard
            .atomic()
            .atomic_write(path, &bytes, options(backup, description)),
    )
}

/// Atomically move `source` to `destination`.
pub fn move_file(root: &Path, source: &Path, destination: &Path, backup: bool) -> Result<()> {
    let guard = super::open(root)?;
    let description = format!("cli move {}", source.display());
    report(
        guard
            .atomic()
            .atomic_move(source, destination, options(backup, description)),
    )
}

/// Atomically copy `source` to `destination`.
pub fn copy(root: &Path, source: &Path, destination: &Path) -> Result<()> {
    let guard = super::open(root)?;
    let steps = vec![BatchStep::copy_file(source, destination)];
    let description = format!("cli copy {}", source.display());
    report(
        guard
            .atomic()
            .atomic_batch(steps, options(false, description)),
    )
}
