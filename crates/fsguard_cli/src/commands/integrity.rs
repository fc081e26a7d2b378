//! Integrity record commands.

use anyhow::{bail, Result};
use console::style;
use fsguard_core::{CorruptionKind, IntegrityReport};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// Record checksums for every regular file under `dir`.
pub fn scan(root: &Path, dir: Option<&Path>, recursive: bool) -> Result<()> {
    let guard = super::open(root)?;
    let dir = dir.unwrap_or(root);

    let pb = spinner("Recording checksums...")?;
    let count = guard.integrity().scan_directory(dir, recursive)?;
    pb.finish_and_clear();

    println!(
        "{} Recorded {} file(s) under {}",
        style("✓").green(),
        style(count).cyan(),
        dir.display()
    );
    Ok(())
}

/// Verify files against their records and print a report.
pub fn verify(root: &Path, dir: Option<&Path>, recursive: bool) -> Result<()> {
    let guard = super::open(root)?;

    let pb = spinner("Verifying files...")?;
    let report = match dir {
        Some(dir) => guard.integrity().verify_directory(dir, recursive),
        None => guard.integrity().verify_all(),
    };
    pb.finish_and_clear();

    print_report(&report);
    if report.corrupted_files > 0 || report.missing_files > 0 {
        bail!("integrity check failed");
    }
    Ok(())
}

fn print_report(report: &IntegrityReport) {
    println!();
    println!("{}", style("Integrity Report:").bold());
    println!("  Files checked:  {}", style(report.total_files).cyan());
    println!("  Verified:       {}", style(report.verified_files).green());
    if report.skipped_files > 0 {
        println!("  Skipped:        {}", style(report.skipped_files).dim());
    }
    if report.corrupted_files > 0 {
        println!("  Corrupted:      {}", style(report.corrupted_files).red());
    }
    if report.missing_files > 0 {
        println!("  Missing:        {}", style(report.missing_files).red());
    }
    if report.modified_files > 0 {
        println!("  Modified:       {}", style(report.modified_files).yellow());
    }
    println!("  Score:          {:.1}%", report.integrity_score);

    for result in &report.results {
        if let Some(kind) = result.corruption_type {
            let marker = match kind {
                CorruptionKind::PermissionChange => style("⚠").yellow(),
                _ => style("×").red(),
            };
            println!(
                "    {} {} ({}){}",
                marker,
                result.path.display(),
                kind,
                result
                    .details
                    .as_deref()
                    .map(|d| format!(": {}", d))
                    .unwrap_or_default()
            );
        } else if let Some(error) = &result.error {
            println!("    {} {}: {}", style("?").yellow(), result.path.display(), error);
        }
    }

    println!();
    if report.has_issues() {
        println!("{}", style(report.summary()).yellow().bold());
        println!();
        println!("{}", style("Recommendations:").bold());
        for rec in &report.recommendations {
            println!("  {} {}", style("→").cyan(), rec);
        }
    } else {
        println!("{} {}", style("✓").green(), style(report.summary()).green());
    }
}

/// Restore `path` from a backup and re-verify it.
pub fn repair(root: &Path, path: &Path, backup: Option<&Path>) -> Result<()> {
    let guard = super::open(root)?;

    let backup = match backup {
        Some(b) => b.to_path_buf(),
        None => match guard.ctx().backups().latest_backup(path)? {
            Some(entry) => {
                println!(
                    "{} Using backup from {} ({})",
                    style("→").cyan(),
                    super::format_millis(entry.created_at),
                    entry.reason
                );
                entry.backup
            }
            None => bail!("No backup found for {}; pass --backup", path.display()),
        },
    };

    if guard.integrity().repair_file(path, Some(&backup)) {
        println!("{} Repaired {}", style("✓").green(), path.display());
        Ok(())
    } else {
        bail!("Repair of {} failed", path.display())
    }
}

/// Print registry statistics.
pub fn stats(root: &Path) -> Result<()> {
    let guard = super::open(root)?;
    let stats = guard.integrity().get_integrity_stats();

    println!("{}", style("Integrity Registry:").bold());
    println!("  Location:    {}", guard.integrity().store().location().display());
    println!("  Records:     {}", style(stats.total_records).cyan());
    println!("  Verified:    {}", style(stats.verified).green());
    println!("  Unverified:  {}", stats.unverified);
    println!("  Corrupted:   {}", style(stats.corrupted).red());
    println!("  Total bytes: {}", stats.total_bytes);
    if let Some(ts) = stats.last_verified {
        println!("  Last verify: {}", super::format_millis(ts));
    }
    let mut kinds: Vec<_> = stats.by_kind.iter().collect();
    kinds.sort_by_key(|(kind, _)| kind.to_string());
    for (kind, count) in kinds {
        println!("    {}: {}", kind, count);
    }
    Ok(())
}

/// Drop records of files that no longer exist.
pub fn cleanup(root: &Path) -> Result<()> {
    let guard = super::open(root)?;
    let removed = guard.integrity().cleanup()?;
    println!(
        "{} Removed {} stale record(s)",
        style("✓").green(),
        style(removed).cyan()
    );
    Ok(())
}
