//! Interrupted operation recovery commands.

use anyhow::{anyhow, bail, Result};
use console::style;
use fsguard_core::{InterruptedOperation, InterruptedStatus, RecoveryResult, RecoveryStrategy};
use std::path::Path;

fn print_operation(op: &InterruptedOperation) {
    let status = match op.status {
        InterruptedStatus::Recoverable => style(op.status.to_string()).green(),
        InterruptedStatus::Unrecoverable => style(op.status.to_string()).red(),
        _ => style(op.status.to_string()).yellow(),
    };
    println!("{} [{}] {}", style(&op.id).bold(), op.kind, status);
    println!("  Started: {}", super::format_millis(op.timestamp));
    if let Some(source) = &op.source {
        println!("  Source:  {}", source.display());
    }
    if let Some(target) = &op.target {
        println!("  Target:  {}", target.display());
    }
    println!(
        "  Progress: {}/{} bytes",
        op.progress.processed_size, op.progress.total_size
    );
    if let Some(plan) = &op.plan {
        println!(
            "  Plan:    {} (confidence {}%, {} risk, ~{:.1}s)",
            style(plan.strategy).cyan(),
            plan.confidence,
            plan.risk,
            plan.estimated_time.as_secs_f64()
        );
        println!("           {}", style(&plan.reason).dim());
    }
}

fn print_result(result: &RecoveryResult) {
    let strategy = result
        .strategy
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    if result.success {
        println!(
            "{} {} recovered via {}: {}",
            style("✓").green(),
            result.operation_id,
            strategy,
            result.message.as_deref().unwrap_or("")
        );
    } else {
        println!(
            "{} {} not recovered ({}): {}",
            style("×").red(),
            result.operation_id,
            strategy,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
}

/// Scan for interrupted operations and print their plans.
pub fn scan(root: &Path, json: bool) -> Result<()> {
    let guard = super::open(root)?;
    let found = guard.recovery().scan_for_interrupted_operations()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(());
    }

    if found.is_empty() {
        println!("{} No interrupted operations", style("✓").green());
        return Ok(());
    }

    println!(
        "{} {} interrupted operation(s):",
        style("⚠").yellow(),
        found.len()
    );
    println!();
    for op in &found {
        print_operation(op);
        println!();
    }

    let stats = guard.recovery().get_recovery_stats();
    println!(
        "{} recoverable, {} need review (average confidence {:.0}%)",
        style(stats.recoverable).green(),
        style(stats.unrecoverable).red(),
        stats.average_confidence
    );
    if stats.recoverable > 0 {
        println!(
            "  {} Run {} to apply the plans",
            style("→").cyan(),
            style("fsguard recovery recover --all").cyan()
        );
    }
    Ok(())
}

/// Recover one operation, optionally overriding its strategy.
pub fn recover(root: &Path, id: Option<&str>, strategy: Option<&str>) -> Result<()> {
    let id = id.ok_or_else(|| anyhow!("operation ID required"))?;
    let guard = super::open(root)?;
    guard.recovery().scan_for_interrupted_operations()?;

    let result = match strategy {
        Some(s) => {
            let strategy: RecoveryStrategy = s.parse().map_err(|e: String| anyhow!(e))?;
            guard.recovery().recover_operation_with(id, strategy)
        }
        None => guard.recovery().recover_operation(id),
    };

    print_result(&result);
    if !result.success {
        bail!("recovery failed");
    }
    Ok(())
}

/// Recover every operation whose plan is confident enough.
pub fn recover_all(root: &Path) -> Result<()> {
    let guard = super::open(root)?;
    guard.recovery().scan_for_interrupted_operations()?;

    let results = guard.recovery().recover_all_operations();
    if results.is_empty() {
        println!("{} Nothing to recover", style("✓").green());
        return Ok(());
    }
    for result in &results {
        print_result(result);
    }

    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        bail!("{} of {} recoveries failed", failed, results.len());
    }
    Ok(())
}

/// Abandon an operation, deleting its partial files.
pub fn abandon(root: &Path, id: &str) -> Result<()> {
    let guard = super::open(root)?;
    guard.recovery().scan_for_interrupted_operations()?;
    guard.recovery().abandon_operation(id)?;
    println!("{} Abandoned {}", style("✓").green(), id);
    Ok(())
}

/// Print counters over the interrupted operations found by a fresh scan.
pub fn status(root: &Path) -> Result<()> {
    let guard = super::open(root)?;
    guard.recovery().scan_for_interrupted_operations()?;
    let stats = guard.recovery().get_recovery_stats();

    println!("{}", style("Recovery Status:").bold());
    println!("  Tracked:       {}", style(stats.total).cyan());
    println!("  Recoverable:   {}", style(stats.recoverable).green());
    println!("  Need review:   {}", style(stats.unrecoverable).red());
    println!("  Recovered:     {}", stats.recovered);
    println!("  Abandoned:     {}", stats.abandoned);
    println!("  Confidence:    {:.0}% average", stats.average_confidence);

    let mut strategies: Vec<_> = stats.by_strategy.iter().collect();
    strategies.sort_by_key(|(strategy, _)| strategy.to_string());
    for (strategy, count) in strategies {
        println!("    {}: {}", strategy, count);
    }

    let locks = guard.state_dir().join("locks");
    let sidecars = guard.ctx().sidecars().list()?.len();
    println!("  Sidecars:      {} in {}", sidecars, locks.display());
    Ok(())
}

/// Delete stale partial files and forget finished entries.
pub fn cleanup(root: &Path) -> Result<()> {
    let guard = super::open(root)?;
    let removed = guard.recovery().cleanup()?;
    println!(
        "{} Cleaned up {} item(s)",
        style("✓").green(),
        style(removed).cyan()
    );
    Ok(())
}
