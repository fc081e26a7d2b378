//! Operation log viewer.

use anyhow::Result;
use console::style;
use fsguard_core::{LogRecord, LogStatus};
use std::path::Path;

/// Print the most recent `limit` audit log entries.
pub fn run(root: &Path, limit: usize, json: bool) -> Result<()> {
    let guard = super::open(root)?;
    let records = guard.ctx().logger().read_recent(limit)?;

    if records.is_empty() {
        println!("No log entries");
        return Ok(());
    }

    for record in &records {
        if json {
            println!("{}", serde_json::to_string(record)?);
            continue;
        }
        match record {
            LogRecord::Operation(entry) => {
                let status = format!("{:?}", entry.status).to_lowercase();
                let status = match entry.status {
                    LogStatus::Success => style(status).green(),
                    LogStatus::Failure => style(status).red(),
                    LogStatus::RolledBack | LogStatus::Warning => style(status).yellow(),
                    _ => style(status).dim(),
                };
                println!(
                    "{} {:<20} {:<11} {}",
                    super::format_millis(entry.started_at),
                    entry.kind,
                    status,
                    entry
                        .files
                        .iter()
                        .map(|f| f.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                if let Some(error) = &entry.error {
                    println!("    {} {}", style("×").red(), error);
                }
            }
            LogRecord::Security(entry) => {
                println!(
                    "{} {:<20} {} {}",
                    super::format_millis(entry.timestamp),
                    entry.event,
                    style("security").magenta(),
                    entry.details
                );
            }
        }
    }
    Ok(())
}
