//! fsguard CLI - Command-line interface for guarded file operations.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "fsguard")]
#[command(about = "Atomic, verified and recoverable file operations", long_about = None)]
#[command(version)]
struct Cli {
    /// Guarded root directory
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize fsguard state in the root directory
    Init,
    /// Atomically replace a file's content
    Write {
        /// Target file
        path: PathBuf,
        /// Content to write
        #[arg(long, conflicts_with = "from")]
        content: Option<String>,
        /// Read content from this file
        #[arg(long)]
        from: Option<PathBuf>,
        /// Back up the existing file first
        #[arg(long)]
        backup: bool,
    },
    /// Atomically move a file
    Move {
        /// Source file
        source: PathBuf,
        /// Destination path
        destination: PathBuf,
        /// Back up the destination if it exists
        #[arg(long)]
        backup: bool,
    },
    /// Atomically copy a file
    Copy {
        /// Source file
        source: PathBuf,
        /// Destination path
        destination: PathBuf,
    },
    /// Integrity records and verification
    Integrity {
        #[command(subcommand)]
        command: IntegrityCommands,
    },
    /// Interrupted operation recovery
    Recovery {
        #[command(subcommand)]
        command: RecoveryCommands,
    },
    /// Show recent operation log entries
    Log {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Print raw JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum IntegrityCommands {
    /// Record checksums for every file under a directory
    Scan {
        /// Directory to scan (defaults to the root)
        dir: Option<PathBuf>,
        /// Only scan the top level
        #[arg(long)]
        shallow: bool,
    },
    /// Verify files against their records
    Verify {
        /// Directory to verify (defaults to every record)
        dir: Option<PathBuf>,
        /// Only verify the top level
        #[arg(long)]
        shallow: bool,
    },
    /// Restore a file from a backup and re-verify it
    Repair {
        /// File to repair
        path: PathBuf,
        /// Backup copy to restore (defaults to the latest backup)
        #[arg(long)]
        backup: Option<PathBuf>,
    },
    /// Show registry statistics
    Stats,
    /// Drop records of files that no longer exist
    Cleanup,
}

#[derive(Subcommand)]
enum RecoveryCommands {
    /// Scan for interrupted operations
    Scan {
        /// Print the operations as JSON
        #[arg(long)]
        json: bool,
    },
    /// Recover one operation, or all recoverable ones
    Recover {
        /// Operation ID
        #[arg(required_unless_present = "all")]
        id: Option<String>,
        /// Override the planned strategy (resume, restart, rollback)
        #[arg(long)]
        strategy: Option<String>,
        /// Recover every recoverable operation
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
    /// Give up on an operation and delete its partial files
    Abandon {
        /// Operation ID
        id: String,
    },
    /// Show recovery statistics
    Status,
    /// Remove stale partial files and forget finished entries
    Cleanup,
}

fn main() -> Result<()> {
    // Respects RUST_LOG environment variable (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.root;

    match cli.command {
        Commands::Init => commands::init::run(&root),
        Commands::Write {
            path,
            content,
            from,
            backup,
        } => commands::ops::write(&root, &path, content, from.as_deref(), backup),
        Commands::Move {
            source,
            destination,
            backup,
        } => commands::ops::move_file(&root, &source, &destination, backup),
        Commands::Copy {
            source,
            destination,
        } => commands::ops::copy(&root, &source, &destination),
        Commands::Integrity { command } => match command {
            IntegrityCommands::Scan { dir, shallow } => {
                commands::integrity::scan(&root, dir.as_deref(), !shallow)
            }
            IntegrityCommands::Verify { dir, shallow } => {
                commands::integrity::verify(&root, dir.as_deref(), !shallow)
            }
            IntegrityCommands::Repair { path, backup } => {
                commands::integrity::repair(&root, &path, backup.as_deref())
            }
            IntegrityCommands::Stats => commands::integrity::stats(&root),
            IntegrityCommands::Cleanup => commands::integrity::cleanup(&root),
        },
        Commands::Recovery { command } => match command {
            RecoveryCommands::Scan { json } => commands::recovery::scan(&root, json),
            RecoveryCommands::Recover { id, strategy, all } => {
                if all {
                    commands::recovery::recover_all(&root)
                } else {
                    commands::recovery::recover(&root, id.as_deref(), strategy.as_deref())
                }
            }
            RecoveryCommands::Abandon { id } => commands::recovery::abandon(&root, &id),
            RecoveryCommands::Status => commands::recovery::status(&root),
            RecoveryCommands::Cleanup => commands::recovery::cleanup(&root),
        },
        Commands::Log { limit, json } => commands::log::run(&root, limit, json),
    }
}
