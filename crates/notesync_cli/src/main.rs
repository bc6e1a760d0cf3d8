//! NoteSync CLI
//!
//! Command-line tools for NoteSync replica directories.
//!
//! # Commands
//!
//! - `inspect` - Display replica identity, table sizes and watermarks
//! - `check` - Show what a peer reports from the hash check
//! - `changed` - Dump change records after an id
//! - `fill-sync-rows` - Reconcile the change log with the tables
//! - `force-full-sync` - Reset the watermarks (and sync, with `--remote`)
//! - `sync` - Run one cycle against another replica directory

mod commands;

use clap::{Parser, Subcommand};
use commands::{CliError, Format};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// NoteSync replica tools.
#[derive(Parser)]
#[command(name = "notesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the replica directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display replica identity, table sizes and watermarks
    Inspect {
        /// Include content hashes
        #[arg(long)]
        hashes: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show the hash check answer
    Check {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Dump change records for debugging
    Changed {
        /// Only records with a greater id
        #[arg(short, long, default_value = "0")]
        after: u64,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Reconcile the change log with the tables
    FillSyncRows,

    /// Reset both watermarks, then sync if a remote is given
    ForceFullSync {
        /// Replica directory to sync with
        #[arg(short, long)]
        remote: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Run one sync cycle against another replica directory
    Sync {
        /// Replica directory to sync with
        #[arg(short, long)]
        remote: PathBuf,

        /// Retry transient failures with backoff
        #[arg(long)]
        retry: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { hashes, format } => {
            let path = cli.path.ok_or(CliError::MissingPath("inspect"))?;
            commands::inspect::run(&path, hashes, format)?;
        }
        Commands::Check { format } => {
            let path = cli.path.ok_or(CliError::MissingPath("check"))?;
            commands::check::run(&path, format)?;
        }
        Commands::Changed {
            after,
            limit,
            format,
        } => {
            let path = cli.path.ok_or(CliError::MissingPath("changed"))?;
            commands::changed::run(&path, after, limit, format)?;
        }
        Commands::FillSyncRows => {
            let path = cli.path.ok_or(CliError::MissingPath("fill-sync-rows"))?;
            commands::repair::run(&path)?;
        }
        Commands::ForceFullSync { remote, format } => {
            let path = cli.path.ok_or(CliError::MissingPath("force-full-sync"))?;
            commands::sync::run_force_full(&path, remote.as_deref(), format)?;
        }
        Commands::Sync {
            remote,
            retry,
            format,
        } => {
            let path = cli.path.ok_or(CliError::MissingPath("sync"))?;
            commands::sync::run(&path, &remote, retry, format)?;
        }
        Commands::Version => {
            println!("NoteSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
