//! ScopeSync CLI
//!
//! Command-line tools for the batch directories sync sessions spool to disk.
//!
//! # Commands
//!
//! - `inspect` - Display batch manifests and per-table row counts
//! - `verify` - Check that every part file decodes and matches its manifest
//! - `prune` - Remove batch directories left behind by old sessions

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ScopeSync batch directory tools.
#[derive(Parser)]
#[command(name = "scopesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display batch manifests
    Inspect {
        /// A batch directory, or a root holding several
        path: PathBuf,

        /// Decode parts and count row states
        #[arg(short, long)]
        rows: bool,

        /// Show part details
        #[arg(short, long)]
        parts: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify batch integrity
    Verify {
        /// A batch directory, or a root holding several
        path: PathBuf,

        /// Also report files the manifest does not list
        #[arg(short, long)]
        strict: bool,
    },

    /// Remove stale batch directories
    Prune {
        /// Root holding batch directories
        root: PathBuf,

        /// Minimum age in minutes
        #[arg(short, long, default_value = "60")]
        older_than: i64,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            path,
            rows,
            parts,
            format,
        } => commands::inspect::run(&path, rows, parts, &format)?,
        Commands::Verify { path, strict } => commands::verify::run(&path, strict)?,
        Commands::Prune {
            root,
            older_than,
            dry_run,
        } => commands::prune::run(&root, older_than, dry_run)?,
        Commands::Version => {
            println!("ScopeSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Batch manifest v{}", scopesync_protocol::BATCH_MANIFEST_VERSION);
        }
    }

    Ok(())
}
