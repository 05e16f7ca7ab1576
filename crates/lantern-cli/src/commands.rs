//! Command-line arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Top-level arguments.
#[derive(Debug, Parser)]
#[command(name = "lantern")]
#[command(about = "Resumable PII scans of a content tree", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to the XDG config path)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Database file, overriding configuration
    #[arg(long, global = true, value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// What to do
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan spaces of a content tree, resuming earlier progress
    Scan {
        /// Root directory whose sub-directories are spaces
        root: PathBuf,
        /// Scan to run or resume; a new one is created when omitted
        #[arg(long)]
        scan_id: Option<String>,
        /// Restrict the scan to these spaces (repeatable)
        #[arg(long = "space", value_name = "KEY")]
        spaces: Vec<String>,
        /// Only scan spaces that were never scanned, failed, or are out of date
        #[arg(long, conflicts_with = "spaces")]
        stale: bool,
        /// Purge all scan state first, then scan everything under a new scan ID
        #[arg(long, conflicts_with_all = ["scan_id", "spaces", "stale"])]
        fresh: bool,
        /// Override the number of spaces scanned concurrently
        #[arg(long, value_name = "N")]
        max_concurrent: Option<usize>,
        /// Print every event as a JSON line while scanning
        #[arg(long)]
        watch: bool,
    },
    /// Print the recorded events of a space as JSON lines
    Events {
        /// Scan to read
        scan_id: String,
        /// Space to read
        space: String,
        /// Only events after this sequence
        #[arg(long, default_value_t = 0)]
        after: u64,
    },
    /// Show the checkpoints of a scan
    Checkpoints {
        /// Scan to inspect
        scan_id: String,
    },
    /// Aggregate counts of a space reconstructed from its events
    Summary {
        /// Scan to read
        scan_id: String,
        /// Space to summarise
        space: String,
    },
    /// List spaces of a content tree with their scan freshness
    Spaces {
        /// Root directory whose sub-directories are spaces
        root: PathBuf,
    },
    /// Delete RUNNING and PAUSED checkpoints, keeping completed history
    Reset,
    /// Delete checkpoints and events
    Purge {
        /// Only this scan; everything when omitted
        #[arg(long)]
        scan_id: Option<String>,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}
