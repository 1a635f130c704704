//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Warehouse to analytics metadata relay
#[derive(Parser, Debug)]
#[command(name = "warehouse-relay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Warnings and errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract selected warehouse tables as protocol messages on stdout
    Extract {
        /// Configuration file (JSON or YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// State file from a previous run
        #[arg(short, long)]
        state: Option<PathBuf>,

        /// Catalog file with stream selection
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Print the discovered catalog and exit
        #[arg(short, long)]
        discover: bool,

        /// Maximum rows per stream
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Deliver protocol messages from stdin to the destination
    Load {
        /// Configuration file (JSON or YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Maximum serialized bytes per batch
        #[arg(long, alias = "batch_bytes")]
        batch_bytes: Option<usize>,

        /// Maximum records per batch
        #[arg(long, alias = "batch_records")]
        batch_records: Option<usize>,

        /// Seconds to wait after each successful request
        #[arg(long, alias = "request_delay")]
        request_delay: Option<f64>,

        /// Maximum requests in flight
        #[arg(long, alias = "rate_limit")]
        rate_limit: Option<usize>,

        /// Attempts per request, including the first
        #[arg(long)]
        attempts: Option<u32>,
    },
}
