//! CLI module
//!
//! Command-line interface for both halves of the pipeline.
//!
//! # Commands
//!
//! - `extract` - Read warehouse tables and write protocol messages to stdout
//! - `load` - Read protocol messages from stdin and deliver them in batches

mod commands;
mod runner;

pub use commands::{Cli, Commands};
pub use runner::{LoadPipeline, Runner};
