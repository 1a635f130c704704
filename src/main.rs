// Allow common clippy pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]

//! warehouse-relay CLI
//!
//! Extracts warehouse tables as protocol messages, or delivers them

use clap::Parser;
use tracing_subscriber::EnvFilter;
use warehouse_relay::cli::{Cli, Runner};
use warehouse_relay::LogLevel;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout carries protocol messages, so logs go to stderr
    let level: tracing::Level = LogLevel::from_flags(cli.verbose, cli.quiet).into();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let runner = Runner::new(cli);
    if let Err(e) = runner.run().await {
        for line in e.to_string().lines() {
            tracing::error!("{line}");
        }
        std::process::exit(1);
    }
}
