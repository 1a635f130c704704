// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # warehouse-relay
//!
//! Replicates warehouse tables into analytics metadata in two halves joined
//! by a line-delimited JSON message protocol.
//!
//! ## Features
//!
//! - **Extraction**: Full-table and incremental sync with resumable bookmarks
//! - **Key Pre-filter**: Narrows extraction to keys the destination knows about
//! - **Batching**: Size- and count-bounded batches with field remapping
//! - **Delivery**: Bounded concurrency, rate limiting and retry with backoff
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use warehouse_relay::database::DuckDbSource;
//! use warehouse_relay::engine::SyncEngine;
//! use warehouse_relay::protocol::MessageWriter;
//!
//! let db = DuckDbSource::connect(&config)?;
//! let mut engine = SyncEngine::new(&db);
//! let state = engine.sync(&catalog, state, &mut MessageWriter::stdout()).await?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  RECORD/SCHEMA/STATE  ┌──────────────┐
//! │   extract    │ ────────────────────▶ │     load     │
//! ├──────────────┤     ACTIVATE/VOLUME   ├──────────────┤
//! │ catalog      │                       │ batch        │
//! │ state        │                       │ delivery     │
//! │ engine       │                       │ destination  │
//! │ database     │                       │ http         │
//! └──────────────┘                       └──────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(missing_docs)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Configuration for both halves of the pipeline
pub mod config;

/// Line-delimited message protocol
pub mod protocol;

/// JSON schema types and record validation
pub mod schema;

/// Stream catalog, discovery and resolution
pub mod catalog;

/// Source warehouse access via DuckDB
pub mod database;

/// Bookmarks and resumable state
pub mod state;

/// Extraction engine
pub mod engine;

/// HTTP client with retry and rate limiting
pub mod http;

/// Destination API endpoints and key pre-filter
pub mod destination;

/// Record transformation and batching
pub mod batch;

/// Batch delivery and run completion
pub mod delivery;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
