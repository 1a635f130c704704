//! Batch building module
//!
//! Consumes decoded messages in input order and groups each stream's records
//! into batches bounded by serialized size and record count.
//!
//! # Overview
//!
//! - `BatchBuilder` - Per-stream state machine producing `BatchEvent`s
//! - `flatten` / `remap` / `shape_record` - Record transforms applied before batching

mod builder;
mod transform;
mod types;

pub use builder::BatchBuilder;
pub use transform::{flatten, record_size, remap, shape_record, FLATTEN_SEPARATOR};
pub use types::{Batch, BatchEvent, BuilderPhase, FlushReason};

#[cfg(test)]
mod tests;
