//! Delivery engine module
//!
//! Sends built batches to the destination's bulk-update endpoints with a
//! bounded number of requests in flight, then closes each stream out once
//! its requests have finished.
//!
//! # Overview
//!
//! - `DeliveryEngine` - Per-stream dispatch, partial-failure retry and close-out
//! - `CompletionTracker` - The run's full stream set and the streams finished so far
//! - `deliver` - One-shot delivery of a set of batches

mod engine;
mod tracker;
mod types;

pub use engine::{deliver, DeliveryEngine};
pub use tracker::CompletionTracker;
pub use types::{DeliveryOutcome, StreamDeliveryStats};

#[cfg(test)]
mod tests;
