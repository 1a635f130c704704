//! Destination API module
//!
//! Describes the analytics API that receives delivered batches and supplies
//! the key sets used to narrow extraction.
//!
//! # Overview
//!
//! - `Endpoint` - Bulk-update path for a stream, routed by metadata kind
//! - `BulkUpdateResponse` - Per-record outcome counts of one bulk update
//! - `KeyFilter` / `AggregationKeyFilter` - Valid entity keys from the aggregation API

mod aggregation;
mod endpoint;
mod types;

pub use aggregation::{AggregationKeyFilter, KeyFilter, StaticKeyFilter};
pub use endpoint::Endpoint;
pub use types::{destination_client_config, BulkUpdateResponse, RecordError, INTEGRATION_KEY_HEADER};

#[cfg(test)]
mod tests;
