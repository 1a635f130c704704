//! Delivery types

use std::time::Duration;

/// Delivery totals for one stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDeliveryStats {
    pub stream: String,
    /// Primary batches sent
    pub batches: usize,
    /// Records sent in primary batches
    pub records: u64,
    /// Records the destination reported as updated, retries included
    pub updated: u64,
    /// Records the destination reported as received in primary batches
    pub total: u64,
    /// Records rejected in primary batches
    pub failed: u64,
    /// Records sent again in the retry pass
    pub retried: u64,
    /// Records still rejected after the retry pass
    pub terminal_failures: u64,
    /// Latency of each request, in completion order
    pub request_times: Vec<Duration>,
}

impl StreamDeliveryStats {
    /// Create empty stats for a stream
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            ..Default::default()
        }
    }

    /// Sum of all request latencies
    pub fn total_request_time(&self) -> Duration {
        self.request_times.iter().sum()
    }
}

/// Result of delivering a set of batches
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryOutcome {
    /// Per-stream totals, in close-out order
    pub streams: Vec<StreamDeliveryStats>,
    /// Whether every configured stream was closed out
    pub complete: bool,
}

impl DeliveryOutcome {
    /// Totals for one stream
    pub fn stream(&self, name: &str) -> Option<&StreamDeliveryStats> {
        self.streams.iter().find(|s| s.stream == name)
    }
}
