//! HTTP client module
//!
//! Provides the HTTP client used for destination calls.
//!
//! # Features
//!
//! - **Bounded Retries**: Iterative retry loop with exponential backoff
//! - **Rate Limiting**: Token bucket rate limiter using governor
//! - **Error Classification**: 4xx fails at once, transport errors and 5xx retry

mod client;
mod rate_limit;

#[cfg(test)]
pub(crate) use client::describe_error_body;
pub use client::{HttpClient, HttpClientConfig, RequestConfig};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
