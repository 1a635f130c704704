//! Rate limiting implementation
//!
//! Uses the governor crate for token bucket rate limiting over a
//! calls-per-window budget.

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for rate limiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Calls allowed per window
    pub calls: u32,
    /// Length of the window
    pub period: Duration,
    /// Burst size (max tokens in bucket), counted against `calls`
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            calls: 1800,
            period: Duration::from_secs(300),
            burst: 10,
        }
    }
}

impl RateLimiterConfig {
    /// Create a new rate limiter config
    pub fn new(calls: u32, period: Duration, burst: u32) -> Self {
        Self {
            calls,
            period,
            burst,
        }
    }

    /// Tokens available up front, never more than `calls`
    pub fn effective_burst(&self) -> u32 {
        self.burst.min(self.calls).max(1)
    }

    /// Interval between replenished tokens.
    ///
    /// The burst is taken out of the window budget, so a full bucket plus
    /// one window of refills stays within `calls`.
    pub fn replenish_interval(&self) -> Duration {
        self.period / self.calls.saturating_sub(self.effective_burst()).max(1)
    }

    fn quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.effective_burst()).unwrap_or(NonZeroU32::MIN);
        match Quota::with_period(self.replenish_interval()) {
            Some(quota) => quota.allow_burst(burst),
            // zero-length period: fall back to a per-second budget
            None => Quota::per_second(NonZeroU32::new(self.calls).unwrap_or(NonZeroU32::MIN))
                .allow_burst(burst),
        }
    }
}

/// Token bucket rate limiter shared by every in-flight request
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<Governor<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config
    pub fn new(config: &RateLimiterConfig) -> Self {
        Self {
            limiter: Arc::new(Governor::direct(config.quota())),
        }
    }

    /// Wait until a request can be made
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }

    /// Try to acquire a permit, returning immediately
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&RateLimiterConfig::default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish()
    }
}
