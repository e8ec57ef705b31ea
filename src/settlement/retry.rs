//! Retry policy for transient bank failures
//!
//! Capped exponential backoff with full jitter. Attempt numbers are
//! 0-based: attempt N's delay is drawn from `[0, min(cap, base * 2^N)]`.

use rand::Rng;
use std::time::Duration;

use crate::config::SettlementConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(config: &SettlementConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Whether another attempt may be scheduled after `attempt` failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt + 1 <= self.max_retries
    }

    /// Jittered delay before re-enqueueing attempt `attempt + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);

        if exp.is_zero() {
            return Duration::ZERO;
        }
        // Full jitter spreads concurrent retries apart
        rand::thread_rng().gen_range(Duration::ZERO..=exp)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&SettlementConfig::default())
    }
}
