//! Sliding-window rate limiter
//!
//! Admission control keyed by an arbitrary string (`user:<id>:<endpoint>`
//! or a global key). For each check the window store atomically evicts
//! timestamps older than the window, counts the remainder, records the new
//! request (even when it will be denied, so sustained over-limit traffic
//! keeps aging out instead of resetting), and refreshes the key's expiry.
//!
//! Window data is ephemeral and never persisted; losing it only widens
//! admission briefly. A failing window store follows the configured
//! fail-open/fail-closed policy (default: closed).

mod memory;

pub use memory::InMemoryWindowStore;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Rate limit window store error: {0}")]
    Storage(String),
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Requests left in the current window after this one
    pub remaining: u32,
    /// Unix timestamp (seconds) when the window resets
    pub reset_at: u64,
    /// Seconds to wait before retrying; 0 when allowed
    pub retry_after: u64,
}

/// Storage for per-key request windows.
///
/// `slide` must apply evict + count + insert + expiry-refresh as one atomic
/// unit per key; operations on different keys proceed fully in parallel.
/// Returns the post-eviction count, excluding the timestamp just inserted.
#[async_trait]
pub trait WindowStore: Send + Sync {
    async fn slide(&self, key: &str, now_ms: u64, window_ms: u64) -> Result<u64, RateLimitError>;
}

#[async_trait]
impl WindowStore for Box<dyn WindowStore> {
    async fn slide(&self, key: &str, now_ms: u64, window_ms: u64) -> Result<u64, RateLimitError> {
        (**self).slide(key, now_ms, window_ms).await
    }
}

/// What to do when the window store itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Admit unmetered traffic
    Open,
    /// Deny until the store recovers (the safer default)
    Closed,
}

pub struct RateLimiter<S: WindowStore> {
    store: S,
    failure_policy: FailurePolicy,
}

impl<S: WindowStore> RateLimiter<S> {
    pub fn new(store: S, failure_policy: FailurePolicy) -> Self {
        Self {
            store,
            failure_policy,
        }
    }

    /// Check whether a request under `key` is admitted right now.
    pub async fn check(&self, key: &str, limit: u32, window_secs: u64) -> RateDecision {
        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        let window_ms = window_secs * 1_000;

        let count = match self.store.slide(key, now_ms, window_ms).await {
            Ok(count) => count,
            Err(e) => {
                warn!(key, error = %e, policy = ?self.failure_policy, "Window store failed");
                return self.degraded_decision(limit, window_secs, now_ms);
            }
        };

        let allowed = count < limit as u64;
        RateDecision {
            allowed,
            limit,
            remaining: (limit as u64).saturating_sub(count + 1) as u32,
            reset_at: now_ms / 1_000 + window_secs,
            retry_after: if allowed { 0 } else { window_secs },
        }
    }

    fn degraded_decision(&self, limit: u32, window_secs: u64, now_ms: u64) -> RateDecision {
        match self.failure_policy {
            FailurePolicy::Open => RateDecision {
                allowed: true,
                limit,
                remaining: limit.saturating_sub(1),
                reset_at: now_ms / 1_000 + window_secs,
                retry_after: 0,
            },
            FailurePolicy::Closed => RateDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at: now_ms / 1_000 + window_secs,
                retry_after: window_secs,
            },
        }
    }
}
