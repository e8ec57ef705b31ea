//! In-memory window store
//!
//! One timestamp deque per key inside a sharded map; the entry guard makes
//! evict + count + insert + expiry-refresh atomic per key while leaving
//! different keys fully parallel.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;

use super::{RateLimitError, WindowStore};

struct Window {
    hits: VecDeque<u64>,
    /// Lazy TTL stand-in for a store-side key expiry
    expires_at_ms: u64,
}

#[derive(Default)]
pub struct InMemoryWindowStore {
    windows: DashMap<String, Window>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop keys whose expiry has lapsed. Windows are ephemeral, so this is
    /// purely a memory-bound housekeeping call.
    pub fn evict_expired(&self, now_ms: u64) {
        self.windows.retain(|_, w| w.expires_at_ms > now_ms);
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn slide(&self, key: &str, now_ms: u64, window_ms: u64) -> Result<u64, RateLimitError> {
        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            hits: VecDeque::new(),
            expires_at_ms: now_ms + window_ms,
        });

        let window_start = now_ms.saturating_sub(window_ms);

        // Evict everything that slid out of the window
        while let Some(&oldest) = entry.hits.front() {
            if oldest <= window_start {
                entry.hits.pop_front();
            } else {
                break;
            }
        }

        let count = entry.hits.len() as u64;

        // The new request is recorded regardless of the admission outcome
        entry.hits.push_back(now_ms);
        entry.expires_at_ms = now_ms + window_ms;

        Ok(count)
    }
}
