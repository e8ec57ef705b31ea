//! Idempotency Store
//!
//! Maps (user, client-supplied key) to the response produced by the first
//! successful intake, enabling safe request replay. Records are write-once
//! per pair: the uniqueness constraint is the concurrency arbiter, so
//! duplicate submissions racing each other resolve to one stored response.
//!
//! Callers treat `lookup` as advisory-then-authoritative: check, attempt to
//! create the transaction, and on a `DuplicateKey` at save time re-fetch and
//! return the now-present cached response instead of erroring.

mod memory;

pub use memory::InMemoryIdempotencyStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::core_types::UserId;

/// The captured response from the first intake for a (user, key) pair.
///
/// Replays must return this verbatim - the body is stored as the exact
/// serialized bytes that went out the first time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("Idempotency key already exists for this user")]
    DuplicateKey,

    #[error("Idempotency storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Fetch the cached response for (user, key), if any.
    async fn lookup(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<CachedResponse>, IdempotencyError>;

    /// Store the response for (user, key). Fails with [`IdempotencyError::DuplicateKey`]
    /// if the pair already exists - concurrent duplicates must not silently
    /// overwrite the first write.
    async fn save(
        &self,
        user_id: UserId,
        key: &str,
        response: CachedResponse,
    ) -> Result<(), IdempotencyError>;

    /// Delete records older than `age`, returning the deleted count.
    /// Driven by the periodic sweep task.
    async fn purge_older_than(&self, age: Duration) -> Result<u64, IdempotencyError>;
}
