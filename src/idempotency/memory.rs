//! In-memory idempotency backend
//!
//! The map's vacant/occupied entry distinction stands in for the
//! (user_id, key) uniqueness constraint of the PostgreSQL backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;

use super::{CachedResponse, IdempotencyError, IdempotencyStore};
use crate::core_types::UserId;

struct StoredRecord {
    response: CachedResponse,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: DashMap<(UserId, String), StoredRecord>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn lookup(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<CachedResponse>, IdempotencyError> {
        Ok(self
            .records
            .get(&(user_id, key.to_string()))
            .map(|r| r.response.clone()))
    }

    async fn save(
        &self,
        user_id: UserId,
        key: &str,
        response: CachedResponse,
    ) -> Result<(), IdempotencyError> {
        match self.records.entry((user_id, key.to_string())) {
            Entry::Occupied(_) => Err(IdempotencyError::DuplicateKey),
            Entry::Vacant(slot) => {
                slot.insert(StoredRecord {
                    response,
                    created_at: Utc::now(),
                });
                Ok(())
            }
        }
    }

    async fn purge_older_than(&self, age: Duration) -> Result<u64, IdempotencyError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(age)
                .map_err(|e| IdempotencyError::Storage(e.to_string()))?;

        let before = self.records.len();
        self.records.retain(|_, rec| rec.created_at >= cutoff);
        Ok((before - self.records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(status: u16, body: &str) -> CachedResponse {
        CachedResponse {
            status,
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_then_lookup() {
        let store = InMemoryIdempotencyStore::new();
        store.save(1, "key-a", resp(201, r#"{"id":"x"}"#)).await.unwrap();

        let cached = store.lookup(1, "key-a").await.unwrap().unwrap();
        assert_eq!(cached.status, 201);
        assert_eq!(cached.body, r#"{"id":"x"}"#);
    }

    #[tokio::test]
    async fn test_duplicate_save_rejected() {
        let store = InMemoryIdempotencyStore::new();
        store.save(1, "key-a", resp(201, "first")).await.unwrap();

        let err = store.save(1, "key-a", resp(201, "second")).await.unwrap_err();
        assert!(matches!(err, IdempotencyError::DuplicateKey));

        // First write survives
        let cached = store.lookup(1, "key-a").await.unwrap().unwrap();
        assert_eq!(cached.body, "first");
    }

    #[tokio::test]
    async fn test_keys_scoped_per_user() {
        let store = InMemoryIdempotencyStore::new();
        store.save(1, "same-key", resp(201, "user-1")).await.unwrap();
        store.save(2, "same-key", resp(201, "user-2")).await.unwrap();

        assert_eq!(store.lookup(1, "same-key").await.unwrap().unwrap().body, "user-1");
        assert_eq!(store.lookup(2, "same-key").await.unwrap().unwrap().body, "user-2");
    }

    #[tokio::test]
    async fn test_purge_removes_only_old_records() {
        let store = InMemoryIdempotencyStore::new();
        store.save(1, "old", resp(201, "old")).await.unwrap();

        // Backdate the record past the cutoff
        store
            .records
            .get_mut(&(1, "old".to_string()))
            .unwrap()
            .created_at = Utc::now() - chrono::Duration::hours(25);

        store.save(1, "fresh", resp(201, "fresh")).await.unwrap();

        let deleted = store
            .purge_older_than(Duration::from_secs(24 * 3600))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.lookup(1, "old").await.unwrap().is_none());
        assert!(store.lookup(1, "fresh").await.unwrap().is_some());
    }
}
