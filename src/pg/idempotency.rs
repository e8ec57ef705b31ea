//! PostgreSQL idempotency store
//!
//! The (user_id, idem_key) primary key is the write-once arbiter: the
//! second writer gets a unique violation, surfaced as `DuplicateKey`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::core_types::UserId;
use crate::idempotency::{CachedResponse, IdempotencyError, IdempotencyStore};

pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage_err(e: sqlx::Error) -> IdempotencyError {
    IdempotencyError::Storage(e.to_string())
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn lookup(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<CachedResponse>, IdempotencyError> {
        let row = sqlx::query(
            r#"
            SELECT response_status, response_body
            FROM idempotency_keys_tb
            WHERE user_id = $1 AND idem_key = $2
            "#,
        )
        .bind(user_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some(row) => {
                let status: i16 = row.try_get("response_status").map_err(storage_err)?;
                let body: String = row.try_get("response_body").map_err(storage_err)?;
                Ok(Some(CachedResponse {
                    status: status as u16,
                    body,
                }))
            }
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        user_id: UserId,
        key: &str,
        response: CachedResponse,
    ) -> Result<(), IdempotencyError> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys_tb (user_id, idem_key, response_status, response_body)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(key)
        .bind(response.status as i16)
        .bind(&response.body)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if super::is_unique_violation(&e) {
                IdempotencyError::DuplicateKey
            } else {
                storage_err(e)
            }
        })?;
        Ok(())
    }

    async fn purge_older_than(&self, age: Duration) -> Result<u64, IdempotencyError> {
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_keys_tb
            WHERE created_at < NOW() - INTERVAL '1 second' * $1
            "#,
        )
        .bind(age.as_secs() as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected())
    }
}
