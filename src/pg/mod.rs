//! PostgreSQL backends
//!
//! Durable implementations of the store traits. The in-memory backends are
//! the default; these are wired in when `postgres_url` is configured.
//!
//! Concurrency mapping:
//! - the ledger's per-user exclusive section is `SELECT ... FOR UPDATE`
//! - the transaction store's CAS claim is a conditional `UPDATE ... WHERE status = $expected`
//! - the idempotency store's write-once pair is the primary key constraint

mod idempotency;
mod ledger;
mod transactions;

pub use idempotency::PgIdempotencyStore;
pub use ledger::PgLedger;
pub use transactions::PgTransactionStore;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// PostgreSQL connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create tables and indexes if missing. Idempotent.
    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(CREATE_ACCOUNTS_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_TRANSACTIONS_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_TRANSACTIONS_USER_INDEX)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_TRANSACTIONS_STATUS_INDEX)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_TRANSACTIONS_IDEM_INDEX)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_IDEMPOTENCY_TABLE)
            .execute(&self.pool)
            .await?;

        tracing::info!("PostgreSQL schema initialized");
        Ok(())
    }
}

const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts_tb (
    user_id    BIGINT PRIMARY KEY,
    balance    NUMERIC(20, 2) NOT NULL DEFAULT 0 CHECK (balance >= 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions_tb (
    id              UUID PRIMARY KEY,
    user_id         BIGINT NOT NULL,
    kind            SMALLINT NOT NULL,
    status          SMALLINT NOT NULL,
    amount          NUMERIC(20, 2) NOT NULL CHECK (amount > 0),
    bank_reference  TEXT UNIQUE,
    error_message   TEXT,
    idempotency_key TEXT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRANSACTIONS_USER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_user_created
    ON transactions_tb (user_id, created_at DESC)
"#;

const CREATE_TRANSACTIONS_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_status
    ON transactions_tb (status)
"#;

const CREATE_TRANSACTIONS_IDEM_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_idem_key
    ON transactions_tb (idempotency_key)
"#;

const CREATE_IDEMPOTENCY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS idempotency_keys_tb (
    user_id         BIGINT NOT NULL,
    idem_key        TEXT NOT NULL,
    response_status SMALLINT NOT NULL,
    response_body   TEXT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (user_id, idem_key)
)
"#;

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

// Requires a live PostgreSQL; set DATABASE_URL to run.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::{CachedResponse, IdempotencyStore};
    use crate::ledger::{BalanceLedger, Direction, LedgerError};
    use crate::transaction::{Transaction, TransactionStore, TxKind, TxStatus};
    use rust_decimal_macros::dec;

    async fn test_db() -> Option<Database> {
        let url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                println!("DATABASE_URL not set, skipping PostgreSQL test");
                return None;
            }
        };
        let db = Database::connect(&url).await.expect("connect failed");
        db.init_schema().await.expect("schema init failed");
        Some(db)
    }

    #[tokio::test]
    async fn test_transaction_roundtrip_and_cas() {
        let Some(db) = test_db().await else { return };
        let store = PgTransactionStore::new(db.pool().clone());

        let user_id = chrono::Utc::now().timestamp_millis();
        let tx = store
            .insert(Transaction::new(user_id, TxKind::Deposit, dec!(10.00), None))
            .await
            .unwrap();
        assert_eq!(tx.status, TxStatus::Pending);

        // CAS claim succeeds once
        assert!(
            store
                .transition_if(tx.id, TxStatus::Pending, TxStatus::Processing)
                .await
                .unwrap()
        );
        assert!(
            !store
                .transition_if(tx.id, TxStatus::Pending, TxStatus::Processing)
                .await
                .unwrap()
        );

        let fetched = store.get(tx.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TxStatus::Processing);

        store.remove(tx.id).await.unwrap();
        assert!(store.get(tx.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ledger_debit_guard() {
        let Some(db) = test_db().await else { return };
        let ledger = PgLedger::new(db.pool().clone());

        let user_id = chrono::Utc::now().timestamp_millis() + 1;
        ledger.open_account(user_id, dec!(25.00)).await.unwrap();

        let err = ledger
            .adjust(user_id, dec!(100.00), Direction::Debit)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.balance_of(user_id).await.unwrap(), dec!(25.00));
    }

    #[tokio::test]
    async fn test_idempotency_write_once() {
        let Some(db) = test_db().await else { return };
        let store = PgIdempotencyStore::new(db.pool().clone());

        let user_id = chrono::Utc::now().timestamp_millis() + 2;
        let response = CachedResponse {
            status: 201,
            body: r#"{"ok":true}"#.to_string(),
        };
        store.save(user_id, "k1", response.clone()).await.unwrap();

        let err = store
            .save(
                user_id,
                "k1",
                CachedResponse {
                    status: 500,
                    body: String::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::idempotency::IdempotencyError::DuplicateKey
        ));

        let cached = store.lookup(user_id, "k1").await.unwrap().unwrap();
        assert_eq!(cached, response);
    }
}
