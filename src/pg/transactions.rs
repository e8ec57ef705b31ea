//! PostgreSQL transaction store
//!
//! `update_status` runs its read-check-write under `FOR UPDATE`;
//! `transition_if` is the one-statement CAS the workers claim jobs with.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::core_types::TxId;
use crate::transaction::{
    Page, StoreError, Transaction, TransactionStore, TxFilter, TxKind, TxStatus,
};

const SELECT_COLUMNS: &str = "id, user_id, kind, status, amount, bank_reference, \
                              error_message, idempotency_key, created_at, updated_at";

pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_tx(row: &PgRow) -> Result<Transaction, StoreError> {
        let kind_id: i16 = row.try_get("kind")?;
        let status_id: i16 = row.try_get("status")?;
        Ok(Transaction {
            id: row.try_get::<Uuid, _>("id")?,
            user_id: row.try_get("user_id")?,
            kind: TxKind::from_id(kind_id)
                .ok_or_else(|| StoreError::Storage(format!("unknown kind id {}", kind_id)))?,
            status: TxStatus::from_id(status_id).ok_or_else(|| {
                StoreError::Storage(format!("unknown status id {}", status_id))
            })?,
            amount: row.try_get::<Decimal, _>("amount")?,
            bank_reference: row.try_get("bank_reference")?,
            error_message: row.try_get("error_message")?,
            idempotency_key: row.try_get("idempotency_key")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn insert(&self, tx: Transaction) -> Result<Transaction, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO transactions_tb
                (id, user_id, kind, status, amount, bank_reference,
                 error_message, idempotency_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(tx.id)
        .bind(tx.user_id)
        .bind(tx.kind.id())
        .bind(tx.status.id())
        .bind(tx.amount)
        .bind(&tx.bank_reference)
        .bind(&tx.error_message)
        .bind(&tx.idempotency_key)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_tx(&row)
    }

    async fn get(&self, id: TxId) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM transactions_tb WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_tx).transpose()
    }

    async fn list(
        &self,
        filter: TxFilter,
        page: Page,
    ) -> Result<(Vec<Transaction>, u64), StoreError> {
        let kind_id = filter.kind.map(|k| k.id());
        let status_id = filter.status.map(|s| s.id());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM transactions_tb
            WHERE ($1::BIGINT IS NULL OR user_id = $1)
              AND ($2::SMALLINT IS NULL OR kind = $2)
              AND ($3::SMALLINT IS NULL OR status = $3)
            "#,
        )
        .bind(filter.user_id)
        .bind(kind_id)
        .bind(status_id)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM transactions_tb
            WHERE ($1::BIGINT IS NULL OR user_id = $1)
              AND ($2::SMALLINT IS NULL OR kind = $2)
              AND ($3::SMALLINT IS NULL OR status = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(filter.user_id)
        .bind(kind_id)
        .bind(status_id)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(Self::row_to_tx(row)?);
        }
        Ok((out, total as u64))
    }

    async fn update_status(
        &self,
        id: TxId,
        status: TxStatus,
        bank_reference: Option<String>,
        error_message: Option<String>,
    ) -> Result<Transaction, StoreError> {
        let mut db_tx = self.pool.begin().await?;

        let current_id: Option<i16> =
            sqlx::query_scalar("SELECT status FROM transactions_tb WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *db_tx)
                .await?;

        let current_id = current_id.ok_or(StoreError::NotFound(id))?;
        let current = TxStatus::from_id(current_id)
            .ok_or_else(|| StoreError::Storage(format!("unknown status id {}", current_id)))?;

        if current.is_terminal() {
            return Err(StoreError::TerminalState {
                id,
                current,
                requested: status,
            });
        }
        if !current.can_transition_to(status) {
            return Err(StoreError::IllegalTransition {
                id,
                current,
                requested: status,
            });
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE transactions_tb
            SET status = $1,
                bank_reference = COALESCE($2, bank_reference),
                error_message = COALESCE($3, error_message),
                updated_at = NOW()
            WHERE id = $4
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(status.id())
        .bind(&bank_reference)
        .bind(&error_message)
        .bind(id)
        .fetch_one(&mut *db_tx)
        .await
        .map_err(|e| {
            if super::is_unique_violation(&e) {
                StoreError::DuplicateBankReference(bank_reference.clone().unwrap_or_default())
            } else {
                e.into()
            }
        })?;

        let updated = Self::row_to_tx(&row)?;
        db_tx.commit().await?;
        Ok(updated)
    }

    async fn transition_if(
        &self,
        id: TxId,
        expected: TxStatus,
        new: TxStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions_tb
            SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(new.id())
        .bind(id)
        .bind(expected.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, id: TxId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM transactions_tb WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
