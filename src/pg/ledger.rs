//! PostgreSQL balance ledger
//!
//! `SELECT ... FOR UPDATE` gives each adjustment an exclusive per-user
//! section; the insufficiency check and the decrement commit together or
//! not at all.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::core_types::UserId;
use crate::ledger::{BalanceLedger, Direction, LedgerError};

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the account row if it does not exist yet.
    pub async fn open_account(
        &self,
        user_id: UserId,
        initial: Decimal,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO accounts_tb (user_id, balance)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(initial)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BalanceLedger for PgLedger {
    async fn adjust(
        &self,
        user_id: UserId,
        amount: Decimal,
        direction: Direction,
    ) -> Result<Decimal, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let balance: Option<Decimal> = sqlx::query_scalar(
            "SELECT balance FROM accounts_tb WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let balance = balance.ok_or(LedgerError::UserNotFound(user_id))?;

        let new_balance = match direction {
            Direction::Credit => balance + amount,
            Direction::Debit => {
                if balance < amount {
                    // Implicit rollback when tx drops
                    return Err(LedgerError::InsufficientBalance {
                        available: balance,
                        required: amount,
                    });
                }
                balance - amount
            }
        };

        sqlx::query(
            "UPDATE accounts_tb SET balance = $1, updated_at = NOW() WHERE user_id = $2",
        )
        .bind(new_balance)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(new_balance)
    }

    async fn balance_of(&self, user_id: UserId) -> Result<Decimal, LedgerError> {
        let balance: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM accounts_tb WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        balance.ok_or(LedgerError::UserNotFound(user_id))
    }
}
