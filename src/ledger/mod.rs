//! Balance Ledger
//!
//! Sole owner of user balances. Every mutation goes through [`BalanceLedger::adjust`],
//! which runs the balance check and the write inside one per-user critical
//! section, so concurrent adjustments for the same user are strictly ordered
//! and the balance can never go negative. Adjustments for different users do
//! not block each other.

mod memory;

pub use memory::InMemoryLedger;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::core_types::UserId;

/// Which way an adjustment moves the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Credit,
    Debit,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient balance. Available: {available}, Required: {required}")]
    InsufficientBalance {
        available: Decimal,
        required: Decimal,
    },

    #[error("User {0} not found")]
    UserNotFound(UserId),

    #[error("Ledger storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

/// Per-user balance operations, exclusive per user.
///
/// A debit evaluates `balance < amount` atomically with the decrement:
/// no other adjustment for that user can be observed between the check
/// and the write.
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Apply a credit or debit and return the new balance.
    async fn adjust(
        &self,
        user_id: UserId,
        amount: Decimal,
        direction: Direction,
    ) -> Result<Decimal, LedgerError>;

    /// Current balance. Advisory only for intake-time withdrawal checks:
    /// it reserves nothing, the authoritative check re-runs at debit time.
    async fn balance_of(&self, user_id: UserId) -> Result<Decimal, LedgerError>;
}
