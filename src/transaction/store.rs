//! Transaction records and the store contract
//!
//! The store owns every status transition. `update_status` and
//! `transition_if` read the row under the same exclusive per-row section,
//! so two workers (or a worker and the webhook reconciler) can never move
//! the same transaction at the same time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::state::TxStatus;
use crate::core_types::{TxId, UserId};

/// Deposit moves money in, withdrawal moves it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Deposit,
    Withdrawal,
}

impl TxKind {
    /// Numeric ID for PostgreSQL storage
    pub fn id(&self) -> i16 {
        match self {
            TxKind::Deposit => 1,
            TxKind::Withdrawal => 2,
        }
    }

    /// Convert from a PostgreSQL kind ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TxKind::Deposit),
            2 => Some(TxKind::Withdrawal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Deposit => "deposit",
            TxKind::Withdrawal => "withdrawal",
        }
    }
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TxKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deposit" => Ok(TxKind::Deposit),
            "withdrawal" => Ok(TxKind::Withdrawal),
            _ => Err(format!("Invalid transaction kind: {}", s)),
        }
    }
}

/// A deposit or withdrawal moving through the settlement pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub user_id: UserId,
    pub kind: TxKind,
    pub status: TxStatus,
    /// Always > 0, normalized to 2 decimal places at intake
    pub amount: Decimal,
    /// Set at most once, only on success; globally unique
    pub bank_reference: Option<String>,
    pub error_message: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        user_id: UserId,
        kind: TxKind,
        amount: Decimal,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            status: TxStatus::Pending,
            amount,
            bank_reference: None,
            error_message: None,
            idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Optional filters for listing
#[derive(Debug, Clone, Copy, Default)]
pub struct TxFilter {
    pub user_id: Option<UserId>,
    pub kind: Option<TxKind>,
    pub status: Option<TxStatus>,
}

/// Pagination bounds. `limit` is clamped to 1..=100.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub const MAX_LIMIT: usize = 100;

    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(20, 0)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Transaction {0} not found")]
    NotFound(TxId),

    #[error("Transaction {id} is terminal ({current}); refusing transition to {requested}")]
    TerminalState {
        id: TxId,
        current: TxStatus,
        requested: TxStatus,
    },

    #[error("Illegal transition for {id}: {current} -> {requested}")]
    IllegalTransition {
        id: TxId,
        current: TxStatus,
        requested: TxStatus,
    },

    #[error("Bank reference {0} already recorded")]
    DuplicateBankReference(String),

    #[error("Transaction storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persist a freshly created pending transaction.
    async fn insert(&self, tx: Transaction) -> Result<Transaction, StoreError>;

    async fn get(&self, id: TxId) -> Result<Option<Transaction>, StoreError>;

    /// Most-recent-first stable listing with the total match count
    /// (for pagination) computed over the same filter.
    async fn list(
        &self,
        filter: TxFilter,
        page: Page,
    ) -> Result<(Vec<Transaction>, u64), StoreError>;

    /// Transition under the per-row exclusive section. Refuses exits from
    /// terminal states ([`StoreError::TerminalState`]) and transitions the
    /// state machine does not allow. `bank_reference` may be set at most
    /// once and must be globally unique.
    async fn update_status(
        &self,
        id: TxId,
        status: TxStatus,
        bank_reference: Option<String>,
        error_message: Option<String>,
    ) -> Result<Transaction, StoreError>;

    /// Compare-and-swap claim: move `id` from `expected` to `new` only if it
    /// is still in `expected`. Returns false when another owner got there
    /// first. This is how a worker acquires sole ownership of a job.
    async fn transition_if(
        &self,
        id: TxId,
        expected: TxStatus,
        new: TxStatus,
    ) -> Result<bool, StoreError>;

    /// Remove a transaction that was never enqueued (intake idempotency-race
    /// loser). Settled transactions are never deleted.
    async fn remove(&self, id: TxId) -> Result<(), StoreError>;
}
