//! Transaction state machine
//!
//! State IDs are designed for PostgreSQL storage as SMALLINT.
//! Terminal states: SUCCESS (20), FAILED (-10).
//!
//! ```text
//! pending -> processing            (worker claims the job)
//! processing -> success            (bank call succeeded; ledger updated)
//! processing -> failed             (non-retryable bank error)
//! processing -> pending            (retryable bank error; re-enqueued)
//! pending|processing -> success|failed   (webhook reconciliation)
//! ```
//!
//! Transitions are monotonic except the single retry-induced
//! processing -> pending loop. Terminal states refuse every further
//! transition; callers log the conflict and treat it as a no-op.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum TxStatus {
    /// Accepted at intake, queued for settlement (or reverted for retry)
    Pending = 0,

    /// Claimed by a settlement worker; bank call in flight
    Processing = 10,

    /// Terminal: bank settled, ledger updated
    Success = 20,

    /// Terminal: rejected, retries exhausted, or internal fault
    Failed = -10,
}

impl TxStatus {
    /// Terminal states permit no further transition.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Success | TxStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        match (self, next) {
            (TxStatus::Pending, TxStatus::Processing) => true,
            // Webhook reconciliation may finalize a still-pending transaction
            (TxStatus::Pending, TxStatus::Success | TxStatus::Failed) => true,
            (TxStatus::Processing, TxStatus::Success | TxStatus::Failed) => true,
            // The one sanctioned loop: retryable bank error reverts the claim
            (TxStatus::Processing, TxStatus::Pending) => true,
            _ => false,
        }
    }

    /// Numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from a PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TxStatus::Pending),
            10 => Some(TxStatus::Processing),
            20 => Some(TxStatus::Success),
            -10 => Some(TxStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Processing => "processing",
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TxStatus::Pending),
            "processing" => Ok(TxStatus::Processing),
            "success" => Ok(TxStatus::Success),
            "failed" => Ok(TxStatus::Failed),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}
