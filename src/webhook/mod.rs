//! Webhook reconciliation
//!
//! Externally signed bank callbacks are an alternate, idempotent path to
//! the same terminal states the settlement worker produces. A callback for
//! an already-terminal transaction is a no-op, which is also what keeps
//! this path and the worker path from both applying the ledger mutation.

pub mod signature;

use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::core_types::TxId;
use crate::ledger::{BalanceLedger, Direction, LedgerError};
use crate::transaction::{StoreError, TransactionStore, TxKind, TxStatus};

/// Parsed webhook payload (after signature verification).
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub transaction_id: TxId,
    pub bank_reference: String,
    /// "success" or "failed"
    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown transaction {0}")]
    UnknownTransaction(TxId),

    #[error("Unsupported webhook status: {0}")]
    UnsupportedStatus(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// What a delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Transaction moved to the terminal state carried by the callback
    Applied(TxStatus),
    /// Transaction was already terminal; nothing changed
    AlreadyFinal(TxStatus),
}

pub struct WebhookReconciler {
    store: Arc<dyn TransactionStore>,
    ledger: Arc<dyn BalanceLedger>,
    secret: String,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        ledger: Arc<dyn BalanceLedger>,
        secret: String,
    ) -> Self {
        Self {
            store,
            ledger,
            secret,
        }
    }

    /// Verify and apply a raw signed payload.
    pub async fn handle(
        &self,
        raw: &serde_json::Value,
    ) -> Result<ReconcileOutcome, WebhookError> {
        if !signature::verify(&self.secret, raw) {
            warn!("Webhook rejected: signature mismatch");
            return Err(WebhookError::InvalidSignature);
        }

        let payload: WebhookPayload = serde_json::from_value(raw.clone())
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        self.reconcile(payload).await
    }

    /// Apply a verified payload to the referenced transaction.
    pub async fn reconcile(
        &self,
        payload: WebhookPayload,
    ) -> Result<ReconcileOutcome, WebhookError> {
        let new_status: TxStatus = payload
            .status
            .parse()
            .map_err(|_| WebhookError::UnsupportedStatus(payload.status.clone()))?;
        if !new_status.is_terminal() {
            return Err(WebhookError::UnsupportedStatus(payload.status));
        }

        let tx = self
            .store
            .get(payload.transaction_id)
            .await?
            .ok_or(WebhookError::UnknownTransaction(payload.transaction_id))?;

        // Idempotent delivery: redelivery after either settlement path
        // finished must not re-apply anything.
        if tx.status.is_terminal() {
            info!(tx_id = %tx.id, status = %tx.status, "Webhook redelivery for settled transaction");
            return Ok(ReconcileOutcome::AlreadyFinal(tx.status));
        }

        if new_status == TxStatus::Success {
            // Ledger mutation before the terminal mark, mirroring the worker
            let direction = match tx.kind {
                TxKind::Deposit => Direction::Credit,
                TxKind::Withdrawal => Direction::Debit,
            };
            match self.ledger.adjust(tx.user_id, tx.amount, direction).await {
                Ok(_) => {}
                Err(e @ LedgerError::InsufficientBalance { .. }) => {
                    // The bank says settled but our ledger cannot cover the
                    // debit; surface as failed, never underflow.
                    warn!(tx_id = %tx.id, error = %e, "Webhook debit failed, marking failed");
                    let updated = self
                        .store
                        .update_status(tx.id, TxStatus::Failed, None, Some(e.to_string()))
                        .await?;
                    return Ok(ReconcileOutcome::Applied(updated.status));
                }
                Err(e) => return Err(e.into()),
            }
        }

        // References are recorded only for settled money movement
        let bank_reference =
            (new_status == TxStatus::Success).then(|| payload.bank_reference.clone());

        match self
            .store
            .update_status(tx.id, new_status, bank_reference, payload.error_message)
            .await
        {
            Ok(updated) => {
                info!(tx_id = %tx.id, status = %updated.status, "Webhook reconciliation applied");
                Ok(ReconcileOutcome::Applied(updated.status))
            }
            Err(StoreError::TerminalState { current, .. }) => {
                // Lost a race against the worker between our read and write
                info!(tx_id = %tx.id, status = %current, "Webhook lost settlement race");
                Ok(ReconcileOutcome::AlreadyFinal(current))
            }
            Err(e) => Err(e.into()),
        }
    }
}
