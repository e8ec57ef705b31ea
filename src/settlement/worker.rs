//! Settlement worker
//!
//! Drains the job queue and drives each transaction to a terminal or
//! retryable-pending state. The central reliability invariant: whatever
//! goes wrong inside a job, the transaction never stays stuck in
//! `processing` and the worker loop never dies.
//!
//! The CAS claim (`pending -> processing`) is the single-owner lock for the
//! transition itself; it is NOT held across the bank call, which may take
//! seconds and carries its own timeout.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use super::queue::{Job, JobSender, SharedJobReceiver};
use super::retry::RetryPolicy;
use crate::bank::{BankApi, BankError};
use crate::ledger::{BalanceLedger, Direction, LedgerError};
use crate::transaction::{StoreError, Transaction, TransactionStore, TxKind, TxStatus};

#[derive(Debug, Error)]
enum SettleError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct SettlementWorker {
    store: Arc<dyn TransactionStore>,
    ledger: Arc<dyn BalanceLedger>,
    bank: Arc<dyn BankApi>,
    jobs: JobSender,
    retry: RetryPolicy,
    bank_timeout: Duration,
}

impl SettlementWorker {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        ledger: Arc<dyn BalanceLedger>,
        bank: Arc<dyn BankApi>,
        jobs: JobSender,
        retry: RetryPolicy,
        bank_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            bank,
            jobs,
            retry,
            bank_timeout,
        }
    }

    /// Worker loop: pull jobs until the queue closes. Workers share one
    /// receiver; each job is delivered to exactly one of them.
    pub async fn run(&self, worker_id: usize, receiver: SharedJobReceiver) {
        info!(worker_id, "Settlement worker started");

        loop {
            let job = { receiver.lock().await.recv().await };
            match job {
                Some(job) => self.process_job(job).await,
                None => {
                    info!(worker_id, "Job queue closed, worker stopping");
                    break;
                }
            }
        }
    }

    /// Process one job to a terminal or retry-pending outcome. Unexpected
    /// failures are converted into a `failed` transition rather than
    /// propagated.
    pub async fn process_job(&self, job: Job) {
        if let Err(e) = self.settle(job).await {
            error!(tx_id = %job.tx_id, error = %e, "Unexpected error during settlement");
            self.transition(
                job.tx_id,
                TxStatus::Failed,
                None,
                Some(format!("Internal error: {}", e)),
            )
            .await;
        }
    }

    async fn settle(&self, job: Job) -> Result<(), SettleError> {
        let Some(tx) = self.store.get(job.tx_id).await? else {
            error!(tx_id = %job.tx_id, "Transaction not found, dropping job");
            return Ok(());
        };

        // Duplicate delivery safety
        if tx.status.is_terminal() {
            info!(tx_id = %tx.id, status = %tx.status, "Already settled, nothing to do");
            return Ok(());
        }

        // Single-owner claim; losing it means another worker or the webhook
        // reconciler owns this transaction now.
        if !self
            .store
            .transition_if(tx.id, TxStatus::Pending, TxStatus::Processing)
            .await?
        {
            info!(tx_id = %tx.id, "Claim lost, job already owned elsewhere");
            return Ok(());
        }

        let outcome = self.call_bank(&tx).await;

        match outcome {
            Ok(bank_reference) => self.finalize_success(&tx, bank_reference).await,
            Err(ref e) if e.is_retryable() => self.handle_transient(&tx, job, e).await,
            Err(e) => {
                warn!(tx_id = %tx.id, error = %e, "Permanent bank error");
                self.transition(tx.id, TxStatus::Failed, None, Some(e.to_string()))
                    .await;
                Ok(())
            }
        }
    }

    /// Bank call with its own timeout; an elapsed timeout is treated as the
    /// bank's timeout error (retryable).
    async fn call_bank(&self, tx: &Transaction) -> Result<String, BankError> {
        let call = async {
            match tx.kind {
                TxKind::Deposit => self.bank.process_deposit(tx.amount, tx.user_id).await,
                TxKind::Withdrawal => self.bank.process_withdrawal(tx.amount, tx.user_id).await,
            }
        };

        match tokio::time::timeout(self.bank_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BankError::Timeout),
        }
    }

    /// Ledger mutation first, terminal mark second. A late insufficiency on
    /// the authoritative debit surfaces as `failed`, never an underflow.
    async fn finalize_success(
        &self,
        tx: &Transaction,
        bank_reference: String,
    ) -> Result<(), SettleError> {
        let direction = match tx.kind {
            TxKind::Deposit => Direction::Credit,
            TxKind::Withdrawal => Direction::Debit,
        };

        match self.ledger.adjust(tx.user_id, tx.amount, direction).await {
            Ok(new_balance) => {
                info!(
                    tx_id = %tx.id,
                    kind = %tx.kind,
                    amount = %tx.amount,
                    new_balance = %new_balance,
                    bank_reference = %bank_reference,
                    "Settlement completed"
                );
                self.transition(tx.id, TxStatus::Success, Some(bank_reference), None)
                    .await;
                Ok(())
            }
            Err(e @ LedgerError::InsufficientBalance { .. }) => {
                // Concurrent spends exhausted the balance after the advisory
                // intake check. Expected under the no-reservation design.
                warn!(tx_id = %tx.id, error = %e, "Balance check failed at settlement time");
                self.transition(tx.id, TxStatus::Failed, None, Some(e.to_string()))
                    .await;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_transient(
        &self,
        tx: &Transaction,
        job: Job,
        bank_error: &BankError,
    ) -> Result<(), SettleError> {
        if self.retry.allows_retry(job.attempt) {
            let delay = self.retry.delay_for(job.attempt);
            warn!(
                tx_id = %tx.id,
                attempt = job.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %bank_error,
                "Transient bank error, re-enqueueing"
            );
            // Revert the claim so the retry can claim it again
            self.transition(tx.id, TxStatus::Pending, None, Some(bank_error.to_string()))
                .await;
            self.schedule_retry(job.retry(), delay);
        } else {
            warn!(
                tx_id = %tx.id,
                attempts = job.attempt + 1,
                "Retry ceiling reached, giving up"
            );
            self.transition(
                tx.id,
                TxStatus::Failed,
                None,
                Some(format!(
                    "Retries exhausted after {} attempts; last error: {}",
                    job.attempt + 1,
                    bank_error
                )),
            )
            .await;
        }
        Ok(())
    }

    /// Rescheduled, not blocking-retried in place: the worker moves on to
    /// the next job while the delay elapses.
    fn schedule_retry(&self, job: Job, delay: Duration) {
        let jobs = self.jobs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !jobs.enqueue(job) {
                warn!(tx_id = %job.tx_id, "Queue closed, dropping scheduled retry");
            }
        });
    }

    /// Apply a transition, downgrading terminal-state refusals to a logged
    /// conflict no-op (the other settlement path finished first).
    async fn transition(
        &self,
        tx_id: crate::core_types::TxId,
        status: TxStatus,
        bank_reference: Option<String>,
        error_message: Option<String>,
    ) {
        match self
            .store
            .update_status(tx_id, status, bank_reference, error_message)
            .await
        {
            Ok(_) => {}
            Err(StoreError::TerminalState { current, .. }) => {
                info!(tx_id = %tx_id, current = %current, requested = %status,
                    "Transition conflict: transaction already terminal");
            }
            Err(e) => {
                error!(tx_id = %tx_id, requested = %status, error = %e, "Status update failed");
            }
        }
    }
}
