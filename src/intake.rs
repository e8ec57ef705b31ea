//! Transaction intake
//!
//! Orchestrates idempotent submission: idempotency lookup, validation, the
//! advisory withdrawal balance check, transaction creation, response
//! caching, and settlement enqueue. Every response that leaves this module
//! (including 4xx rejections) is cached under the idempotency key so a
//! replay returns the exact same bytes without re-executing any of it.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::core_types::UserId;
use crate::idempotency::{CachedResponse, IdempotencyError, IdempotencyStore};
use crate::ledger::{BalanceLedger, LedgerError};
use crate::money;
use crate::settlement::{Job, JobSender};
use crate::transaction::{StoreError, Transaction, TransactionStore, TxKind};
use rust_decimal::Decimal;

/// API view of a transaction; the serialized form is what intake caches
/// and what the gateway returns.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: String,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: TxKind,
    pub status: String,
    pub amount: Decimal,
    pub bank_reference: Option<String>,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.to_string(),
            user_id: tx.user_id,
            kind: tx.kind,
            status: tx.status.to_string(),
            amount: tx.amount,
            bank_reference: tx.bank_reference.clone(),
            error_message: tx.error_message.clone(),
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    detail: String,
}

/// What the gateway hands back to the caller: a status code and the exact
/// body bytes, whether produced now or replayed from the cache.
#[derive(Debug, Clone)]
pub struct IntakeResponse {
    pub status: u16,
    pub body: String,
    pub replayed: bool,
}

/// Infrastructure-level intake failures. Business rejections (insufficient
/// balance, bad amount) are [`IntakeResponse`]s, not errors.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct IntakeService {
    store: Arc<dyn TransactionStore>,
    ledger: Arc<dyn BalanceLedger>,
    idempotency: Arc<dyn IdempotencyStore>,
    jobs: JobSender,
}

impl IntakeService {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        ledger: Arc<dyn BalanceLedger>,
        idempotency: Arc<dyn IdempotencyStore>,
        jobs: JobSender,
    ) -> Self {
        Self {
            store,
            ledger,
            idempotency,
            jobs,
        }
    }

    /// Submit a deposit or withdrawal under an idempotency key.
    pub async fn submit(
        &self,
        user_id: UserId,
        kind: TxKind,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<IntakeResponse, IntakeError> {
        // Advisory check: the authoritative one is the conflict at save time
        if let Some(cached) = self.idempotency.lookup(user_id, idempotency_key).await? {
            info!(user_id, key = idempotency_key, "Replaying cached response");
            return Ok(replay(cached));
        }

        if !money::is_valid_amount(amount) {
            let body = error_body("validation_error", "Amount must be a positive value");
            return self
                .cache_and_respond(user_id, idempotency_key, 422, body)
                .await;
        }
        let amount = money::normalize(amount);

        // Advisory balance check for withdrawals: rejects obviously doomed
        // requests before a transaction row exists, reserves nothing.
        if kind == TxKind::Withdrawal {
            let available = self.ledger.balance_of(user_id).await?;
            if available < amount {
                let body = error_body(
                    "insufficient_balance",
                    format!(
                        "Insufficient balance. Available: {}, Required: {}",
                        available, amount
                    ),
                );
                return self
                    .cache_and_respond(user_id, idempotency_key, 400, body)
                    .await;
            }
        }

        let tx = self
            .store
            .insert(Transaction::new(
                user_id,
                kind,
                amount,
                Some(idempotency_key.to_string()),
            ))
            .await?;

        let body = serde_json::to_string(&TransactionResponse::from(&tx))
            .unwrap_or_else(|_| "{}".to_string());

        match self
            .idempotency
            .save(
                user_id,
                idempotency_key,
                CachedResponse {
                    status: 201,
                    body: body.clone(),
                },
            )
            .await
        {
            Ok(()) => {}
            Err(IdempotencyError::DuplicateKey) => {
                // Lost the race against an identical concurrent request.
                // Drop our never-enqueued transaction and replay the winner.
                self.store.remove(tx.id).await?;
                info!(user_id, key = idempotency_key, "Duplicate submission race, replaying winner");
                return match self.idempotency.lookup(user_id, idempotency_key).await? {
                    Some(cached) => Ok(replay(cached)),
                    None => Err(IdempotencyError::Storage(
                        "cached response vanished after duplicate-key conflict".to_string(),
                    )
                    .into()),
                };
            }
            Err(e) => {
                self.store.remove(tx.id).await?;
                return Err(e.into());
            }
        }

        if !self.jobs.enqueue(Job::new(tx.id)) {
            warn!(tx_id = %tx.id, "Job queue closed, transaction left pending");
        } else {
            info!(tx_id = %tx.id, user_id, kind = %kind, amount = %amount, "Transaction accepted");
        }

        Ok(IntakeResponse {
            status: 201,
            body,
            replayed: false,
        })
    }

    /// Cache a rejection under the key so the replay repeats it verbatim;
    /// a concurrent duplicate that cached first wins.
    async fn cache_and_respond(
        &self,
        user_id: UserId,
        key: &str,
        status: u16,
        body: String,
    ) -> Result<IntakeResponse, IntakeError> {
        match self
            .idempotency
            .save(
                user_id,
                key,
                CachedResponse {
                    status,
                    body: body.clone(),
                },
            )
            .await
        {
            Ok(()) => Ok(IntakeResponse {
                status,
                body,
                replayed: false,
            }),
            Err(IdempotencyError::DuplicateKey) => {
                match self.idempotency.lookup(user_id, key).await? {
                    Some(cached) => Ok(replay(cached)),
                    None => Ok(IntakeResponse {
                        status,
                        body,
                        replayed: false,
                    }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn replay(cached: CachedResponse) -> IntakeResponse {
    IntakeResponse {
        status: cached.status,
        body: cached.body,
        replayed: true,
    }
}

fn error_body(error: &str, detail: impl Into<String>) -> String {
    serde_json::to_string(&ErrorBody {
        error,
        detail: detail.into(),
    })
    .unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::InMemoryIdempotencyStore;
    use crate::ledger::InMemoryLedger;
    use crate::settlement::{SharedJobReceiver, job_queue};
    use crate::transaction::{InMemoryTransactionStore, Page, TxFilter};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Harness {
        intake: IntakeService,
        store: Arc<InMemoryTransactionStore>,
        ledger: Arc<InMemoryLedger>,
        receiver: SharedJobReceiver,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryTransactionStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());
        let (jobs, receiver) = job_queue();
        let intake = IntakeService::new(store.clone(), ledger.clone(), idempotency, jobs);
        Harness {
            intake,
            store,
            ledger,
            receiver,
        }
    }

    #[tokio::test]
    async fn test_fresh_deposit_accepted_pending() {
        let h = harness();
        h.ledger.open_account(1, dec!(0.00));

        let resp = h
            .intake
            .submit(1, TxKind::Deposit, dec!(100.50), "key-1")
            .await
            .unwrap();

        assert_eq!(resp.status, 201);
        assert!(!resp.replayed);

        let parsed: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
        assert_eq!(parsed["status"], "pending");
        assert_eq!(parsed["type"], "deposit");
        assert_eq!(parsed["amount"], "100.50");

        // Exactly one job enqueued for the new transaction
        let job = h.receiver.lock().await.try_recv().unwrap();
        assert_eq!(job.tx_id.to_string(), parsed["id"].as_str().unwrap());
    }

    #[tokio::test]
    async fn test_replay_returns_identical_bytes_no_second_tx() {
        let h = harness();
        h.ledger.open_account(1, dec!(0.00));

        let first = h
            .intake
            .submit(1, TxKind::Deposit, dec!(50.00), "key-1")
            .await
            .unwrap();
        // Different body on the replay must not matter
        let second = h
            .intake
            .submit(1, TxKind::Deposit, dec!(999.99), "key-1")
            .await
            .unwrap();

        assert!(second.replayed);
        assert_eq!(second.status, first.status);
        assert_eq!(second.body, first.body);

        let (_, total) = h
            .store
            .list(TxFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_invalid_amount_rejected_and_cached() {
        let h = harness();

        let resp = h
            .intake
            .submit(1, TxKind::Deposit, dec!(-5.00), "key-bad")
            .await
            .unwrap();
        assert_eq!(resp.status, 422);

        let replayed = h
            .intake
            .submit(1, TxKind::Deposit, dec!(-5.00), "key-bad")
            .await
            .unwrap();
        assert!(replayed.replayed);
        assert_eq!(replayed.body, resp.body);

        let (_, total) = h
            .store
            .list(TxFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_insufficient_withdrawal_rejected_before_any_row() {
        let h = harness();
        h.ledger.open_account(1, dec!(10.00));

        let resp = h
            .intake
            .submit(1, TxKind::Withdrawal, dec!(100.00), "key-w")
            .await
            .unwrap();
        assert_eq!(resp.status, 400);
        assert!(resp.body.contains("insufficient_balance"));

        let (_, total) = h
            .store
            .list(TxFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(total, 0);
        assert!(h.receiver.lock().await.try_recv().is_err());

        // Replay repeats the 400 verbatim
        let replayed = h
            .intake
            .submit(1, TxKind::Withdrawal, dec!(100.00), "key-w")
            .await
            .unwrap();
        assert!(replayed.replayed);
        assert_eq!(replayed.status, 400);
        assert_eq!(replayed.body, resp.body);
    }

    #[tokio::test]
    async fn test_withdrawal_within_balance_accepted() {
        let h = harness();
        h.ledger.open_account(1, dec!(100.00));

        let resp = h
            .intake
            .submit(1, TxKind::Withdrawal, dec!(40.00), "key-w")
            .await
            .unwrap();
        assert_eq!(resp.status, 201);

        // Advisory only: nothing reserved
        assert_eq!(h.ledger.balance_of(1).await.unwrap(), dec!(100.00));
    }

    /// Idempotency store whose first lookup misses, simulating the loser
    /// of two identical concurrent submissions: by the time the loser
    /// saves, the winner's record is already in place.
    struct RacyIdempotencyStore {
        inner: InMemoryIdempotencyStore,
        first_lookup_pending: AtomicBool,
    }

    #[async_trait::async_trait]
    impl IdempotencyStore for RacyIdempotencyStore {
        async fn lookup(
            &self,
            user_id: i64,
            key: &str,
        ) -> Result<Option<CachedResponse>, IdempotencyError> {
            if self.first_lookup_pending.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.lookup(user_id, key).await
        }

        async fn save(
            &self,
            user_id: i64,
            key: &str,
            response: CachedResponse,
        ) -> Result<(), IdempotencyError> {
            self.inner.save(user_id, key, response).await
        }

        async fn purge_older_than(
            &self,
            age: std::time::Duration,
        ) -> Result<u64, IdempotencyError> {
            self.inner.purge_older_than(age).await
        }
    }

    #[tokio::test]
    async fn test_duplicate_save_race_resolves_to_winner() {
        let store = Arc::new(InMemoryTransactionStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.open_account(1, dec!(0.00));

        let racy = RacyIdempotencyStore {
            inner: InMemoryIdempotencyStore::new(),
            first_lookup_pending: AtomicBool::new(true),
        };
        // The winner's response is already stored
        racy.inner
            .save(
                1,
                "key-race",
                CachedResponse {
                    status: 201,
                    body: r#"{"id":"winner"}"#.to_string(),
                },
            )
            .await
            .unwrap();

        let (jobs, receiver) = job_queue();
        let intake = IntakeService::new(store.clone(), ledger, Arc::new(racy), jobs);

        let resp = intake
            .submit(1, TxKind::Deposit, dec!(10.00), "key-race")
            .await
            .unwrap();

        // The loser replays the winner's bytes and leaves no orphan behind
        assert!(resp.replayed);
        assert_eq!(resp.body, r#"{"id":"winner"}"#);

        let (_, total) = store
            .list(TxFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(total, 0);
        assert!(receiver.lock().await.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_keys_scoped_per_user() {
        let h = harness();
        h.ledger.open_account(1, dec!(0.00));
        h.ledger.open_account(2, dec!(0.00));

        let a = h
            .intake
            .submit(1, TxKind::Deposit, dec!(10.00), "shared-key")
            .await
            .unwrap();
        let b = h
            .intake
            .submit(2, TxKind::Deposit, dec!(20.00), "shared-key")
            .await
            .unwrap();

        assert!(!a.replayed);
        assert!(!b.replayed);
        assert_ne!(a.body, b.body);
    }
}
