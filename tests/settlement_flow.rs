//! End-to-end settlement flows through the library API: intake, the job
//! queue, settlement workers, the ledger, and webhook reconciliation
//! working together.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use serde_json::json;

use paygate::bank::BankSimulator;
use paygate::config::SettlementConfig;
use paygate::idempotency::InMemoryIdempotencyStore;
use paygate::intake::IntakeService;
use paygate::ledger::{BalanceLedger, InMemoryLedger};
use paygate::settlement::{RetryPolicy, SettlementWorker, SharedJobReceiver, job_queue};
use paygate::transaction::{
    InMemoryTransactionStore, Page, TransactionStore, TxFilter, TxKind, TxStatus,
};
use paygate::webhook::{WebhookReconciler, signature};

const WEBHOOK_SECRET: &str = "flow-test-secret";

struct Stack {
    intake: IntakeService,
    store: Arc<InMemoryTransactionStore>,
    ledger: Arc<InMemoryLedger>,
    worker: Arc<SettlementWorker>,
    receiver: SharedJobReceiver,
    reconciler: WebhookReconciler,
}

fn stack() -> Stack {
    let store = Arc::new(InMemoryTransactionStore::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let idempotency = Arc::new(InMemoryIdempotencyStore::new());
    let (jobs, receiver) = job_queue();

    let intake = IntakeService::new(store.clone(), ledger.clone(), idempotency, jobs.clone());

    let retry = RetryPolicy::new(&SettlementConfig {
        workers: 1,
        max_retries: 3,
        retry_base_delay_ms: 0,
        retry_max_delay_ms: 0,
    });
    let worker = Arc::new(SettlementWorker::new(
        store.clone(),
        ledger.clone(),
        Arc::new(BankSimulator::instant()),
        jobs,
        retry,
        Duration::from_secs(5),
    ));
    let reconciler =
        WebhookReconciler::new(store.clone(), ledger.clone(), WEBHOOK_SECRET.to_string());

    Stack {
        intake,
        store,
        ledger,
        worker,
        receiver,
        reconciler,
    }
}

/// Pull the next job off the shared queue and settle it inline.
async fn drain_one(s: &Stack) {
    let job = s
        .receiver
        .lock()
        .await
        .try_recv()
        .expect("expected a queued job");
    s.worker.process_job(job).await;
}

#[tokio::test]
async fn test_deposit_settles_and_credits_balance() {
    let s = stack();
    s.ledger.open_account(1, dec!(0.00));

    let resp = s
        .intake
        .submit(1, TxKind::Deposit, dec!(100.50), "dep-1")
        .await
        .unwrap();
    assert_eq!(resp.status, 201);

    let body: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
    assert_eq!(body["status"], "pending");

    drain_one(&s).await;

    let tx_id = body["id"].as_str().unwrap().parse().unwrap();
    let settled = s.store.get(tx_id).await.unwrap().unwrap();
    assert_eq!(settled.status, TxStatus::Success);
    assert!(settled.bank_reference.as_deref().unwrap().starts_with("DEP-"));
    assert_eq!(s.ledger.balance_of(1).await.unwrap(), dec!(100.50));
}

#[tokio::test]
async fn test_withdrawal_settles_and_debits_balance() {
    let s = stack();
    s.ledger.open_account(1, dec!(200.00));

    let resp = s
        .intake
        .submit(1, TxKind::Withdrawal, dec!(75.25), "wth-1")
        .await
        .unwrap();
    assert_eq!(resp.status, 201);

    drain_one(&s).await;

    let body: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
    let tx_id = body["id"].as_str().unwrap().parse().unwrap();
    let settled = s.store.get(tx_id).await.unwrap().unwrap();
    assert_eq!(settled.status, TxStatus::Success);
    assert!(settled.bank_reference.as_deref().unwrap().starts_with("WTH-"));
    assert_eq!(s.ledger.balance_of(1).await.unwrap(), dec!(124.75));
}

/// Five 30.00 withdrawals race over a 100.00 balance: the advisory check
/// admits all of them, the ledger's exclusive debit lets exactly three
/// through, and the balance never goes negative.
#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_withdrawals_never_overdraw() {
    let s = stack();
    s.ledger.open_account(1, dec!(100.00));

    for i in 0..5 {
        let resp = s
            .intake
            .submit(1, TxKind::Withdrawal, dec!(30.00), &format!("race-{}", i))
            .await
            .unwrap();
        assert_eq!(resp.status, 201);
    }

    // Two workers settling in parallel off the shared receiver
    let mut handles = Vec::new();
    for _ in 0..2 {
        let worker = s.worker.clone();
        let receiver = s.receiver.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let next = { receiver.lock().await.try_recv() };
                let Ok(job) = next else { break };
                worker.process_job(job).await;
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let (rows, total) = s
        .store
        .list(TxFilter::default(), Page::new(10, 0))
        .await
        .unwrap();
    assert_eq!(total, 5);

    let successes = rows
        .iter()
        .filter(|t| t.status == TxStatus::Success)
        .count();
    let failures: Vec<_> = rows
        .iter()
        .filter(|t| t.status == TxStatus::Failed)
        .collect();

    assert_eq!(successes, 3);
    assert_eq!(failures.len(), 2);
    for failed in failures {
        assert!(
            failed
                .error_message
                .as_deref()
                .unwrap()
                .contains("Insufficient balance")
        );
    }
    assert_eq!(s.ledger.balance_of(1).await.unwrap(), dec!(10.00));
}

#[tokio::test]
async fn test_webhook_finalizes_before_worker_runs() {
    let s = stack();
    s.ledger.open_account(1, dec!(0.00));

    let resp = s
        .intake
        .submit(1, TxKind::Deposit, dec!(60.00), "hook-first")
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
    let tx_id: paygate::TxId = body["id"].as_str().unwrap().parse().unwrap();

    // Bank callback lands before any worker picks up the job
    let mut payload = json!({
        "transaction_id": tx_id.to_string(),
        "bank_reference": "DEP-EARLYHOOK",
        "status": "success",
    });
    signature::attach_signature(WEBHOOK_SECRET, &mut payload);
    s.reconciler.handle(&payload).await.unwrap();
    assert_eq!(s.ledger.balance_of(1).await.unwrap(), dec!(60.00));

    // The queued job is now a no-op: no double credit, reference unchanged
    drain_one(&s).await;

    let settled = s.store.get(tx_id).await.unwrap().unwrap();
    assert_eq!(settled.status, TxStatus::Success);
    assert_eq!(settled.bank_reference.as_deref(), Some("DEP-EARLYHOOK"));
    assert_eq!(s.ledger.balance_of(1).await.unwrap(), dec!(60.00));
}

/// A replay after settlement returns the bytes cached at intake time: the
/// pending snapshot, not the settled row.
#[tokio::test]
async fn test_replay_returns_intake_snapshot_after_settlement() {
    let s = stack();
    s.ledger.open_account(1, dec!(0.00));

    let first = s
        .intake
        .submit(1, TxKind::Deposit, dec!(10.00), "snap-1")
        .await
        .unwrap();
    drain_one(&s).await;

    let replay = s
        .intake
        .submit(1, TxKind::Deposit, dec!(10.00), "snap-1")
        .await
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.body, first.body);

    let body: serde_json::Value = serde_json::from_str(&replay.body).unwrap();
    assert_eq!(body["status"], "pending");

    // And no second transaction was created
    let (_, total) = s
        .store
        .list(TxFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
}
