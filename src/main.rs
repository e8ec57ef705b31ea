//! Paygate service entry point
//!
//! ```text
//! ┌─────────┐   ┌─────────┐   ┌───────────┐   ┌──────────┐
//! │ Gateway │──▶│ Intake  │──▶│ Job queue │──▶│ Workers  │
//! │ (axum)  │   │         │   │ (mpsc)    │   │ (N tasks)│
//! └─────────┘   └─────────┘   └───────────┘   └────┬─────┘
//!      ▲                                           │
//!      │ webhooks                    bank simulator + ledger
//! ```
//!
//! Backends are chosen at startup: PostgreSQL when `postgres_url` is
//! configured, in-memory otherwise.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use paygate::bank::{BankApi, BankSimulator};
use paygate::config::AppConfig;
use paygate::gateway::{self, AppState};
use paygate::idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
use paygate::intake::IntakeService;
use paygate::ledger::{BalanceLedger, InMemoryLedger};
use paygate::logging::init_logging;
use paygate::pg::{Database, PgIdempotencyStore, PgLedger, PgTransactionStore};
use paygate::ratelimit::{FailurePolicy, InMemoryWindowStore, RateLimiter, WindowStore};
use paygate::settlement::{RetryPolicy, SettlementWorker, job_queue};
use paygate::transaction::{InMemoryTransactionStore, TransactionStore};
use paygate::webhook::WebhookReconciler;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    std::env::var("PAYGATE_ENV").unwrap_or_else(|_| "dev".to_string())
}

struct Backends {
    store: Arc<dyn TransactionStore>,
    ledger: Arc<dyn BalanceLedger>,
    idempotency: Arc<dyn IdempotencyStore>,
}

async fn build_backends(config: &AppConfig) -> anyhow::Result<Backends> {
    match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url).await?;
            db.init_schema().await?;
            let pool = db.pool().clone();
            info!("Using PostgreSQL backends");
            let ledger = PgLedger::new(pool.clone());
            for user_id in &config.seed_accounts {
                ledger.open_account(*user_id, rust_decimal::Decimal::ZERO).await?;
            }
            Ok(Backends {
                store: Arc::new(PgTransactionStore::new(pool.clone())),
                ledger: Arc::new(ledger),
                idempotency: Arc::new(PgIdempotencyStore::new(pool)),
            })
        }
        None => {
            info!("No postgres_url configured, using in-memory backends");
            let ledger = InMemoryLedger::new();
            for user_id in &config.seed_accounts {
                ledger.open_account(*user_id, rust_decimal::Decimal::ZERO);
            }
            Ok(Backends {
                store: Arc::new(InMemoryTransactionStore::new()),
                ledger: Arc::new(ledger),
                idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _log_guard = init_logging(&config);
    info!(env = %env, "Starting paygate");

    let backends = build_backends(&config).await?;
    let bank: Arc<dyn BankApi> = Arc::new(BankSimulator::new(&config.bank));

    let (jobs, receiver) = job_queue();
    let intake = Arc::new(IntakeService::new(
        backends.store.clone(),
        backends.ledger.clone(),
        backends.idempotency.clone(),
        jobs.clone(),
    ));

    // Worker pool sharing one receiver
    let worker = Arc::new(SettlementWorker::new(
        backends.store.clone(),
        backends.ledger.clone(),
        bank,
        jobs,
        RetryPolicy::new(&config.settlement),
        Duration::from_millis(config.bank.call_timeout_ms),
    ));
    for worker_id in 0..config.settlement.workers.max(1) {
        let worker = worker.clone();
        let receiver = receiver.clone();
        tokio::spawn(async move {
            worker.run(worker_id, receiver).await;
        });
    }
    info!(workers = config.settlement.workers.max(1), "Settlement workers started");

    // Periodic idempotency sweep
    {
        let idempotency = backends.idempotency.clone();
        let expiry = Duration::from_secs(config.idempotency.expiry_hours * 3_600);
        let interval = Duration::from_secs(config.idempotency.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                match idempotency.purge_older_than(expiry).await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "Expired idempotency records purged"),
                    Err(e) => error!(error = %e, "Idempotency sweep failed"),
                }
            }
        });
    }

    let failure_policy = if config.rate_limit.fail_open {
        FailurePolicy::Open
    } else {
        FailurePolicy::Closed
    };
    let window_store: Box<dyn WindowStore> = Box::new(InMemoryWindowStore::new());
    let limiter = Arc::new(RateLimiter::new(window_store, failure_policy));

    let reconciler = Arc::new(WebhookReconciler::new(
        backends.store.clone(),
        backends.ledger.clone(),
        config.webhook_secret.clone(),
    ));

    let state = AppState::new(
        intake,
        backends.store,
        backends.ledger,
        limiter,
        reconciler,
        config.rate_limit.clone(),
    );

    gateway::run_server(&config.gateway.host, config.gateway.port, state).await
}
