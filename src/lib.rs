//! Paygate - Payment Settlement Service
//!
//! Accepts deposit and withdrawal requests, settles them asynchronously
//! against a simulated bank, and keeps user balances consistent under
//! concurrent load.
//!
//! # Modules
//!
//! - [`core_types`] - Core type definitions (UserId, TxId)
//! - [`money`] - Decimal amount validation and normalization
//! - [`config`] - YAML configuration loading
//! - [`logging`] - tracing subscriber setup
//! - [`transaction`] - Transaction records, state machine, and store
//! - [`ledger`] - User balance ledger
//! - [`idempotency`] - Write-once idempotency response cache
//! - [`bank`] - Simulated external bank API
//! - [`settlement`] - Job queue, retry policy, and worker pool
//! - [`intake`] - Idempotent submission orchestration
//! - [`ratelimit`] - Sliding-window admission control
//! - [`webhook`] - Signed bank callback reconciliation
//! - [`gateway`] - Axum HTTP API
//! - [`pg`] - PostgreSQL backends for the store traits

pub mod core_types;

pub mod config;
pub mod logging;
pub mod money;

pub mod bank;
pub mod gateway;
pub mod idempotency;
pub mod intake;
pub mod ledger;
pub mod pg;
pub mod ratelimit;
pub mod settlement;
pub mod transaction;
pub mod webhook;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use core_types::{TxId, UserId};
pub use intake::IntakeService;
pub use ledger::{BalanceLedger, Direction, InMemoryLedger, LedgerError};
pub use settlement::{Job, JobSender, RetryPolicy, SettlementWorker, job_queue};
pub use transaction::{
    InMemoryTransactionStore, Transaction, TransactionStore, TxKind, TxStatus,
};
