//! Asynchronous settlement pipeline
//!
//! One queued job per accepted transaction; a pool of workers drives each
//! job through the bank simulator to a terminal state, applying the retry
//! policy for transient failures.

mod queue;
mod retry;
mod worker;

pub use queue::{Job, JobSender, SharedJobReceiver, job_queue};
pub use retry::RetryPolicy;
pub use worker::SettlementWorker;
