//! Settlement job queue
//!
//! One job per intake. Multiple workers drain a single shared receiver;
//! the async mutex around it hands each job to exactly one worker. Sole
//! ownership of the transaction itself is still enforced by the store's
//! CAS claim, so a duplicated delivery is harmless.

use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use crate::core_types::TxId;

/// A unit of settlement work. `attempt` is 0 on first delivery and counts
/// transient-error redeliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub tx_id: TxId,
    pub attempt: u32,
}

impl Job {
    pub fn new(tx_id: TxId) -> Self {
        Self { tx_id, attempt: 0 }
    }

    pub fn retry(self) -> Self {
        Self {
            tx_id: self.tx_id,
            attempt: self.attempt + 1,
        }
    }
}

#[derive(Clone)]
pub struct JobSender(mpsc::UnboundedSender<Job>);

impl JobSender {
    /// Enqueue a job. Failure means the workers are gone, which only
    /// happens at shutdown; callers log and move on.
    pub fn enqueue(&self, job: Job) -> bool {
        self.0.send(job).is_ok()
    }
}

pub type SharedJobReceiver = Arc<Mutex<mpsc::UnboundedReceiver<Job>>>;

/// Build the queue endpoints: a cloneable sender for intake/retry and a
/// shared receiver for the worker pool.
pub fn job_queue() -> (JobSender, SharedJobReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (JobSender(tx), Arc::new(Mutex::new(rx)))
}
