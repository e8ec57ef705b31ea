use std::sync::Arc;

use crate::config::RateLimitConfig;
use crate::intake::IntakeService;
use crate::ledger::BalanceLedger;
use crate::ratelimit::{RateLimiter, WindowStore};
use crate::transaction::TransactionStore;
use crate::webhook::WebhookReconciler;

/// Shared gateway state.
#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<IntakeService>,
    pub store: Arc<dyn TransactionStore>,
    pub ledger: Arc<dyn BalanceLedger>,
    pub limiter: Arc<RateLimiter<Box<dyn WindowStore>>>,
    pub reconciler: Arc<WebhookReconciler>,
    pub rate_limits: RateLimitConfig,
}

impl AppState {
    pub fn new(
        intake: Arc<IntakeService>,
        store: Arc<dyn TransactionStore>,
        ledger: Arc<dyn BalanceLedger>,
        limiter: Arc<RateLimiter<Box<dyn WindowStore>>>,
        reconciler: Arc<WebhookReconciler>,
        rate_limits: RateLimitConfig,
    ) -> Self {
        Self {
            intake,
            store,
            ledger,
            limiter,
            reconciler,
            rate_limits,
        }
    }
}
