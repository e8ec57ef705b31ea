//! HTTP gateway
//!
//! Axum router over the intake service, stores, and webhook reconciler.
//! Callers identify themselves with the `X-User-Id` header; submissions
//! additionally carry `X-Idempotency-Key`.

pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;

pub use state::AppState;
pub use types::{ApiError, ApiResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/deposits", post(handlers::create_deposit))
        .route("/api/v1/withdrawals", post(handlers::create_withdrawal))
        .route("/api/v1/transactions", get(handlers::list_transactions))
        .route("/api/v1/transactions/{id}", get(handlers::get_transaction))
        .route("/api/v1/balance", get(handlers::get_balance))
        .route("/api/v1/webhooks/bank", post(handlers::bank_webhook))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn run_server(host: &str, port: u16, state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Gateway listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
