//! HTTP handlers
//!
//! Thin layer over the intake service, the stores, and the webhook
//! reconciler: extract headers, run admission control, delegate, map errors.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::state::AppState;
use super::types::{ApiError, ApiResult};
use crate::core_types::UserId;
use crate::intake::{IntakeResponse, TransactionResponse};
use crate::ratelimit::RateDecision;
use crate::transaction::{Page, TxFilter, TxKind, TxStatus};
use crate::webhook::ReconcileOutcome;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TransactionListData {
    pub transactions: Vec<TransactionResponse>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct BalanceData {
    pub user_id: UserId,
    pub balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub outcome: &'static str,
    pub transaction_status: String,
}

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub status: &'static str,
}

fn user_id(headers: &HeaderMap) -> Result<UserId, ApiError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<UserId>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::missing_header("X-User-Id"))
}

fn idempotency_key(headers: &HeaderMap) -> Result<String, ApiError> {
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::missing_header("X-Idempotency-Key"))?;
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ApiError::bad_request(format!(
            "X-Idempotency-Key exceeds {} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }
    Ok(key.to_string())
}

/// Global quota first, then the per-user per-endpoint one. Returns the
/// per-user decision so its headers can be attached to the response.
async fn admit(
    state: &AppState,
    user_id: UserId,
    endpoint: &str,
    limit: u32,
) -> Result<RateDecision, ApiError> {
    let window = state.rate_limits.window_secs;

    let global = state
        .limiter
        .check("global", state.rate_limits.global_per_window, window)
        .await;
    if !global.allowed {
        warn!(user_id, endpoint, "Global rate limit exceeded");
        return Err(ApiError::rate_limited(global.retry_after));
    }

    let key = format!("user:{}:{}", user_id, endpoint);
    let user = state.limiter.check(&key, limit, window).await;
    if !user.allowed {
        warn!(user_id, endpoint, "User rate limit exceeded");
        return Err(ApiError::rate_limited(user.retry_after));
    }
    Ok(user)
}

fn with_rate_headers(mut response: Response, decision: RateDecision) -> Response {
    let headers = response.headers_mut();
    let entries = [
        ("x-ratelimit-limit", decision.limit.to_string()),
        ("x-ratelimit-remaining", decision.remaining.to_string()),
        ("x-ratelimit-reset", decision.reset_at.to_string()),
    ];
    for (name, value) in entries {
        if let Ok(value) = value.parse() {
            headers.insert(name, value);
        }
    }
    response
}

/// Reconstruct a response from the cached (or fresh) intake bytes, so a
/// replay is byte-identical to the first delivery.
fn intake_response(resp: IntakeResponse) -> Response {
    let status =
        StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json");
    if resp.replayed {
        builder = builder.header("x-idempotent-replay", "true");
    }
    builder
        .body(Body::from(resp.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn submit(
    state: AppState,
    headers: HeaderMap,
    kind: TxKind,
    req: SubmitRequest,
) -> Result<Response, ApiError> {
    let user_id = user_id(&headers)?;
    let key = idempotency_key(&headers)?;
    let decision = admit(
        &state,
        user_id,
        "transactions",
        state.rate_limits.transactions_per_window,
    )
    .await?;

    let resp = state.intake.submit(user_id, kind, req.amount, &key).await?;
    Ok(with_rate_headers(intake_response(resp), decision))
}

/// POST /api/v1/deposits
pub async fn create_deposit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SubmitRequest>,
) -> Result<Response, ApiError> {
    submit(state, headers, TxKind::Deposit, req).await
}

/// POST /api/v1/withdrawals
pub async fn create_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SubmitRequest>,
) -> Result<Response, ApiError> {
    submit(state, headers, TxKind::Withdrawal, req).await
}

/// GET /api/v1/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<TransactionListData> {
    let user_id = user_id(&headers)?;

    let status = match query.status.as_deref() {
        Some(s) => Some(
            s.parse::<TxStatus>()
                .map_err(|_| ApiError::bad_request(format!("Unknown status filter: {}", s)))?,
        ),
        None => None,
    };
    let kind = match query.kind.as_deref() {
        Some(s) => Some(
            s.parse::<TxKind>()
                .map_err(|_| ApiError::bad_request(format!("Unknown type filter: {}", s)))?,
        ),
        None => None,
    };

    let filter = TxFilter {
        user_id: Some(user_id),
        kind,
        status,
    };
    let page = Page::new(query.limit.unwrap_or(20), query.offset.unwrap_or(0));

    let (rows, total) = state.store.list(filter, page).await?;
    Ok(Json(TransactionListData {
        transactions: rows.iter().map(TransactionResponse::from).collect(),
        total,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// GET /api/v1/transactions/{id}
pub async fn get_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<TransactionResponse> {
    let user_id = user_id(&headers)?;
    let tx_id: Uuid = id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid transaction id"))?;

    // A transaction belonging to another user is indistinguishable from a
    // missing one.
    match state.store.get(tx_id).await? {
        Some(tx) if tx.user_id == user_id => Ok(Json(TransactionResponse::from(&tx))),
        _ => Err(ApiError::not_found(format!(
            "Transaction {} not found",
            tx_id
        ))),
    }
}

/// GET /api/v1/balance
pub async fn get_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user_id = user_id(&headers)?;
    let decision = admit(
        &state,
        user_id,
        "balance",
        state.rate_limits.balance_per_window,
    )
    .await?;

    let balance = state.ledger.balance_of(user_id).await?;
    let response = Json(BalanceData { user_id, balance }).into_response();
    Ok(with_rate_headers(response, decision))
}

/// POST /api/v1/webhooks/bank
pub async fn bank_webhook(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<WebhookAck> {
    let outcome = state.reconciler.handle(&payload).await?;
    let ack = match outcome {
        ReconcileOutcome::Applied(status) => WebhookAck {
            outcome: "applied",
            transaction_status: status.to_string(),
        },
        ReconcileOutcome::AlreadyFinal(status) => WebhookAck {
            outcome: "already_final",
            transaction_status: status.to_string(),
        },
    };
    Ok(Json(ack))
}

/// GET /health
pub async fn health_check() -> Json<HealthData> {
    Json(HealthData { status: "ok" })
}
