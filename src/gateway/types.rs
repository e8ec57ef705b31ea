//! Gateway error type and response shapes
//!
//! Every error leaves the gateway as `{"error": <code>, "detail": <text>}`,
//! the same shape intake caches for rejected submissions, so replayed and
//! fresh errors are indistinguishable to the client.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::idempotency::IdempotencyError;
use crate::intake::IntakeError;
use crate::ledger::LedgerError;
use crate::transaction::StoreError;
use crate::webhook::WebhookError;

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Stable machine-readable error codes.
pub mod error_codes {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const MISSING_HEADER: &str = "missing_header";
    pub const INSUFFICIENT_BALANCE: &str = "insufficient_balance";
    pub const NOT_FOUND: &str = "not_found";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const INVALID_SIGNATURE: &str = "invalid_signature";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub detail: String,
    /// Set only for 429 responses; emitted as a Retry-After header
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            code,
            detail: detail.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            error_codes::VALIDATION_ERROR,
            detail,
        )
    }

    pub fn missing_header(name: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            error_codes::MISSING_HEADER,
            format!("Missing or invalid {} header", name),
        )
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error_codes::NOT_FOUND, detail)
    }

    pub fn unprocessable(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            error_codes::VALIDATION_ERROR,
            detail,
        )
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            code: error_codes::RATE_LIMITED,
            detail: "Rate limit exceeded".to_string(),
            retry_after: Some(retry_after),
        }
    }

    pub fn invalid_signature() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            error_codes::INVALID_SIGNATURE,
            "Invalid webhook signature",
        )
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::INTERNAL_ERROR,
            detail,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.code,
            detail: self.detail,
        });
        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

// Infrastructure failures surface as opaque 500s; their detail goes to the
// logs, not to the client.
impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        tracing::error!(error = %e, "Transaction store error");
        Self::internal("Transaction store unavailable")
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        tracing::error!(error = %e, "Ledger error");
        Self::internal("Balance ledger unavailable")
    }
}

impl From<IdempotencyError> for ApiError {
    fn from(e: IdempotencyError) -> Self {
        tracing::error!(error = %e, "Idempotency store error");
        Self::internal("Idempotency store unavailable")
    }
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        match e {
            IntakeError::Idempotency(e) => e.into(),
            IntakeError::Store(e) => e.into(),
            IntakeError::Ledger(e) => e.into(),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::InvalidSignature => Self::invalid_signature(),
            WebhookError::MalformedPayload(detail) => Self::bad_request(detail),
            WebhookError::UnknownTransaction(id) => {
                Self::not_found(format!("Transaction {} not found", id))
            }
            WebhookError::UnsupportedStatus(s) => {
                Self::bad_request(format!("Unsupported webhook status: {}", s))
            }
            WebhookError::Store(e) => e.into(),
            WebhookError::Ledger(e) => e.into(),
        }
    }
}
