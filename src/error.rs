//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::{DomainError, FieldViolation};
use crate::event_store::EventStoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// Optimistic-concurrency signal from the store
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::EventStore(e) if e.is_concurrency_conflict())
    }

    /// The domain error, if this is one
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            AppError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

impl From<crate::domain::MoneyError> for AppError {
    fn from(err: crate::domain::MoneyError) -> Self {
        AppError::Domain(err.into())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<FieldViolation>>,
}

fn domain_status(err: &DomainError) -> (StatusCode, &'static str, Option<String>) {
    match err {
        DomainError::ValidationFailed(_) => (StatusCode::BAD_REQUEST, "validation_failed", None),
        DomainError::InvalidAmount(msg) => {
            (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
        }
        DomainError::InvalidTerms(msg) => {
            (StatusCode::BAD_REQUEST, "invalid_terms", Some(msg.clone()))
        }
        DomainError::IllegalLoanState { status, .. } => (
            StatusCode::CONFLICT,
            "illegal_loan_state",
            Some(status.to_string()),
        ),
        DomainError::IllegalTransition { from, to } => (
            StatusCode::CONFLICT,
            "illegal_transition",
            Some(format!("{} -> {}", from, to)),
        ),
        DomainError::OverfundingRejected { remaining, .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "overfunding_rejected",
            Some(format!("remaining {}", remaining)),
        ),
        DomainError::DuplicateLender { .. } => (StatusCode::CONFLICT, "duplicate_lender", None),
        DomainError::NotFundable { status } => (
            StatusCode::CONFLICT,
            "not_fundable",
            Some(status.to_string()),
        ),
        DomainError::LoanNotActive { status } => (
            StatusCode::CONFLICT,
            "loan_not_active",
            Some(status.to_string()),
        ),
        DomainError::NotBorrower => (StatusCode::FORBIDDEN, "not_borrower", None),
        DomainError::Unauthorized(msg) => {
            (StatusCode::FORBIDDEN, "unauthorized", Some(msg.clone()))
        }
        DomainError::LoanNotFound(id) => {
            (StatusCode::NOT_FOUND, "loan_not_found", Some(id.to_string()))
        }
        DomainError::TransactionNotFound(id) => (
            StatusCode::NOT_FOUND,
            "transaction_not_found",
            Some(id.to_string()),
        ),
        DomainError::GatewayTimeout { transaction_id } => (
            StatusCode::GATEWAY_TIMEOUT,
            "gateway_timeout",
            Some(transaction_id.to_string()),
        ),
        DomainError::PersistenceConflict { aggregate_id } => (
            StatusCode::CONFLICT,
            "persistence_conflict",
            Some(aggregate_id.to_string()),
        ),
        DomainError::IdempotencyConflict { key } => (
            StatusCode::CONFLICT,
            "idempotency_conflict",
            Some(key.clone()),
        ),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::InvalidHeader(header) => {
                (StatusCode::BAD_REQUEST, "invalid_header", Some(header.clone()))
            }

            // 401 Unauthorized
            AppError::MissingHeader(header) => {
                (StatusCode::UNAUTHORIZED, "missing_header", Some(header.clone()))
            }

            // 403 Forbidden
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone())),

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => domain_status(domain_err),

            AppError::EventStore(e) => match e {
                EventStoreError::ConcurrencyConflict { aggregate_id, .. } => (
                    StatusCode::CONFLICT,
                    "version_conflict",
                    Some(aggregate_id.to_string()),
                ),
                EventStoreError::IdempotencyKeyClaimed { key, .. } => {
                    (StatusCode::CONFLICT, "idempotency_conflict", Some(key.clone()))
                }
                _ => {
                    tracing::error!("Event store error: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
                }
            },

            // 500 Internal Server Error
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let violations = match &self {
            AppError::Domain(DomainError::ValidationFailed(v)) => Some(v.clone()),
            _ => None,
        };

        // Internal details are not leaked to clients
        let error = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
            violations,
        };

        (status, Json(body)).into_response()
    }
}
