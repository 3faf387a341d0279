//! API Middleware
//!
//! Principal extraction and request logging middleware.

use std::net::IpAddr;
use std::str::FromStr;

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::domain::{OperationContext, Principal, Role};
use crate::error::AppError;
use crate::idempotency::IdempotencyKey;

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const USER_ROLE_HEADER: &str = "X-User-Role";
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-Id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AppError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim()))
            .map_err(|_| AppError::InvalidHeader(name.to_string())),
    }
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    header_str(headers, name)?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::MissingHeader(name.to_string()))
}

/// Principal as forwarded by the authentication layer in front of this service
pub fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, AppError> {
    let user_id = Uuid::parse_str(required_header(headers, USER_ID_HEADER)?)
        .map_err(|_| AppError::InvalidHeader(USER_ID_HEADER.to_string()))?;
    let role = Role::from_str(required_header(headers, USER_ROLE_HEADER)?)
        .map_err(|_| AppError::InvalidHeader(USER_ROLE_HEADER.to_string()))?;
    Ok(Principal::new(user_id, role))
}

/// Optional `Idempotency-Key` header
pub fn idempotency_key(headers: &HeaderMap) -> Result<Option<IdempotencyKey>, AppError> {
    match header_str(headers, IDEMPOTENCY_KEY_HEADER)? {
        None => Ok(None),
        Some(raw) => Ok(Some(IdempotencyKey::parse(raw)?)),
    }
}

fn correlation_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
}

fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
}

// =========================================================================
// Principal Middleware
// =========================================================================

/// Build the request's `OperationContext` from the identity headers
pub async fn principal_middleware(
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let headers = request.headers();
    let principal = principal_from_headers(headers)?;

    let mut context = OperationContext::new()
        .with_principal(principal)
        .with_correlation_id(correlation_id(headers).unwrap_or_else(Uuid::new_v4));
    if let Some(ip) = client_ip(headers) {
        context = context.with_client_ip(ip);
    }

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

// =========================================================================
// Request Logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "x-api-key"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());
    let correlation_id = correlation_id(request.headers());

    let start = std::time::Instant::now();
    tracing::info!(
        method = %method,
        uri = %uri,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    let duration_ms = start.elapsed().as_millis() as u64;
    if status.is_server_error() {
        tracing::error!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms,
            correlation_id = ?correlation_id,
            "Request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms,
            correlation_id = ?correlation_id,
            "Request completed"
        );
    }

    response
}
