//! Upstream failure model and error-code table.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthError;
use crate::resilience::Outcome;

/// Structured error body returned by the upstream API.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UpstreamErrorPayload {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// Failure of a single upstream attempt.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("credential unavailable: {0}")]
    Credential(#[source] AuthError),

    #[error("upstream responded {status}")]
    Status {
        status: u16,
        payload: Option<UpstreamErrorPayload>,
    },

    #[error("upstream unreachable: {0}")]
    Network(String),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    /// Transient: 5xx, 408, 429 and network failures. Everything else is
    /// permanent, including a missing credential.
    pub fn outcome(&self) -> Outcome {
        match self {
            UpstreamError::Status { status, .. } => classify_status(*status),
            UpstreamError::Network(_) => Outcome::TransientFailure,
            UpstreamError::Credential(_) | UpstreamError::InvalidRequest(_) => Outcome::PermanentFailure,
        }
    }
}

pub fn classify_status(status: u16) -> Outcome {
    match status {
        200..=399 => Outcome::Success,
        408 | 429 | 500..=599 => Outcome::TransientFailure,
        _ => Outcome::PermanentFailure,
    }
}

/// Client-facing message and status for a known upstream error code.
pub fn lookup_code(code: &str) -> Option<(&'static str, StatusCode)> {
    let mapped = match code {
        "AUTH001" => ("Invalid client credentials", StatusCode::UNAUTHORIZED),
        "AUTH002" => ("Token expired", StatusCode::UNAUTHORIZED),
        "AUTH003" => ("Invalid token", StatusCode::UNAUTHORIZED),
        "AUTH004" => ("Certificate validation failed", StatusCode::FORBIDDEN),
        "AUTH005" => ("Insufficient permissions", StatusCode::FORBIDDEN),

        "VAL001" => ("Invalid organization number", StatusCode::BAD_REQUEST),
        "VAL002" => ("Invalid reporting period", StatusCode::BAD_REQUEST),
        "VAL003" => ("Missing required field", StatusCode::BAD_REQUEST),
        "VAL004" => ("Invalid field value", StatusCode::BAD_REQUEST),
        "VAL005" => ("Data validation failed", StatusCode::UNPROCESSABLE_ENTITY),
        "VAL006" => ("Business rule validation failed", StatusCode::UNPROCESSABLE_ENTITY),

        "RES001" => ("Draft not found", StatusCode::NOT_FOUND),
        "RES002" => ("Submitted declaration not found", StatusCode::NOT_FOUND),
        "RES003" => ("Decided declaration not found", StatusCode::NOT_FOUND),
        "RES004" => ("Reporting period not available", StatusCode::NOT_FOUND),
        "RES005" => ("Organization not found", StatusCode::NOT_FOUND),

        "STATE001" => ("Draft already exists", StatusCode::CONFLICT),
        "STATE002" => ("Draft is locked", StatusCode::CONFLICT),
        "STATE003" => ("Draft cannot be modified", StatusCode::CONFLICT),
        "STATE004" => ("Invalid state transition", StatusCode::CONFLICT),
        "STATE005" => ("Declaration already submitted", StatusCode::CONFLICT),

        "RATE001" => ("Rate limit exceeded", StatusCode::TOO_MANY_REQUESTS),
        "RATE002" => ("Quota exceeded", StatusCode::TOO_MANY_REQUESTS),

        "SYS001" => ("Service temporarily unavailable", StatusCode::SERVICE_UNAVAILABLE),
        "SYS002" => ("Internal processing error", StatusCode::INTERNAL_SERVER_ERROR),
        "SYS003" => ("Database connection error", StatusCode::SERVICE_UNAVAILABLE),
        "SYS004" => ("External service error", StatusCode::BAD_GATEWAY),
        "SYS005" => ("Timeout error", StatusCode::REQUEST_TIMEOUT),
        _ => return None,
    };
    Some(mapped)
}

/// Generic message for an upstream status without a known code.
pub fn status_message(status: u16) -> &'static str {
    match status {
        400 => "Bad request",
        401 => "Authentication failed",
        403 => "Access denied",
        404 => "Resource not found",
        405 => "Method not allowed",
        406 => "Not acceptable",
        409 => "Conflict",
        410 => "Resource no longer available",
        415 => "Unsupported media type",
        422 => "Unprocessable entity",
        429 => "Rate limit exceeded",
        500 => "Internal server error",
        501 => "Not implemented",
        502 => "Bad gateway",
        503 => "Service unavailable",
        504 => "Gateway timeout",
        _ => "Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(200), Outcome::Success);
        assert_eq!(classify_status(503), Outcome::TransientFailure);
        assert_eq!(classify_status(429), Outcome::TransientFailure);
        assert_eq!(classify_status(408), Outcome::TransientFailure);
        assert_eq!(classify_status(404), Outcome::PermanentFailure);
        assert_eq!(classify_status(401), Outcome::PermanentFailure);
    }

    #[test]
    fn test_credential_failure_is_permanent() {
        let err = UpstreamError::Credential(AuthError::Transport("refused".into()));
        assert_eq!(err.outcome(), Outcome::PermanentFailure);
        assert_eq!(UpstreamError::Network("reset".into()).outcome(), Outcome::TransientFailure);
    }

    #[test]
    fn test_error_code_table() {
        assert_eq!(lookup_code("STATE002"), Some(("Draft is locked", StatusCode::CONFLICT)));
        assert_eq!(lookup_code("SYS005").map(|(_, s)| s), Some(StatusCode::REQUEST_TIMEOUT));
        assert_eq!(lookup_code("NOPE"), None);
    }

    #[test]
    fn test_payload_tolerates_missing_fields() {
        let payload: UpstreamErrorPayload = serde_json::from_str(r#"{"code":"VAL001"}"#).unwrap();
        assert_eq!(payload.code.as_deref(), Some("VAL001"));
        assert!(payload.message.is_none());
    }
}
