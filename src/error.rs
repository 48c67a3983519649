//! Gateway-level error taxonomy and the client-facing error body.
//!
//! Every failure a caller can see is a [`GatewayError`], rendered as an
//! [`ErrorResponse`] with a stable code and the correlation id. Upstream
//! payloads, stack traces and credentials never reach the caller.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthError;
use crate::resilience::PolicyError;
use crate::transport::TrustError;
use crate::upstream::errors::{lookup_code, status_message, UpstreamError};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("upstream credentials unavailable: {0}")]
    AuthUnavailable(#[source] AuthError),

    #[error("untrusted peer: {0}")]
    UntrustedPeer(#[source] TrustError),

    #[error("circuit open, retry after {}s", .retry_after.as_secs())]
    CircuitOpen { retry_after: Duration },

    #[error("upstream timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("upstream temporarily unavailable ({message})")]
    TransientUpstreamFailure { status: Option<u16>, message: String },

    #[error("upstream rejected the request with {status}")]
    PermanentUpstreamFailure {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("rate limit exceeded, retry after {}s", .retry_after.as_secs())]
    RateLimitExceeded { retry_after: Duration },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::AuthUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UntrustedPeer(_) => StatusCode::UNAUTHORIZED,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::TransientUpstreamFailure { status, .. } => match status {
                Some(503) | Some(429) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            },
            GatewayError::PermanentUpstreamFailure { status, .. } => match *status {
                // The gateway's own upstream credentials were refused.
                401 | 403 => StatusCode::BAD_GATEWAY,
                s => StatusCode::from_u16(s)
                    .ok()
                    .filter(StatusCode::is_client_error)
                    .unwrap_or(StatusCode::BAD_GATEWAY),
            },
            GatewayError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            GatewayError::AuthUnavailable(_) => "AUTH_UNAVAILABLE",
            GatewayError::UntrustedPeer(_) => "UNTRUSTED_PEER",
            GatewayError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            GatewayError::Timeout(_) => "UPSTREAM_TIMEOUT",
            GatewayError::TransientUpstreamFailure { .. } => "UPSTREAM_UNAVAILABLE",
            GatewayError::PermanentUpstreamFailure { code, .. } => code.as_deref().unwrap_or("UPSTREAM_REJECTED"),
            GatewayError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Caller-safe message.
    pub fn message(&self) -> String {
        match self {
            GatewayError::AuthUnavailable(_) => "Upstream credentials could not be obtained".to_string(),
            GatewayError::UntrustedPeer(e) => format!("Client certificate rejected: {}", e),
            GatewayError::CircuitOpen { .. } => "Upstream service is temporarily unavailable".to_string(),
            GatewayError::Timeout(_) => "Upstream service did not respond in time".to_string(),
            GatewayError::TransientUpstreamFailure { message, .. } => message.clone(),
            GatewayError::PermanentUpstreamFailure { message, .. } => message.clone(),
            GatewayError::RateLimitExceeded { .. } => "Too many requests".to_string(),
            GatewayError::NotFound(what) => format!("{} not found", what),
            GatewayError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::CircuitOpen { retry_after } | GatewayError::RateLimitExceeded { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    /// Render with the request path and correlation id.
    pub fn to_response(&self, path: &str, correlation_id: Option<&str>) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            timestamp: wire_timestamp(),
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.message(),
            path: path.to_string(),
            correlation_id: correlation_id.map(str::to_string),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(retry_after).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.to_response("", None)
    }
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        GatewayError::AuthUnavailable(err)
    }
}

impl From<TrustError> for GatewayError {
    fn from(err: TrustError) -> Self {
        GatewayError::UntrustedPeer(err)
    }
}

impl From<PolicyError<UpstreamError>> for GatewayError {
    fn from(err: PolicyError<UpstreamError>) -> Self {
        match err {
            PolicyError::CircuitOpen { retry_after } => GatewayError::CircuitOpen { retry_after },
            PolicyError::Timeout(budget) => GatewayError::Timeout(budget),
            PolicyError::Call(call) => call.into(),
        }
    }
}

impl From<UpstreamError> for GatewayError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Credential(auth) => GatewayError::AuthUnavailable(auth),
            UpstreamError::Network(reason) => GatewayError::TransientUpstreamFailure {
                status: None,
                message: format!("Upstream service unreachable: {}", reason),
            },
            UpstreamError::InvalidRequest(reason) => GatewayError::Internal(reason),
            UpstreamError::Status { status, payload } => {
                let code = payload.as_ref().and_then(|p| p.code.clone());
                let mapped = code.as_deref().and_then(lookup_code);
                let message = mapped
                    .map(|(message, _)| message.to_string())
                    .unwrap_or_else(|| status_message(status).to_string());
                // A known code carries its own client status.
                let effective = mapped.map(|(_, s)| s.as_u16()).unwrap_or(status);

                if effective >= 500 || effective == 408 || effective == 429 {
                    GatewayError::TransientUpstreamFailure {
                        status: Some(status),
                        message,
                    }
                } else {
                    GatewayError::PermanentUpstreamFailure {
                        status: effective,
                        code,
                        message,
                    }
                }
            }
        }
    }
}

/// JSON error body returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub timestamp: String,
    pub status: u16,
    pub error: String,
    pub code: String,
    pub message: String,
    pub path: String,
    pub correlation_id: Option<String>,
}

/// `yyyy-MM-ddTHH:mm:ss.fffZ` in UTC.
pub fn wire_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Whole seconds, rounded up, at least 1.
pub fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}
