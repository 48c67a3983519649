//! Correlation id assignment.
//!
//! # Responsibilities
//! - Reuse a well-formed inbound correlation header, otherwise mint a UUID v4
//! - Attach the id to the request and to a `tracing` span around the request
//! - Echo the id on the response
//!
//! # Design Decisions
//! - Arbitrary client input is never echoed: over-long or non-printable
//!   values are replaced with a fresh id
//! - Assignment cannot fail

use std::fmt;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

pub const X_CORRELATION_ID: &str = "x-correlation-id";
pub const SKV_CORRELATION_ID: &str = "skv_correlation_id";

const MAX_LEN: usize = 128;

/// Identifier carried through one request's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuse `inbound` when acceptable, otherwise generate.
    pub fn begin(inbound: Option<&str>) -> Self {
        inbound
            .map(str::trim)
            .filter(|v| is_acceptable(v))
            .map(|v| Self(v.to_string()))
            .unwrap_or_else(Self::new)
    }

    /// Pick the first recognized header, in priority order.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let inbound = [X_CORRELATION_ID, SKV_CORRELATION_ID]
            .iter()
            .filter_map(|name| headers.get(*name))
            .filter_map(|value| value.to_str().ok())
            .find(|value| !value.trim().is_empty());
        Self::begin(inbound)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_acceptable(value: &str) -> bool {
    !value.is_empty() && value.len() <= MAX_LEN && value.bytes().all(|b| b.is_ascii_graphic())
}

/// Read the correlation id attached to a request.
pub trait CorrelationIdExt {
    fn correlation_id(&self) -> Option<&CorrelationId>;
}

impl<B> CorrelationIdExt for Request<B> {
    fn correlation_id(&self) -> Option<&CorrelationId> {
        self.extensions().get::<CorrelationId>()
    }
}

/// Assign the id, run the rest of the stack inside its span and echo it.
pub async fn correlation_middleware(mut request: Request<Body>, next: Next) -> Response {
    let id = CorrelationId::from_headers(request.headers());
    request.extensions_mut().insert(id.clone());

    let span = tracing::info_span!(
        "request",
        correlation_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(X_CORRELATION_ID, value.clone());
        response.headers_mut().insert(SKV_CORRELATION_ID, value);
    }
    response.extensions_mut().insert(id);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuses_valid_inbound_value() {
        assert_eq!(CorrelationId::begin(Some("abc-123")).as_str(), "abc-123");
        assert_eq!(CorrelationId::begin(Some("  padded  ")).as_str(), "padded");
    }

    #[test]
    fn test_generates_when_absent_or_unacceptable() {
        let generated = CorrelationId::begin(None);
        assert!(Uuid::parse_str(generated.as_str()).is_ok());

        let long = "a".repeat(129);
        assert_ne!(CorrelationId::begin(Some(&long)).as_str(), long);
        assert_ne!(CorrelationId::begin(Some("has space")).as_str(), "has space");
        assert!(Uuid::parse_str(CorrelationId::begin(Some("   ")).as_str()).is_ok());
    }

    #[test]
    fn test_header_priority() {
        let mut headers = HeaderMap::new();
        headers.insert(SKV_CORRELATION_ID, HeaderValue::from_static("from-skv"));
        assert_eq!(CorrelationId::from_headers(&headers).as_str(), "from-skv");

        headers.insert(X_CORRELATION_ID, HeaderValue::from_static("from-x"));
        assert_eq!(CorrelationId::from_headers(&headers).as_str(), "from-x");

        headers.insert(X_CORRELATION_ID, HeaderValue::from_static(" "));
        assert_eq!(CorrelationId::from_headers(&headers).as_str(), "from-skv");
    }

    #[test]
    fn test_max_length_accepted() {
        let exact = "b".repeat(128);
        assert_eq!(CorrelationId::begin(Some(&exact)).as_str(), exact);
    }
}
