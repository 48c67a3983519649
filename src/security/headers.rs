//! Security response headers.
//!
//! # Responsibilities
//! - Add browser hardening headers to every response
//! - Strip the `Server` header
//!
//! # Design Decisions
//! - Headers already set by a handler are left alone
//! - Disabled entirely by `security.enable_headers = false`

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::http::server::AppState;

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("content-security-policy", "default-src 'self'"),
    ("strict-transport-security", "max-age=31536000; includeSubDomains"),
    ("permissions-policy", "geolocation=(), microphone=(), camera=()"),
];

/// Apply the hardening headers to a response in place.
pub fn apply_security_headers(response: &mut Response) {
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers
            .entry(HeaderName::from_static(name))
            .or_insert_with(|| HeaderValue::from_static(value));
    }
    headers.remove(header::SERVER);
}

pub async fn security_headers_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    if state.config.security.enable_headers {
        apply_security_headers(&mut response);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_added_and_server_removed() {
        let mut response = Response::new(Body::empty());
        response
            .headers_mut()
            .insert(header::SERVER, HeaderValue::from_static("kestrel"));
        response
            .headers_mut()
            .insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));

        apply_security_headers(&mut response);

        let headers = response.headers();
        assert!(headers.get(header::SERVER).is_none());
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
        assert!(headers.contains_key("permissions-policy"));
    }
}
