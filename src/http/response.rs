//! Upstream response → client response.
//!
//! # Design Decisions
//! - Only status, content type and body are passed through; upstream
//!   headers such as `Set-Cookie` or `Server` never reach the caller
//! - A missing content type defaults to JSON, which is all the upstream
//!   ever returns on success

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};

use crate::upstream::UpstreamResponse;

pub fn into_client_response(upstream: UpstreamResponse) -> Response {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK);
    let content_type = upstream
        .content_type
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = status;
    if status != StatusCode::NO_CONTENT {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;

    #[test]
    fn test_status_and_content_type_kept() {
        let response = into_client_response(UpstreamResponse {
            status: 201,
            content_type: Some(HeaderValue::from_static("application/json; charset=utf-8")),
            body: Bytes::from_static(b"{}"),
        });
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json; charset=utf-8");
    }

    #[test]
    fn test_no_content_has_no_content_type() {
        let response = into_client_response(UpstreamResponse {
            status: 204,
            content_type: None,
            body: Bytes::new(),
        });
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    }
}
