//! Audit capture around the business handler.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, Method, Request},
    middleware::Next,
    response::Response,
};
use futures_util::{stream, StreamExt};

use crate::audit::event::{AuditEvent, AuditEventKind, AuditResult};
use crate::audit::operation::{action, is_data_access, operation_name, resource_id, RESOURCE_KIND};
use crate::http::correlation::CorrelationIdExt;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::path_is_exempt;
use crate::transport::PeerAuthentication;

pub async fn audit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = &state.config.audit;
    let path = request.uri().path().to_string();
    if !config.enabled || path_is_exempt(&path, &config.exempt_paths) {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().clone();
    let correlation_id = request.correlation_id().map(|id| id.to_string()).unwrap_or_default();
    let actor = request
        .extensions()
        .get::<PeerAuthentication>()
        .and_then(PeerAuthentication::principal)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| "Anonymous".to_string());
    let address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let (request, captured) = if method == Method::POST || method == Method::PUT {
        capture_body(request, config.max_captured_body_bytes).await
    } else {
        (request, None)
    };

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let operation = operation_name(&path, &method);
    let result = AuditResult::from_status(status);

    let mut api_call = AuditEvent::new(AuditEventKind::ApiCall, correlation_id.clone(), actor.clone(), operation, result)
        .with_request(method.as_str(), &path)
        .with_client_address(address);
    api_call.status = Some(status);
    api_call.duration_ms = Some(start.elapsed().as_millis() as u64);
    api_call.request_body = captured;
    state.audit.record(api_call);

    if is_data_access(operation) {
        let mut access = AuditEvent::new(AuditEventKind::DataAccess, correlation_id, actor, operation, result);
        access.resource_kind = Some(RESOURCE_KIND.to_string());
        access.resource_id = resource_id(&path);
        access.action = Some(action(&method).to_string());
        state.audit.record(access);
    }

    metrics::record_request(method.as_str(), status, operation, start);
    response
}

/// Read up to `limit` bytes of the body for capture and hand back a request
/// whose body is unchanged. Bodies over the limit are not captured.
async fn capture_body(request: Request<Body>, limit: usize) -> (Request<Body>, Option<String>) {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared == Some(0) || declared.is_some_and(|len| len > limit) {
        return (request, None);
    }

    let (parts, body) = request.into_parts();
    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total = 0usize;
    let mut overflow = false;

    while let Some(chunk) = data.next().await {
        match chunk {
            Ok(bytes) => {
                total += bytes.len();
                chunks.push(bytes);
                if total > limit {
                    overflow = true;
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Request body ended with an error during capture");
                let replay = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>))
                    .chain(stream::once(async move { Err(e) }));
                return (Request::from_parts(parts, Body::from_stream(replay)), None);
            }
        }
    }

    let captured = if overflow || total == 0 {
        None
    } else {
        Some(String::from_utf8_lossy(&chunks.concat()).into_owned())
    };

    let replay = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>)).chain(data);
    (Request::from_parts(parts, Body::from_stream(replay)), captured)
}
