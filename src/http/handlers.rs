//! Request handlers.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;

use crate::error::{wire_timestamp, GatewayError};
use crate::http::correlation::CorrelationId;
use crate::http::response::into_client_response;
use crate::http::server::AppState;
use crate::resilience::Deadline;
use crate::transport::PeerAuthentication;
use crate::upstream::{RequestContext, UpstreamRequest};

/// Declaration resources the gateway forwards.
pub const FORWARDED_RESOURCES: &[&str] = &["utkast", "kontrollera", "las", "inlamnat", "beslutat"];

/// Slack left for the gateway to render a timeout itself before the
/// outer request timeout fires.
const DEADLINE_SLACK: Duration = Duration::from_millis(500);

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn health(State(state): State<AppState>) -> Response {
    let report = state.health.current();
    let circuit = state.upstream.circuit();
    let status = if report.status.is_available() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": report.status,
        "timestamp": wire_timestamp(),
        "upstream": &*report,
        "circuit": circuit,
    });
    (status, Json(body)).into_response()
}

/// `/api/v1/{resource}/{organisation}/{period}`, any method.
pub async fn forward(
    State(state): State<AppState>,
    Path((resource, organisation, period)): Path<(String, String, String)>,
    method: Method,
    uri: Uri,
    RawQuery(query): RawQuery,
    Extension(correlation_id): Extension<CorrelationId>,
    peer: Option<Extension<PeerAuthentication>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("{}/{}/{}", resource, organisation, period);
    dispatch(&state, &resource, path, method, &uri, query, &correlation_id, peer, &headers, body).await
}

/// `POST /api/v1/{resource}`: fetch several periods at once.
pub async fn forward_batch(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    uri: Uri,
    RawQuery(query): RawQuery,
    Extension(correlation_id): Extension<CorrelationId>,
    peer: Option<Extension<PeerAuthentication>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = resource.clone();
    dispatch(&state, &resource, path, Method::POST, &uri, query, &correlation_id, peer, &headers, body).await
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    state: &AppState,
    resource: &str,
    path: String,
    method: Method,
    uri: &Uri,
    query: Option<String>,
    correlation_id: &CorrelationId,
    peer: Option<Extension<PeerAuthentication>>,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let resource = resource.to_ascii_lowercase();
    if !FORWARDED_RESOURCES.contains(&resource.as_str()) {
        return GatewayError::NotFound(format!("Resource '{}'", resource))
            .to_response(uri.path(), Some(correlation_id.as_str()));
    }

    let mut request = UpstreamRequest::new(method.clone(), path);
    request.query = query;
    if !body.is_empty() {
        request.body = Some(body);
        request.content_type = headers.get(header::CONTENT_TYPE).cloned();
    }

    let request_timeout = Duration::from_secs(state.config.listener.request_timeout_secs);
    let context = RequestContext {
        correlation_id: correlation_id.to_string(),
        user: peer.and_then(|Extension(p)| p.principal().map(|p| p.name.clone())),
        deadline: Some(Deadline::after(request_timeout.saturating_sub(DEADLINE_SLACK).max(Duration::from_secs(1)))),
    };

    match state.upstream.send(&request, &context).await {
        Ok(response) => into_client_response(response),
        Err(err) => {
            let status = err.status();
            if status.is_server_error() {
                tracing::warn!(method = %method, path = %uri.path(), code = err.code(), error = %err, "Forwarding failed");
            } else {
                tracing::info!(method = %method, path = %uri.path(), code = err.code(), "Upstream rejected request");
            }
            err.to_response(uri.path(), Some(correlation_id.as_str()))
        }
    }
}

/// Fallback for unknown routes.
pub async fn not_found(uri: Uri, correlation_id: Option<Extension<CorrelationId>>) -> Response {
    let id = correlation_id.map(|Extension(id)| id.to_string());
    GatewayError::NotFound(format!("Route '{}'", uri.path())).to_response(uri.path(), id.as_deref())
}
