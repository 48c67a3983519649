use axum::{extract::State, Json};
use serde::Serialize;

use crate::auth::CredentialStatus;
use crate::health::HealthReport;
use crate::http::server::AppState;
use crate::resilience::CircuitSnapshot;
use crate::security::rate_limit::BucketStatus;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub uptime_secs: u64,
    pub upstream: String,
    pub circuit: CircuitSnapshot,
    pub health: HealthReport,
    pub client_certificate: Option<String>,
}

#[derive(Serialize)]
pub struct InvalidateResult {
    pub scope_invalidated: bool,
}

#[derive(Serialize)]
pub struct RateLimitSummary {
    pub enabled: bool,
    pub max_requests: u32,
    pub active_buckets: usize,
    pub buckets: Vec<BucketStatus>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        upstream: state.upstream.base_url().to_string(),
        circuit: state.upstream.circuit(),
        health: (*state.health.current()).clone(),
        client_certificate: state
            .trust
            .identity()
            .client_certificate()
            .map(|c| c.description.clone()),
    })
}

pub async fn get_credentials(State(state): State<AppState>) -> Json<Vec<CredentialStatus>> {
    Json(state.upstream.credentials().status())
}

pub async fn invalidate_credentials(State(state): State<AppState>) -> Json<InvalidateResult> {
    let invalidated = state.upstream.credentials().invalidate_default();
    tracing::info!(invalidated, "Credential invalidation requested via admin API");
    Json(InvalidateResult {
        scope_invalidated: invalidated,
    })
}

pub async fn get_rate_limits(State(state): State<AppState>) -> Json<RateLimitSummary> {
    let limiter = &state.rate_limiter;
    Json(RateLimitSummary {
        enabled: limiter.is_enabled(),
        max_requests: limiter.max_requests(),
        active_buckets: limiter.active_buckets(),
        buckets: limiter.snapshot(),
    })
}
