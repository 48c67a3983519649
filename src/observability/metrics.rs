//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): inbound requests by method, status, operation
//! - `gateway_request_duration_seconds` (histogram): inbound latency
//! - `gateway_rate_limited_total` (counter): rejected requests by reason
//! - `gateway_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_upstream_retries_total` (counter): scheduled retries
//! - `gateway_token_refresh_total` (counter): credential exchanges by result
//! - `gateway_audit_events_total` (counter): audit events by kind
//! - `gateway_upstream_health` (gauge): 1=healthy, 0.5=degraded, 0=unhealthy
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; with no recorder
//!   installed every call is a no-op, which keeps tests quiet
//! - Labels are low-cardinality (no organisation numbers, no client keys)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, operation: &str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "operation" => operation.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(reason: &'static str) {
    counter!("gateway_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_circuit_state(state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("gateway_circuit_state").set(value);
}

pub fn record_retry(target: &str) {
    counter!("gateway_upstream_retries_total", "target" => target.to_string()).increment(1);
}

pub fn record_token_refresh(scope: &str, success: bool) {
    counter!(
        "gateway_token_refresh_total",
        "scope" => scope.to_string(),
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

pub fn record_audit_event(kind: &'static str) {
    counter!("gateway_audit_events_total", "kind" => kind).increment(1);
}

pub fn record_upstream_health(score: f64) {
    gauge!("gateway_upstream_health").set(score);
}
