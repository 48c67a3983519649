//! Latest upstream health report.
//!
//! # States
//! - Healthy: `ping` answered 2xx
//! - Degraded: `ping` answered with another status
//! - Unhealthy: network error or timeout
//! - Unknown: no probe has completed yet
//!
//! # Design Decisions
//! - Readers never wait on a probe; the report is swapped atomically
//! - Only `Unhealthy` makes `/health` answer 503

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_available(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }

    /// Gauge value: 1 healthy, 0.5 degraded, 0 unhealthy.
    pub fn score(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded | HealthStatus::Unknown => 0.5,
            HealthStatus::Unhealthy => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub description: String,
    pub checked_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
}

impl HealthReport {
    pub fn unknown() -> Self {
        Self {
            status: HealthStatus::Unknown,
            description: "No upstream probe completed yet".to_string(),
            checked_at: None,
            latency_ms: None,
        }
    }
}

pub struct HealthState {
    report: ArcSwap<HealthReport>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            report: ArcSwap::from_pointee(HealthReport::unknown()),
        }
    }

    pub fn current(&self) -> Arc<HealthReport> {
        self.report.load_full()
    }

    /// Store a new report, logging status changes.
    pub fn update(&self, report: HealthReport) {
        let previous = self.report.load().status;
        if previous != report.status {
            match report.status {
                HealthStatus::Unhealthy => tracing::warn!(
                    from = ?previous,
                    description = %report.description,
                    "Upstream became unhealthy"
                ),
                _ => tracing::info!(from = ?previous, to = ?report.status, "Upstream health changed"),
            }
        }
        self.report.store(Arc::new(report));
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
