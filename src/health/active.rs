//! Active upstream health checking.
//!
//! # Responsibilities
//! - Periodically probe the upstream `ping` endpoint
//! - Publish the result to [`HealthState`]

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::time;

use crate::config::HealthConfig;
use crate::health::state::{HealthReport, HealthState, HealthStatus};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::upstream::{UpstreamClient, UpstreamError};

/// Something that can be pinged.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn ping(&self, timeout: Duration) -> Result<u16, UpstreamError>;
}

#[async_trait]
impl Probe for UpstreamClient {
    async fn ping(&self, timeout: Duration) -> Result<u16, UpstreamError> {
        UpstreamClient::ping(self, timeout).await
    }
}

pub struct HealthMonitor {
    probe: Arc<dyn Probe>,
    state: Arc<HealthState>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn Probe>, state: Arc<HealthState>, config: HealthConfig) -> Self {
        Self { probe, state, config }
    }

    pub async fn run(self, shutdown: Shutdown) {
        if !self.config.enabled {
            tracing::info!("Upstream health checks disabled");
            return;
        }

        tracing::info!(interval_secs = self.config.interval_secs, "Health monitor starting");

        let stop = shutdown.wait();
        tokio::pin!(stop);
        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_once().await;
                }
                _ = &mut stop => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub async fn check_once(&self) -> HealthReport {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let start = Instant::now();
        let result = time::timeout(timeout, self.probe.ping(timeout)).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (status, description) = match result {
            Ok(Ok(code)) if (200..300).contains(&code) => {
                (HealthStatus::Healthy, "Upstream API is reachable".to_string())
            }
            Ok(Ok(code)) => (HealthStatus::Degraded, format!("Upstream API returned {}", code)),
            Ok(Err(e)) => (HealthStatus::Unhealthy, format!("Upstream API is not reachable: {}", e)),
            Err(_) => (HealthStatus::Unhealthy, "Upstream API request timed out".to_string()),
        };

        let report = HealthReport {
            status,
            description,
            checked_at: Some(Utc::now()),
            latency_ms: Some(latency_ms),
        };
        metrics::record_upstream_health(status.score());
        self.state.update(report.clone());
        report
    }
}
