//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from a validated configuration
//! - Start background tasks (health monitor, rate limit sweeper, admin API)
//! - Bind the listener last so traffic only arrives when ready
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - One outbound HTTP client carries the client certificate for both the
//!   token endpoint and resource calls

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin;
use crate::audit::{AuditSink, TracingAuditSink};
use crate::auth::{CredentialCache, OAuthTokenEndpoint};
use crate::config::GatewayConfig;
use crate::health::{HealthMonitor, HealthState};
use crate::http::{AppState, GatewayServer};
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::resilience::{ResilienceEvents, ResiliencePolicy, TracingEvents};
use crate::security::RateLimiter;
use crate::transport::{tls, IdentityError, TrustManager};
use crate::upstream::UpstreamClient;

/// Name of the upstream target in logs and metrics.
pub const UPSTREAM_TARGET: &str = "skatteverket";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("invalid upstream URL: {0}")]
    UpstreamUrl(#[from] url::ParseError),

    #[error("invalid address {0}: {1}")]
    Address(String, std::net::AddrParseError),

    #[error("failed to bind {0}: {1}")]
    Bind(String, #[source] std::io::Error),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Build shared state from configuration with the given audit sink.
pub fn build_state(config: GatewayConfig, audit: Arc<dyn AuditSink>) -> Result<AppState, StartupError> {
    let trust = TrustManager::from_config(&config)?;
    let attempt_timeout = Duration::from_secs(config.upstream.attempt_timeout_secs);

    let builder = reqwest::Client::builder()
        .user_agent(concat!("vat-gateway/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10));
    let http = trust.configure_outbound_identity(builder).build()?;

    let token_client = trust
        .configure_outbound_identity(reqwest::Client::builder().timeout(attempt_timeout))
        .build()?;
    let token_url = config.oauth.active_token_endpoint(config.upstream.use_test_environment);
    let endpoint = OAuthTokenEndpoint::new(token_client, token_url, &config.oauth);
    tracing::info!(
        token_endpoint = %endpoint.url(),
        scope = %config.oauth.scope,
        "Credential cache configured"
    );
    let credentials = CredentialCache::new(Arc::new(endpoint), &config.oauth);

    let events: Arc<dyn ResilienceEvents> = Arc::new(TracingEvents);
    let policy = ResiliencePolicy::new(
        UPSTREAM_TARGET,
        &config.circuit_breaker,
        &config.retries,
        attempt_timeout,
        events,
    );
    let upstream = UpstreamClient::new(http, config.upstream.active_base_url(), credentials, policy)?;
    tracing::info!(
        base_url = %upstream.base_url(),
        test_environment = config.upstream.use_test_environment,
        "Upstream client configured"
    );

    Ok(AppState {
        rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
        config: Arc::new(config),
        trust: Arc::new(trust),
        upstream: Arc::new(upstream),
        audit,
        health: Arc::new(HealthState::new()),
        started_at: Instant::now(),
    })
}

/// Run the gateway until a termination signal arrives.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let tls_config = match &config.listener.tls {
        Some(tls) => Some(tls::build_server_config(tls)?),
        None => None,
    };

    let state = build_state(config, Arc::new(TracingAuditSink))?;
    let config = state.config.clone();

    tokio::spawn(
        HealthMonitor::new(state.upstream.clone(), state.health.clone(), config.health.clone())
            .run(shutdown.clone()),
    );

    if config.rate_limit.enabled {
        tokio::spawn(state.rate_limiter.clone().run_sweeper(
            Duration::from_secs(config.rate_limit.sweep_interval_secs),
            shutdown.clone(),
        ));
    }

    if config.admin.enabled {
        let address = config.admin.bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| StartupError::Bind(address, e))?;
        let admin_state = state.clone();
        let admin_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = admin::run_admin(listener, admin_state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    tokio::spawn(signals::wait_for_signal(shutdown.clone()));

    let server = GatewayServer::new(state);
    let address = config.listener.bind_address.clone();
    match tls_config {
        Some(tls) => {
            let addr: SocketAddr = address
                .parse()
                .map_err(|e| StartupError::Address(address.clone(), e))?;
            let listener = std::net::TcpListener::bind(addr).map_err(|e| StartupError::Bind(address.clone(), e))?;
            server.run_tls(listener, tls, shutdown.clone()).await.map_err(StartupError::Serve)?;
        }
        None => {
            let listener = TcpListener::bind(&address)
                .await
                .map_err(|e| StartupError::Bind(address.clone(), e))?;
            server.run(listener, shutdown.clone()).await.map_err(StartupError::Serve)?;
        }
    }

    // Stop background tasks if the server ended on its own.
    shutdown.trigger();
    Ok(())
}
