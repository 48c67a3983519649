//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the axum router with every middleware in order
//! - Serve over plain TCP or TLS with client certificates
//! - Stop accepting and drain on shutdown
//!
//! # Middleware Order (outer → inner)
//! ```text
//! TraceLayer → correlation → security headers → peer authentication
//!     → rate limit → audit → [api routes: authentication enforcement
//!     → body limit → request timeout] → handler
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{any, get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::audit::{audit_middleware, AuditSink};
use crate::config::GatewayConfig;
use crate::health::HealthState;
use crate::http::correlation::correlation_middleware;
use crate::http::handlers;
use crate::lifecycle::Shutdown;
use crate::security::{rate_limit_middleware, security_headers_middleware, RateLimiter};
use crate::transport::middleware::{authenticate_peer, require_authenticated};
use crate::transport::tls::PeerCapturingAcceptor;
use crate::transport::TrustManager;
use crate::upstream::UpstreamClient;

/// How long in-flight requests get to finish after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state injected into handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub trust: Arc<TrustManager>,
    pub upstream: Arc<UpstreamClient>,
    pub rate_limiter: Arc<RateLimiter>,
    pub audit: Arc<dyn AuditSink>,
    pub health: Arc<HealthState>,
    pub started_at: Instant,
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
    state: AppState,
}

impl GatewayServer {
    pub fn new(state: AppState) -> Self {
        let router = build_router(state.clone());
        Self { router, state }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve plain HTTP on `listener` until shutdown.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, tls = false, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `listener`, exposing client certificates to the stack.
    pub async fn run_tls(
        self,
        listener: std::net::TcpListener,
        tls: Arc<rustls::ServerConfig>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            tls = true,
            client_auth_required = self.state.trust.client_auth_required(),
            "HTTP server starting"
        );

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            shutdown.wait().await;
            drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum_server::from_tcp(listener)
            .acceptor(PeerCapturingAcceptor::new(tls))
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState) -> Router {
    let listener = &state.config.listener;

    let api = Router::new()
        .route("/api/v1/{resource}/{organisation}/{period}", any(handlers::forward))
        .route("/api/v1/{resource}", post(handlers::forward_batch))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(state.clone(), require_authenticated))
                .layer(RequestBodyLimitLayer::new(listener.max_body_bytes))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::GATEWAY_TIMEOUT,
                    Duration::from_secs(listener.request_timeout_secs),
                )),
        );

    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/health", get(handlers::health))
        .merge(api)
        .fallback(handlers::not_found)
        .layer(from_fn_with_state(state.clone(), audit_middleware))
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), authenticate_peer))
        .layer(from_fn_with_state(state.clone(), security_headers_middleware))
        .layer(from_fn(correlation_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
