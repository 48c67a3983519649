//! Shared utilities for gateway integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;

use vat_gateway::audit::MemoryAuditSink;
use vat_gateway::http::{AppState, GatewayServer};
use vat_gateway::lifecycle::{build_state, Shutdown};
use vat_gateway::GatewayConfig;

/// Scripted stand-in for the token endpoint and declaration API.
#[derive(Clone, Default)]
pub struct MockUpstream {
    pub token_calls: Arc<AtomicUsize>,
    pub api_calls: Arc<AtomicUsize>,
    /// Statuses returned by successive API calls; 200 once exhausted.
    pub script: Arc<Mutex<VecDeque<u16>>>,
    pub received: Arc<Mutex<Vec<HeaderMap>>>,
    pub ping_status: Arc<Mutex<u16>>,
    pub token_delay: Arc<Mutex<Duration>>,
    pub api_delay: Arc<Mutex<Duration>>,
}

impl MockUpstream {
    pub fn script(&self, statuses: &[u16]) {
        self.script.lock().unwrap().extend(statuses.iter().copied());
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn api_calls(&self) -> usize {
        self.api_calls.load(Ordering::SeqCst)
    }

    pub fn last_headers(&self) -> Option<HeaderMap> {
        self.received.lock().unwrap().last().cloned()
    }

    pub fn set_ping_status(&self, status: u16) {
        *self.ping_status.lock().unwrap() = status;
    }

    pub fn set_token_delay(&self, delay: Duration) {
        *self.token_delay.lock().unwrap() = delay;
    }

    pub fn set_api_delay(&self, delay: Duration) {
        *self.api_delay.lock().unwrap() = delay;
    }
}

async fn token(State(mock): State<MockUpstream>) -> Json<serde_json::Value> {
    let n = mock.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let delay = *mock.token_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    Json(json!({
        "access_token": format!("token-{}", n),
        "token_type": "Bearer",
        "expires_in": 3600,
    }))
}

async fn upstream_ping(State(mock): State<MockUpstream>) -> StatusCode {
    let status = *mock.ping_status.lock().unwrap();
    StatusCode::from_u16(status).unwrap_or(StatusCode::OK)
}

async fn declaration(State(mock): State<MockUpstream>, headers: HeaderMap) -> Response {
    mock.api_calls.fetch_add(1, Ordering::SeqCst);
    mock.received.lock().unwrap().push(headers);
    let delay = *mock.api_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let status = mock.script.lock().unwrap().pop_front().unwrap_or(200);
    let status = StatusCode::from_u16(status).unwrap();
    if status.is_success() {
        return (status, Json(json!({ "redovisare": "5566778899", "redovisningsperiod": "202401" })))
            .into_response();
    }

    let code = match status.as_u16() {
        400 => "VAL001",
        401 => "AUTH003",
        404 => "RES001",
        503 => "SYS001",
        _ => "SYS002",
    };
    (status, Json(json!({ "code": code, "message": "scripted failure" }))).into_response()
}

/// Start the mock on an ephemeral port.
pub async fn start_mock_upstream() -> (SocketAddr, MockUpstream) {
    let mock = MockUpstream::default();
    mock.set_ping_status(200);

    let app = Router::new()
        .route("/oauth2/v1/token", post(token))
        .route("/api/ping", get(upstream_ping))
        .route("/api/{*rest}", any(declaration))
        .with_state(mock.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, mock)
}

/// Configuration pointing at the mock with fast retries.
pub fn gateway_config(upstream: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.base_url = format!("http://{}/api", upstream);
    config.upstream.attempt_timeout_secs = 2;
    config.oauth.token_endpoint = format!("http://{}/oauth2/v1/token", upstream);
    config.oauth.client_id = "gateway-test".into();
    config.oauth.client_secret = "secret".into();
    config.retries.backoff_unit_ms = 5;
    config.health.enabled = false;
    config
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: AppState,
    pub audit: MemoryAuditSink,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Build the gateway from `config` and serve it on an ephemeral port.
pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let audit = MemoryAuditSink::new();
    let state = build_state(config, Arc::new(audit.clone())).unwrap();
    let shutdown = Shutdown::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GatewayServer::new(state.clone());
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        server.run(listener, server_shutdown).await.unwrap();
    });

    TestGateway {
        addr,
        state,
        audit,
        shutdown,
    }
}

pub const DECLARATION_PATH: &str = "/api/v1/utkast/5566778899/202401";

/// Build the gateway from `config` and serve it over TLS on an ephemeral port.
pub async fn start_tls_gateway(config: GatewayConfig) -> TestGateway {
    let tls = vat_gateway::transport::tls::build_server_config(config.listener.tls.as_ref().unwrap()).unwrap();
    let audit = MemoryAuditSink::new();
    let state = build_state(config, Arc::new(audit.clone())).unwrap();
    let shutdown = Shutdown::new();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GatewayServer::new(state.clone());
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        server.run_tls(listener, tls, server_shutdown).await.unwrap();
    });

    TestGateway {
        addr,
        state,
        audit,
        shutdown,
    }
}
