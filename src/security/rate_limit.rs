//! Fixed-window rate limiting per client key.
//!
//! # Client Keys
//! ```text
//! authenticated principal  → user_<name>
//! Client-ID header         → client_<id>
//! peer socket address      → ip_<addr>
//! otherwise                → anonymous
//! ```
//!
//! # Design Decisions
//! - One bucket per key in a `DashMap`; the entry lock makes
//!   check-and-increment atomic per key without a global lock
//! - Rejections do not count, so a client hammering a closed window does
//!   not extend its own penalty
//! - A sweeper drops expired buckets; memory is bounded by the keys active
//!   within one window

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::audit::{AuditEvent, AuditEventKind, AuditResult};
use crate::config::RateLimitConfig;
use crate::error::GatewayError;
use crate::http::correlation::CorrelationIdExt;
use crate::http::server::AppState;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::security::path_is_exempt;
use crate::transport::PeerAuthentication;

pub const CLIENT_ID_HEADER: &str = "client-id";

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    window_start: Instant,
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32, reset_after: Duration },
    Rejected { retry_after: Duration },
}

/// Admin view of one bucket.
#[derive(Debug, Clone, Serialize)]
pub struct BucketStatus {
    pub key: String,
    pub count: u32,
    pub resets_in_secs: u64,
}

pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    max_requests: u32,
    window: Duration,
    exempt_paths: Vec<String>,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            exempt_paths: config.exempt_paths.clone(),
            enabled: config.enabled,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        path_is_exempt(path, &self.exempt_paths)
    }

    pub fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now())
    }

    pub fn admit_at(&self, key: &str, now: Instant) -> Admission {
        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            window_start: now,
        });

        if now.saturating_duration_since(bucket.window_start) >= self.window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        let reset_after = self.window.saturating_sub(now.saturating_duration_since(bucket.window_start));
        if bucket.count >= self.max_requests {
            return Admission::Rejected {
                retry_after: reset_after,
            };
        }

        bucket.count += 1;
        Admission::Allowed {
            remaining: self.max_requests - bucket.count,
            reset_after,
        }
    }

    /// Drop buckets whose window has elapsed. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.window_start) < self.window);
        before - self.buckets.len()
    }

    pub fn active_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn snapshot(&self) -> Vec<BucketStatus> {
        let now = Instant::now();
        let mut buckets: Vec<BucketStatus> = self
            .buckets
            .iter()
            .map(|entry| BucketStatus {
                key: entry.key().clone(),
                count: entry.count,
                resets_in_secs: self
                    .window
                    .saturating_sub(now.saturating_duration_since(entry.window_start))
                    .as_secs(),
            })
            .collect();
        buckets.sort_by(|a, b| a.key.cmp(&b.key));
        buckets
    }

    /// Periodically sweep until shutdown.
    pub async fn run_sweeper(self: std::sync::Arc<Self>, interval: Duration, shutdown: Shutdown) {
        let stop = shutdown.wait();
        tokio::pin!(stop);
        let mut ticker = tokio::time::interval(interval);
        tracing::info!(interval_secs = interval.as_secs(), "Rate limit sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, active = self.active_buckets(), "Swept expired rate limit buckets");
                    }
                }
                _ = &mut stop => {
                    tracing::info!("Rate limit sweeper stopping");
                    break;
                }
            }
        }
    }
}

/// Client key for a request, in priority order.
pub fn client_key(
    principal: Option<&str>,
    client_id: Option<&str>,
    address: Option<&SocketAddr>,
) -> String {
    if let Some(name) = principal.filter(|n| !n.is_empty()) {
        return format!("user_{}", name);
    }
    if let Some(id) = client_id.map(str::trim).filter(|id| !id.is_empty()) {
        return format!("client_{}", id);
    }
    if let Some(addr) = address {
        return format!("ip_{}", addr.ip());
    }
    "anonymous".to_string()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Middleware enforcing the per-key window.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let limiter = &state.rate_limiter;
    let path = request.uri().path().to_string();
    if !limiter.is_enabled() || limiter.is_exempt(&path) {
        return next.run(request).await;
    }

    let address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let principal = request
        .extensions()
        .get::<PeerAuthentication>()
        .and_then(PeerAuthentication::principal)
        .map(|p| p.name.clone());
    let client_id = request
        .headers()
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let key = client_key(principal.as_deref(), client_id.as_deref(), address.as_ref());

    match limiter.admit(&key) {
        Admission::Allowed { remaining, reset_after } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limiter.max_requests()));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            headers.insert("x-ratelimit-reset", HeaderValue::from(unix_now() + reset_after.as_secs()));
            response
        }
        Admission::Rejected { retry_after } => {
            let correlation_id = request.correlation_id().map(|id| id.to_string());
            tracing::warn!(client = %key, path = %path, retry_after_secs = retry_after.as_secs(), "Rate limit exceeded");
            metrics::record_rate_limited("window_exhausted");

            state.audit.record(
                AuditEvent::new(
                    AuditEventKind::Security,
                    correlation_id.clone().unwrap_or_default(),
                    principal.unwrap_or_else(|| "Anonymous".to_string()),
                    "RateLimitExceeded",
                    AuditResult::Failure,
                )
                .with_request(request.method().as_str(), &path)
                .with_client_address(address.map(|a| a.ip().to_string()))
                .with_detail(format!("client key {} exceeded {} requests", key, limiter.max_requests())),
            );

            let mut response =
                GatewayError::RateLimitExceeded { retry_after }.to_response(&path, correlation_id.as_deref());
            response
                .headers_mut()
                .insert("x-ratelimit-limit", HeaderValue::from(limiter.max_requests()));
            response.headers_mut().insert("x-ratelimit-remaining", HeaderValue::from(0u32));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            max_requests: max,
            window_secs,
            ..RateLimitConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fourth_request_rejected() {
        let limiter = limiter(3, 60);
        for expected in [2, 1, 0] {
            match limiter.admit("ip_10.0.0.1") {
                Admission::Allowed { remaining, .. } => assert_eq!(remaining, expected),
                other => panic!("unexpected {:?}", other),
            }
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        match limiter.admit("ip_10.0.0.1") {
            Admission::Rejected { retry_after } => {
                assert!(retry_after <= Duration::from_secs(60));
                assert_eq!(retry_after, Duration::from_secs(50));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_admits_again() {
        let limiter = limiter(3, 60);
        for _ in 0..3 {
            limiter.admit("k");
        }
        assert!(matches!(limiter.admit("k"), Admission::Rejected { .. }));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(matches!(limiter.admit("k"), Admission::Allowed { remaining: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_do_not_count() {
        let limiter = limiter(1, 60);
        limiter.admit("k");
        for _ in 0..5 {
            limiter.admit("k");
        }
        assert_eq!(limiter.snapshot()[0].count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = limiter(1, 60);
        assert!(matches!(limiter.admit("a"), Admission::Allowed { .. }));
        assert!(matches!(limiter.admit("b"), Admission::Allowed { .. }));
        assert!(matches!(limiter.admit("a"), Admission::Rejected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired_buckets() {
        let limiter = limiter(5, 60);
        limiter.admit("old");
        tokio::time::advance(Duration::from_secs(45)).await;
        limiter.admit("new");
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.snapshot()[0].key, "new");
    }

    #[test]
    fn test_client_key_priority() {
        let addr: SocketAddr = "192.0.2.7:5555".parse().unwrap();
        assert_eq!(client_key(Some("CN=Acme"), Some("abc"), Some(&addr)), "user_CN=Acme");
        assert_eq!(client_key(None, Some("abc"), Some(&addr)), "client_abc");
        assert_eq!(client_key(None, Some("  "), Some(&addr)), "ip_192.0.2.7");
        assert_eq!(client_key(None, None, None), "anonymous");
    }

    #[test]
    fn test_exempt_paths() {
        let limiter = limiter(1, 60);
        assert!(limiter.is_exempt("/health"));
        assert!(limiter.is_exempt("/HEALTH/live"));
        assert!(limiter.is_exempt("/swagger/index.html"));
        assert!(!limiter.is_exempt("/healthz"));
        assert!(!limiter.is_exempt("/api/v1/utkast/1/2"));
    }
}
