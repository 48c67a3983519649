//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Inbound listener (bind address, TLS, request limits).
    pub listener: ListenerConfig,

    /// Upstream declaration API endpoints.
    pub upstream: UpstreamConfig,

    /// Client-credentials settings for the token endpoint.
    pub oauth: OAuthConfig,

    /// Client certificate presented to the upstream API.
    pub outbound_certificate: CertificateSourceConfig,

    /// Inbound client certificate policy.
    pub client_auth: ClientAuthConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Audit trail settings.
    pub audit: AuditConfig,

    /// Upstream health probe.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub security: SecurityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration. Required for client certificates.
    pub tls: Option<TlsConfig>,

    /// Total time allowed for one inbound request.
    pub request_timeout_secs: u64,

    /// Maximum accepted request body.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            request_timeout_secs: 120,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Upstream API location.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Production base URL, ending with `/`.
    pub base_url: String,

    /// Test environment base URL.
    pub test_base_url: String,

    /// Route calls (and token requests) to the test environment.
    pub use_test_environment: bool,

    /// Timeout applied to every single attempt.
    pub attempt_timeout_secs: u64,

    /// Extra PEM root certificates trusted for the upstream server.
    pub extra_root_certs: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.skatteverket.se/momsdeklaration/v1/".to_string(),
            test_base_url: "https://api.test.skatteverket.se/momsdeklaration/v1/".to_string(),
            use_test_environment: false,
            attempt_timeout_secs: 30,
            extra_root_certs: Vec::new(),
        }
    }
}

impl UpstreamConfig {
    /// Base URL for the selected environment.
    pub fn active_base_url(&self) -> &str {
        if self.use_test_environment {
            &self.test_base_url
        } else {
            &self.base_url
        }
    }
}

/// Client-credentials configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub client_id: String,

    #[serde(skip_serializing)]
    pub client_secret: String,

    pub token_endpoint: String,

    pub test_token_endpoint: String,

    pub scope: String,

    pub grant_type: String,

    /// Credentials are not served within this many seconds of expiry.
    pub safety_margin_secs: u64,

    /// Lifetime assumed when the token endpoint omits `expires_in`.
    pub default_ttl_secs: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_endpoint: "https://sysoauth2.skatteverket.se/oauth2/v1/token".to_string(),
            test_token_endpoint: "https://sysoauth2.test.skatteverket.se/oauth2/v1/token".to_string(),
            scope: "momsdeklaration".to_string(),
            grant_type: "client_credentials".to_string(),
            safety_margin_secs: 60,
            default_ttl_secs: 3600,
        }
    }
}

impl OAuthConfig {
    /// Token endpoint for the selected environment.
    pub fn active_token_endpoint(&self, use_test_environment: bool) -> &str {
        if use_test_environment {
            &self.test_token_endpoint
        } else {
            &self.token_endpoint
        }
    }
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_endpoint", &self.token_endpoint)
            .field("test_token_endpoint", &self.test_token_endpoint)
            .field("scope", &self.scope)
            .field("grant_type", &self.grant_type)
            .field("safety_margin_secs", &self.safety_margin_secs)
            .field("default_ttl_secs", &self.default_ttl_secs)
            .finish()
    }
}

/// Where the outbound client certificate comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CertificateSourceKind {
    #[default]
    None,
    /// PKCS#12 archive on disk.
    File,
    /// Directory of PEM bundles searched by thumbprint.
    Store,
}

/// Outbound client certificate configuration.
#[derive(Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CertificateSourceConfig {
    pub source: CertificateSourceKind,
    pub path: Option<String>,
    #[serde(skip_serializing)]
    pub passphrase: Option<String>,
    pub store_dir: Option<String>,
    pub thumbprint: Option<String>,
}

impl fmt::Debug for CertificateSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateSourceConfig")
            .field("source", &self.source)
            .field("path", &self.path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .field("store_dir", &self.store_dir)
            .field("thumbprint", &self.thumbprint)
            .finish()
    }
}

/// Revocation checking mode for inbound chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RevocationMode {
    #[default]
    NoCheck,
    Crl,
}

/// Inbound client certificate policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientAuthConfig {
    /// Reject requests without an accepted client certificate.
    pub required: bool,

    /// SHA-1 thumbprint the client certificate must have (hex).
    pub required_thumbprint: Option<String>,

    /// Substring that must appear in the issuer name.
    pub required_issuer: Option<String>,

    /// PEM files with trust anchors for chain building.
    pub trust_anchors: Vec<String>,

    pub revocation: RevocationMode,

    /// CRL files (PEM or DER) used when `revocation = "crl"`.
    pub crl_paths: Vec<String>,

    pub allow_unknown_revocation_status: bool,

    /// Accept a chain whose only defect is an untrusted root.
    pub allow_self_signed: bool,
}

impl Default for ClientAuthConfig {
    fn default() -> Self {
        Self {
            required: false,
            required_thumbprint: None,
            required_issuer: None,
            trust_anchors: Vec::new(),
            revocation: RevocationMode::NoCheck,
            crl_paths: Vec::new(),
            allow_unknown_revocation_status: false,
            allow_self_signed: false,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Exponential base: delay = unit * base^attempt.
    pub backoff_base: u32,

    pub backoff_unit_ms: u64,

    pub max_delay_ms: u64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2,
            backoff_unit_ms: 1000,
            max_delay_ms: 60_000,
            jitter: false,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,

    /// Failures older than this no longer count toward the threshold.
    pub window_secs: u64,

    pub cooldown_secs: u64,

    /// Cooldown multiplier applied after a failed probe.
    pub cooldown_growth: f64,

    pub max_cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 60,
            cooldown_secs: 30,
            cooldown_growth: 2.0,
            max_cooldown_secs: 300,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests admitted per client key and window.
    pub max_requests: u32,

    pub window_secs: u64,

    /// Path prefixes never limited.
    pub exempt_paths: Vec<String>,

    /// How often expired buckets are removed.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            window_secs: 15 * 60,
            exempt_paths: vec!["/health".into(), "/ping".into(), "/swagger".into()],
            sweep_interval_secs: 60,
        }
    }
}

/// Audit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,

    pub exempt_paths: Vec<String>,

    /// Larger request bodies are forwarded but not captured.
    pub max_captured_body_bytes: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exempt_paths: vec![
                "/health".into(),
                "/ping".into(),
                "/swagger".into(),
                "/favicon.ico".into(),
            ],
            max_captured_body_bytes: 64 * 1024,
        }
    }
}

/// Upstream health probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,

    pub interval_secs: u64,

    pub timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is not set.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Address for metrics server.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "vat_gateway=info,tower_http=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Response hardening.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub enable_headers: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: "change-me".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

impl fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [oauth]
            client_id = "abc"
            client_secret = "s3cret"
            "#,
        )
        .unwrap();

        assert_eq!(config.oauth.client_id, "abc");
        assert_eq!(config.oauth.safety_margin_secs, 60);
        assert_eq!(config.retries.max_retries, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window_secs, 900);
        assert_eq!(config.outbound_certificate.source, CertificateSourceKind::None);
    }

    #[test]
    fn test_environment_selection() {
        let mut config = GatewayConfig::default();
        assert!(config.upstream.active_base_url().contains("api.skatteverket.se"));
        assert!(!config.oauth.active_token_endpoint(false).contains(".test."));

        config.upstream.use_test_environment = true;
        assert!(config.upstream.active_base_url().contains("api.test."));
        assert!(config.oauth.active_token_endpoint(true).contains(".test."));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = GatewayConfig::default();
        config.oauth.client_secret = "top-secret".into();
        config.admin.api_key = "admin-key".into();
        config.outbound_certificate.passphrase = Some("pfx-pass".into());

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("top-secret"));
        assert!(!rendered.contains("admin-key"));
        assert!(!rendered.contains("pfx-pass"));
    }

    #[test]
    fn test_certificate_source_parsing() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [outbound_certificate]
            source = "store"
            store_dir = "/etc/gateway/certs"
            thumbprint = "AB12"

            [client_auth]
            revocation = "crl"
            crl_paths = ["/etc/gateway/ca.crl"]
            "#,
        )
        .unwrap();

        assert_eq!(config.outbound_certificate.source, CertificateSourceKind::Store);
        assert_eq!(config.client_auth.revocation, RevocationMode::Crl);
    }
}
