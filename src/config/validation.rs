//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, margins, growth factors)
//! - Check that certificate sources name the files they need
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{CertificateSourceKind, GatewayConfig, RevocationMode};

/// Smallest safety margin a credential may be served with.
pub const MIN_SAFETY_MARGIN_SECS: u64 = 30;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            "must be a socket address such as 0.0.0.0:8080",
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be positive"));
    }

    check_url(&mut errors, "upstream.base_url", &config.upstream.base_url);
    check_url(&mut errors, "upstream.test_base_url", &config.upstream.test_base_url);
    check_url(&mut errors, "oauth.token_endpoint", &config.oauth.token_endpoint);
    check_url(&mut errors, "oauth.test_token_endpoint", &config.oauth.test_token_endpoint);
    if config.upstream.attempt_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.attempt_timeout_secs", "must be positive"));
    }

    if config.oauth.safety_margin_secs < MIN_SAFETY_MARGIN_SECS {
        errors.push(ValidationError::new(
            "oauth.safety_margin_secs",
            format!("must be at least {} seconds", MIN_SAFETY_MARGIN_SECS),
        ));
    }
    if config.oauth.default_ttl_secs <= config.oauth.safety_margin_secs {
        errors.push(ValidationError::new(
            "oauth.default_ttl_secs",
            "must be larger than oauth.safety_margin_secs",
        ));
    }

    let cert = &config.outbound_certificate;
    match cert.source {
        CertificateSourceKind::None => {}
        CertificateSourceKind::File => {
            if cert.path.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError::new(
                    "outbound_certificate.path",
                    "required when source = \"file\"",
                ));
            }
        }
        CertificateSourceKind::Store => {
            if cert.store_dir.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError::new(
                    "outbound_certificate.store_dir",
                    "required when source = \"store\"",
                ));
            }
            if cert.thumbprint.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError::new(
                    "outbound_certificate.thumbprint",
                    "required when source = \"store\"",
                ));
            }
        }
    }

    let auth = &config.client_auth;
    if auth.revocation == RevocationMode::Crl && auth.crl_paths.is_empty() {
        errors.push(ValidationError::new(
            "client_auth.crl_paths",
            "at least one CRL is required when revocation = \"crl\"",
        ));
    }
    if auth.required && config.listener.tls.is_none() {
        errors.push(ValidationError::new(
            "client_auth.required",
            "client certificates require listener.tls",
        ));
    }

    if config.retries.backoff_base == 0 {
        errors.push(ValidationError::new("retries.backoff_base", "must be at least 1"));
    }
    if config.retries.backoff_unit_ms == 0 {
        errors.push(ValidationError::new("retries.backoff_unit_ms", "must be positive"));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be positive"));
    }
    if breaker.window_secs == 0 {
        errors.push(ValidationError::new("circuit_breaker.window_secs", "must be positive"));
    }
    if breaker.cooldown_secs == 0 {
        errors.push(ValidationError::new("circuit_breaker.cooldown_secs", "must be positive"));
    }
    if !(breaker.cooldown_growth >= 1.0) {
        errors.push(ValidationError::new("circuit_breaker.cooldown_growth", "must be at least 1.0"));
    }
    if breaker.max_cooldown_secs < breaker.cooldown_secs {
        errors.push(ValidationError::new(
            "circuit_breaker.max_cooldown_secs",
            "must not be smaller than cooldown_secs",
        ));
    }

    if config.rate_limit.enabled {
        if config.rate_limit.max_requests == 0 {
            errors.push(ValidationError::new("rate_limit.max_requests", "must be positive"));
        }
        if config.rate_limit.window_secs == 0 {
            errors.push(ValidationError::new("rate_limit.window_secs", "must be positive"));
        }
    }

    if config.health.enabled && (config.health.interval_secs == 0 || config.health.timeout_secs == 0) {
        errors.push(ValidationError::new("health", "interval_secs and timeout_secs must be positive"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "must be a socket address"));
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() || config.admin.api_key == "change-me" {
            errors.push(ValidationError::new("admin.api_key", "set a real key before enabling admin"));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new("admin.bind_address", "must be a socket address"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    match url::Url::parse(value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(_) => errors.push(ValidationError::new(field, "must be an http(s) URL")),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {}", e))),
    }
}
