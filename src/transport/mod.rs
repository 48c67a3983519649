//! Certificate-based transport trust.
//!
//! # Data Flow
//! ```text
//! Inbound TLS handshake (tls.rs, accepts any client chain)
//!     → middleware.rs (peer chain from the connection)
//!     → trust.rs (validity, thumbprint pin, issuer, chain, revocation)
//!     → Principal attached to the request, or a TrustError
//!
//! Startup
//!     → identity.rs (resolve outbound client certificate once)
//!     → TrustManager::configure_outbound_identity (HTTP client builder)
//! ```
//!
//! # Design Decisions
//! - The handshake never fails on client certificates; policy runs per request
//! - Upstream server certificates are always verified
//! - Outbound identity is immutable after startup

pub mod certificate;
pub mod identity;
pub mod middleware;
pub mod tls;
pub mod trust;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use thiserror::Error;

use crate::config::{ClientAuthConfig, GatewayConfig, RevocationMode};

pub use certificate::{thumbprint, thumbprints_match, CertificateInfo};
pub use identity::{CertificateSource, ClientCertificate, TransportIdentity};
pub use middleware::{PeerAuthentication, PeerCertificates};
pub use trust::{ChainStatus, ChainVerifier, PeerAuthenticator, Principal, WebPkiChainVerifier};

/// Why a presented client certificate was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrustError {
    #[error("no client certificate presented")]
    Missing,

    #[error("client certificate could not be parsed: {0}")]
    Malformed(String),

    #[error("client certificate is not yet valid")]
    NotYetValid,

    #[error("client certificate has expired")]
    Expired,

    #[error("client certificate thumbprint does not match")]
    ThumbprintMismatch,

    #[error("client certificate issuer is not accepted")]
    IssuerMismatch,

    #[error("certificate chain rejected: {}", format_statuses(.0))]
    ChainRejected(Vec<ChainStatus>),
}

fn format_statuses(statuses: &[ChainStatus]) -> String {
    statuses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure to load certificate material at startup.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("invalid PEM in {0}: {1}")]
    Pem(PathBuf, String),

    #[error("no private key found in {0}")]
    MissingKey(PathBuf),

    #[error("invalid client certificate: {0}")]
    InvalidClientCertificate(String),

    #[error("invalid trust anchor: {0}")]
    InvalidTrustAnchor(String),

    #[error("TLS configuration failed: {0}")]
    Tls(String),
}

/// Inbound authentication and outbound identity behind one handle.
pub struct TrustManager {
    authenticator: PeerAuthenticator,
    identity: TransportIdentity,
    client_auth_required: bool,
}

impl TrustManager {
    pub fn new(authenticator: PeerAuthenticator, identity: TransportIdentity, client_auth_required: bool) -> Self {
        Self {
            authenticator,
            identity,
            client_auth_required,
        }
    }

    /// Load anchors, CRLs and the outbound certificate from configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, IdentityError> {
        let authenticator = build_authenticator(&config.client_auth)?;
        let source = CertificateSource::from_config(&config.outbound_certificate);
        let identity = TransportIdentity::resolve(&source, &config.upstream.extra_root_certs)?;
        Ok(Self::new(authenticator, identity, config.client_auth.required))
    }

    pub fn authenticate(&self, chain: &[CertificateDer<'_>]) -> Result<Principal, TrustError> {
        self.authenticator.authenticate(chain)
    }

    pub fn client_auth_required(&self) -> bool {
        self.client_auth_required
    }

    pub fn identity(&self) -> &TransportIdentity {
        &self.identity
    }

    pub fn configure_outbound_identity(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        self.identity.configure_outbound(builder)
    }
}

fn build_authenticator(config: &ClientAuthConfig) -> Result<PeerAuthenticator, IdentityError> {
    let mut anchors = Vec::new();
    for path in &config.trust_anchors {
        anchors.extend(identity::load_certificates(Path::new(path))?);
    }

    let mut crls = Vec::new();
    if config.revocation == RevocationMode::Crl {
        for path in &config.crl_paths {
            crls.extend(identity::load_crls(Path::new(path))?);
        }
    }

    tracing::info!(
        anchors = anchors.len(),
        crls = crls.len(),
        revocation = ?config.revocation,
        required = config.required,
        "Client certificate policy loaded"
    );

    let verifier = WebPkiChainVerifier::new(
        anchors,
        config.revocation,
        crls,
        config.allow_unknown_revocation_status,
    )?;
    Ok(PeerAuthenticator::new(config, Arc::new(verifier)))
}
