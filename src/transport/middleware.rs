//! Per-request peer authentication.
//!
//! `authenticate_peer` runs early and only records what it found;
//! `require_authenticated` runs after rate limiting and audit capture and is
//! the one that turns a failure into a 401.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use rustls::pki_types::CertificateDer;

use crate::audit::{AuditEvent, AuditEventKind, AuditResult};
use crate::error::GatewayError;
use crate::http::correlation::CorrelationIdExt;
use crate::http::server::AppState;
use crate::security::path_is_exempt;
use crate::transport::{Principal, TrustError};

/// Chain presented on the TLS connection, end-entity first.
#[derive(Debug, Clone, Default)]
pub struct PeerCertificates(Arc<Vec<CertificateDer<'static>>>);

impl PeerCertificates {
    pub fn new(chain: Vec<CertificateDer<'static>>) -> Self {
        Self(Arc::new(chain))
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.0
    }
}

/// Outcome of peer authentication for one request.
#[derive(Debug, Clone)]
pub enum PeerAuthentication {
    Authenticated(Principal),
    Rejected(TrustError),
}

impl PeerAuthentication {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            PeerAuthentication::Authenticated(principal) => Some(principal),
            PeerAuthentication::Rejected(_) => None,
        }
    }
}

/// Authenticate the connection's certificate chain and attach the result.
///
/// Never rejects. A presented certificate produces an authentication audit
/// event either way. Audit-exempt paths are passed through untouched.
pub async fn authenticate_peer(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if path_is_exempt(request.uri().path(), &state.config.audit.exempt_paths) {
        return next.run(request).await;
    }

    let chain = request
        .extensions()
        .get::<PeerCertificates>()
        .cloned()
        .unwrap_or_default();

    let outcome = match state.trust.authenticate(chain.chain()) {
        Ok(principal) => PeerAuthentication::Authenticated(principal),
        Err(err) => PeerAuthentication::Rejected(err),
    };

    if !chain.chain().is_empty() {
        let correlation_id = request.correlation_id().map(|id| id.to_string()).unwrap_or_default();
        let address = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        let event = match &outcome {
            PeerAuthentication::Authenticated(principal) => {
                tracing::debug!(subject = %principal.name, thumbprint = %principal.thumbprint, "Client certificate accepted");
                AuditEvent::new(
                    AuditEventKind::Authentication,
                    correlation_id,
                    principal.name.clone(),
                    "CertificateAuthentication",
                    AuditResult::Success,
                )
                .with_detail(format!("thumbprint {}", principal.thumbprint))
            }
            PeerAuthentication::Rejected(err) => {
                tracing::warn!(error = %err, "Client certificate rejected");
                AuditEvent::new(
                    AuditEventKind::Authentication,
                    correlation_id,
                    "Anonymous",
                    "CertificateAuthentication",
                    AuditResult::Failure,
                )
                .with_detail(err.to_string())
            }
        };
        state.audit.record(
            event
                .with_request(request.method().as_str(), request.uri().path())
                .with_client_address(address),
        );
    }

    request.extensions_mut().insert(outcome);
    next.run(request).await
}

/// Reject requests whose peer failed authentication.
///
/// A presented but rejected certificate is always refused. A missing one is
/// refused only when client authentication is required.
pub async fn require_authenticated(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let failure = match request.extensions().get::<PeerAuthentication>() {
        Some(PeerAuthentication::Authenticated(_)) => None,
        Some(PeerAuthentication::Rejected(TrustError::Missing)) | None => {
            state.trust.client_auth_required().then_some(TrustError::Missing)
        }
        Some(PeerAuthentication::Rejected(err)) => Some(err.clone()),
    };

    match failure {
        None => next.run(request).await,
        Some(err) => {
            let correlation_id = request.correlation_id().map(|id| id.to_string());
            GatewayError::UntrustedPeer(err).to_response(request.uri().path(), correlation_id.as_deref())
        }
    }
}
