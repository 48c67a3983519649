//! Inbound peer certificate authentication.
//!
//! Checks run in a fixed order and the first failure wins:
//! presence, validity window, thumbprint pin, issuer constraint, chain.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, UnixTime};
use rustls::server::danger::ClientCertVerifier;
use rustls::server::{VerifierBuilderError, WebPkiClientVerifier};
use rustls::{CertificateError, RootCertStore};
use serde::Serialize;

use crate::config::{ClientAuthConfig, RevocationMode};
use crate::transport::certificate::{thumbprints_match, CertificateInfo};
use crate::transport::{IdentityError, TrustError};

/// A defect reported while building a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    /// The chain ends in a self-issued certificate that is not a trust anchor.
    UntrustedRoot,
    /// No issuer could be found for some certificate in the chain.
    PartialChain,
    Revoked,
    RevocationStatusUnknown,
    NotTimeValid,
    Other(String),
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStatus::UntrustedRoot => write!(f, "untrusted root"),
            ChainStatus::PartialChain => write!(f, "partial chain"),
            ChainStatus::Revoked => write!(f, "revoked"),
            ChainStatus::RevocationStatusUnknown => write!(f, "revocation status unknown"),
            ChainStatus::NotTimeValid => write!(f, "not time valid"),
            ChainStatus::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Builds and checks a chain for an end-entity certificate.
pub trait ChainVerifier: Send + Sync {
    /// `Ok` when the chain is trusted, otherwise every defect found.
    fn verify(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), Vec<ChainStatus>>;
}

/// Chain verification with webpki against configured trust anchors.
pub struct WebPkiChainVerifier {
    verifier: Option<Arc<dyn ClientCertVerifier>>,
    revocation: RevocationMode,
    crls: Vec<CertificateRevocationListDer<'static>>,
    allow_unknown_revocation_status: bool,
}

impl WebPkiChainVerifier {
    pub fn new(
        anchors: Vec<CertificateDer<'static>>,
        revocation: RevocationMode,
        crls: Vec<CertificateRevocationListDer<'static>>,
        allow_unknown_revocation_status: bool,
    ) -> Result<Self, IdentityError> {
        let mut this = Self {
            verifier: None,
            revocation,
            crls,
            allow_unknown_revocation_status,
        };
        if anchors.is_empty() {
            return Ok(this);
        }

        let mut roots = RootCertStore::empty();
        for anchor in anchors {
            roots
                .add(anchor)
                .map_err(|e| IdentityError::InvalidTrustAnchor(e.to_string()))?;
        }
        this.verifier = Some(
            this.build(roots)
                .map_err(|e| IdentityError::InvalidTrustAnchor(e.to_string()))?,
        );
        Ok(this)
    }

    fn build(&self, roots: RootCertStore) -> Result<Arc<dyn ClientCertVerifier>, VerifierBuilderError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut builder = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
        if self.revocation == RevocationMode::Crl {
            builder = builder.with_crls(self.crls.clone());
            if self.allow_unknown_revocation_status {
                builder = builder.allow_unknown_revocation_status();
            }
        }
        builder.build()
    }

    /// Statuses for a chain that found no configured anchor.
    ///
    /// The top of the presented chain only counts as an untrusted root when
    /// it is self-issued and the rest of the chain actually verifies up to
    /// it. Anything else is a partial chain.
    fn untrusted_root_statuses(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Vec<ChainStatus> {
        let (top, path) = match intermediates.split_last() {
            Some((top, rest)) => (top, rest),
            None => (end_entity, &[][..]),
        };
        if !CertificateInfo::parse(top).map(|info| info.self_issued).unwrap_or(false) {
            return vec![ChainStatus::PartialChain];
        }

        let mut roots = RootCertStore::empty();
        if roots.add(top.clone().into_owned()).is_err() {
            return vec![ChainStatus::PartialChain];
        }
        let Ok(verifier) = self.build(roots) else {
            return vec![ChainStatus::PartialChain];
        };

        match verifier.verify_client_cert(end_entity, path, now) {
            Ok(_) => vec![ChainStatus::UntrustedRoot],
            Err(err) => match chain_status(err) {
                ChainStatus::PartialChain | ChainStatus::Other(_) => vec![ChainStatus::PartialChain],
                status => vec![ChainStatus::UntrustedRoot, status],
            },
        }
    }
}

fn chain_status(err: rustls::Error) -> ChainStatus {
    match err {
        rustls::Error::InvalidCertificate(err) => match err {
            CertificateError::UnknownIssuer => ChainStatus::PartialChain,
            CertificateError::Revoked => ChainStatus::Revoked,
            CertificateError::UnknownRevocationStatus => ChainStatus::RevocationStatusUnknown,
            CertificateError::Expired | CertificateError::NotValidYet => ChainStatus::NotTimeValid,
            other => ChainStatus::Other(format!("{:?}", other)),
        },
        other => ChainStatus::Other(other.to_string()),
    }
}

impl ChainVerifier for WebPkiChainVerifier {
    fn verify(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), Vec<ChainStatus>> {
        let Some(verifier) = &self.verifier else {
            return Err(self.untrusted_root_statuses(end_entity, intermediates, now));
        };

        match verifier.verify_client_cert(end_entity, intermediates, now) {
            Ok(_) => Ok(()),
            Err(err) => match chain_status(err) {
                ChainStatus::PartialChain => Err(self.untrusted_root_statuses(end_entity, intermediates, now)),
                status => Err(vec![status]),
            },
        }
    }
}

/// Identity derived from an accepted client certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// Subject distinguished name.
    pub name: String,
    pub thumbprint: String,
    pub serial_number: String,
    pub issuer: String,
    pub authentication_method: &'static str,
}

/// Applies the inbound certificate policy.
pub struct PeerAuthenticator {
    required_thumbprint: Option<String>,
    required_issuer: Option<String>,
    allow_self_signed: bool,
    chain: Arc<dyn ChainVerifier>,
}

impl PeerAuthenticator {
    pub fn new(config: &ClientAuthConfig, chain: Arc<dyn ChainVerifier>) -> Self {
        Self {
            required_thumbprint: config.required_thumbprint.clone().filter(|t| !t.trim().is_empty()),
            required_issuer: config.required_issuer.clone().filter(|i| !i.trim().is_empty()),
            allow_self_signed: config.allow_self_signed,
            chain,
        }
    }

    /// Authenticate a presented chain (end-entity first, empty when absent).
    pub fn authenticate(&self, chain: &[CertificateDer<'_>]) -> Result<Principal, TrustError> {
        self.authenticate_at(chain, Utc::now())
    }

    pub fn authenticate_at(
        &self,
        chain: &[CertificateDer<'_>],
        now: DateTime<Utc>,
    ) -> Result<Principal, TrustError> {
        let Some((end_entity, intermediates)) = chain.split_first() else {
            return Err(TrustError::Missing);
        };

        let info = CertificateInfo::parse(end_entity)?;
        info.check_validity(now.timestamp())?;

        if let Some(expected) = &self.required_thumbprint {
            if !thumbprints_match(expected, &info.thumbprint) {
                return Err(TrustError::ThumbprintMismatch);
            }
        }

        if let Some(required) = &self.required_issuer {
            if !info.issuer.to_lowercase().contains(&required.to_lowercase()) {
                return Err(TrustError::IssuerMismatch);
            }
        }

        let unix_now = UnixTime::since_unix_epoch(Duration::from_secs(now.timestamp().max(0) as u64));
        if let Err(statuses) = self.chain.verify(end_entity, intermediates, unix_now) {
            let only_untrusted_root = statuses.len() == 1 && statuses[0] == ChainStatus::UntrustedRoot;
            if !(self.allow_self_signed && only_untrusted_root) {
                return Err(TrustError::ChainRejected(statuses));
            }
            tracing::debug!(thumbprint = %info.thumbprint, "Accepting self-signed client certificate");
        }

        Ok(Principal {
            name: info.subject,
            thumbprint: info.thumbprint,
            serial_number: info.serial_number,
            issuer: info.issuer,
            authentication_method: "certificate",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{
        BasicConstraints, CertificateParams, CertificateRevocationListParams, DnType, IsCa, KeyIdMethod,
        KeyPair, KeyUsagePurpose, RevocationReason, RevokedCertParams, SerialNumber,
    };

    struct Ca {
        cert: rcgen::Certificate,
        key: KeyPair,
    }

    fn ca(name: &str) -> Ca {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(2045, 1, 1);
        let cert = params.self_signed(&key).unwrap();
        Ca { cert, key }
    }

    fn leaf_params(cn: &str, not_after_year: i32) -> CertificateParams {
        let mut params = CertificateParams::new(vec!["client.example".to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(not_after_year, 1, 1);
        params
    }

    fn issued_by(ca: &Ca, cn: &str) -> CertificateDer<'static> {
        let key = KeyPair::generate().unwrap();
        leaf_params(cn, 2040)
            .signed_by(&key, &ca.cert, &ca.key)
            .unwrap()
            .der()
            .clone()
    }

    fn issued_with_serial(ca: &Ca, cn: &str, serial: u64) -> CertificateDer<'static> {
        let key = KeyPair::generate().unwrap();
        let mut params = leaf_params(cn, 2040);
        params.serial_number = Some(SerialNumber::from(serial));
        params.signed_by(&key, &ca.cert, &ca.key).unwrap().der().clone()
    }

    fn crl_revoking(ca: &Ca, serial: u64) -> CertificateRevocationListDer<'static> {
        CertificateRevocationListParams {
            this_update: rcgen::date_time_ymd(2024, 1, 1),
            next_update: rcgen::date_time_ymd(2045, 1, 1),
            crl_number: SerialNumber::from(1u64),
            issuing_distribution_point: None,
            revoked_certs: vec![RevokedCertParams {
                serial_number: SerialNumber::from(serial),
                revocation_time: rcgen::date_time_ymd(2024, 1, 1),
                reason_code: Some(RevocationReason::KeyCompromise),
                invalidity_date: None,
            }],
            key_identifier_method: KeyIdMethod::Sha256,
        }
        .signed_by(&ca.cert, &ca.key)
        .unwrap()
        .der()
        .clone()
    }

    fn self_signed(cn: &str, not_after_year: i32) -> CertificateDer<'static> {
        let key = KeyPair::generate().unwrap();
        leaf_params(cn, not_after_year).self_signed(&key).unwrap().der().clone()
    }

    fn authenticator(config: ClientAuthConfig, anchors: Vec<CertificateDer<'static>>) -> PeerAuthenticator {
        let chain = WebPkiChainVerifier::new(anchors, RevocationMode::NoCheck, Vec::new(), false).unwrap();
        PeerAuthenticator::new(&config, Arc::new(chain))
    }

    #[test]
    fn test_missing_certificate() {
        let auth = authenticator(ClientAuthConfig::default(), Vec::new());
        assert_eq!(auth.authenticate(&[]), Err(TrustError::Missing));
    }

    #[test]
    fn test_chain_to_trusted_anchor_is_accepted() {
        let root = ca("Gateway Test CA");
        let leaf = issued_by(&root, "Accounting System");
        let auth = authenticator(ClientAuthConfig::default(), vec![root.cert.der().clone()]);

        let principal = auth.authenticate(&[leaf.clone()]).unwrap();
        assert!(principal.name.contains("Accounting System"));
        assert!(principal.issuer.contains("Gateway Test CA"));
        assert_eq!(principal.authentication_method, "certificate");
        assert_eq!(principal.thumbprint, crate::transport::certificate::thumbprint(&leaf));
    }

    #[test]
    fn test_expired_certificate_always_rejected() {
        let expired = self_signed("Old Client", 2021);
        let config = ClientAuthConfig {
            allow_self_signed: true,
            ..ClientAuthConfig::default()
        };
        let auth = authenticator(config, vec![expired.clone()]);

        assert_eq!(auth.authenticate(&[expired]), Err(TrustError::Expired));
    }

    #[test]
    fn test_thumbprint_pin() {
        let root = ca("Pin CA");
        let leaf = issued_by(&root, "Pinned");
        let other = issued_by(&root, "Other");
        let config = ClientAuthConfig {
            required_thumbprint: Some(crate::transport::certificate::thumbprint(&leaf).to_lowercase()),
            ..ClientAuthConfig::default()
        };
        let auth = authenticator(config, vec![root.cert.der().clone()]);

        assert!(auth.authenticate(&[leaf]).is_ok());
        assert_eq!(auth.authenticate(&[other]), Err(TrustError::ThumbprintMismatch));
    }

    #[test]
    fn test_issuer_constraint_is_case_insensitive_substring() {
        let root = ca("Skatteverket Test CA");
        let leaf = issued_by(&root, "Client");
        let matching = ClientAuthConfig {
            required_issuer: Some("skatteverket".into()),
            ..ClientAuthConfig::default()
        };
        let other = ClientAuthConfig {
            required_issuer: Some("Some Other CA".into()),
            ..ClientAuthConfig::default()
        };

        let anchors = vec![root.cert.der().clone()];
        assert!(authenticator(matching, anchors.clone()).authenticate(&[leaf.clone()]).is_ok());
        assert_eq!(
            authenticator(other, anchors).authenticate(&[leaf]),
            Err(TrustError::IssuerMismatch)
        );
    }

    #[test]
    fn test_self_signed_requires_flag() {
        let cert = self_signed("Dev Client", 2040);

        let strict = authenticator(ClientAuthConfig::default(), Vec::new());
        assert_eq!(
            strict.authenticate(&[cert.clone()]),
            Err(TrustError::ChainRejected(vec![ChainStatus::UntrustedRoot]))
        );

        let relaxed = authenticator(
            ClientAuthConfig {
                allow_self_signed: true,
                ..ClientAuthConfig::default()
            },
            Vec::new(),
        );
        assert!(relaxed.authenticate(&[cert]).is_ok());
    }

    #[test]
    fn test_unknown_intermediate_is_not_treated_as_self_signed() {
        let unknown_ca = ca("Unknown CA");
        let leaf = issued_by(&unknown_ca, "Client");
        let trusted = ca("Trusted CA");
        let auth = authenticator(
            ClientAuthConfig {
                allow_self_signed: true,
                ..ClientAuthConfig::default()
            },
            vec![trusted.cert.der().clone()],
        );

        assert_eq!(
            auth.authenticate(&[leaf]),
            Err(TrustError::ChainRejected(vec![ChainStatus::PartialChain]))
        );
    }

    #[test]
    fn test_unrelated_self_signed_tail_does_not_make_untrusted_root() {
        let foreign = ca("Foreign CA");
        let leaf = issued_by(&foreign, "Intruder");
        let unrelated = self_signed("Unrelated", 2040);
        let trusted = ca("Trusted CA");
        let auth = authenticator(
            ClientAuthConfig {
                allow_self_signed: true,
                ..ClientAuthConfig::default()
            },
            vec![trusted.cert.der().clone()],
        );

        assert_eq!(
            auth.authenticate(&[leaf.clone(), unrelated]),
            Err(TrustError::ChainRejected(vec![ChainStatus::PartialChain]))
        );
        assert_eq!(
            auth.authenticate(&[leaf]),
            Err(TrustError::ChainRejected(vec![ChainStatus::PartialChain]))
        );
    }

    #[test]
    fn test_presented_self_signed_root_that_issued_leaf_is_untrusted_root() {
        let private_root = ca("Private Root");
        let leaf = issued_by(&private_root, "Client");
        let chain = [leaf, private_root.cert.der().clone()];

        let strict = authenticator(ClientAuthConfig::default(), Vec::new());
        assert_eq!(
            strict.authenticate(&chain),
            Err(TrustError::ChainRejected(vec![ChainStatus::UntrustedRoot]))
        );

        let relaxed = authenticator(
            ClientAuthConfig {
                allow_self_signed: true,
                ..ClientAuthConfig::default()
            },
            Vec::new(),
        );
        assert!(relaxed.authenticate(&chain).is_ok());
    }

    #[test]
    fn test_revoked_leaf_rejected_with_crl() {
        let root = ca("Revoking CA");
        let revoked = issued_with_serial(&root, "Revoked Client", 4242);
        let good = issued_with_serial(&root, "Good Client", 7);
        let chain = WebPkiChainVerifier::new(
            vec![root.cert.der().clone()],
            RevocationMode::Crl,
            vec![crl_revoking(&root, 4242)],
            false,
        )
        .unwrap();
        let auth = PeerAuthenticator::new(&ClientAuthConfig::default(), Arc::new(chain));

        assert_eq!(
            auth.authenticate(&[revoked]),
            Err(TrustError::ChainRejected(vec![ChainStatus::Revoked]))
        );
        assert!(auth.authenticate(&[good]).is_ok());
    }

    #[test]
    fn test_crl_mode_without_matching_crl_is_unknown_status() {
        let root = ca("Silent CA");
        let other = ca("Other CA");
        let leaf = issued_with_serial(&root, "Client", 9);
        let chain = WebPkiChainVerifier::new(
            vec![root.cert.der().clone()],
            RevocationMode::Crl,
            vec![crl_revoking(&other, 1)],
            false,
        )
        .unwrap();
        let auth = PeerAuthenticator::new(&ClientAuthConfig::default(), Arc::new(chain));

        assert_eq!(
            auth.authenticate(&[leaf]),
            Err(TrustError::ChainRejected(vec![ChainStatus::RevocationStatusUnknown]))
        );
    }

    struct FixedStatuses(Vec<ChainStatus>);

    impl ChainVerifier for FixedStatuses {
        fn verify(&self, _: &CertificateDer<'_>, _: &[CertificateDer<'_>], _: UnixTime) -> Result<(), Vec<ChainStatus>> {
            if self.0.is_empty() {
                Ok(())
            } else {
                Err(self.0.clone())
            }
        }
    }

    #[test]
    fn test_self_signed_heuristic_needs_exactly_one_status() {
        let cert = self_signed("Dev Client", 2040);
        let config = ClientAuthConfig {
            allow_self_signed: true,
            ..ClientAuthConfig::default()
        };

        let two = PeerAuthenticator::new(
            &config,
            Arc::new(FixedStatuses(vec![ChainStatus::UntrustedRoot, ChainStatus::RevocationStatusUnknown])),
        );
        assert!(matches!(two.authenticate(&[cert.clone()]), Err(TrustError::ChainRejected(_))));

        let revoked = PeerAuthenticator::new(&config, Arc::new(FixedStatuses(vec![ChainStatus::Revoked])));
        assert!(matches!(revoked.authenticate(&[cert]), Err(TrustError::ChainRejected(_))));
    }
}
