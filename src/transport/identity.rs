//! Outbound client certificate and PEM loading.
//!
//! The certificate presented to the upstream API comes from one of two
//! sources, resolved once at startup into an immutable [`TransportIdentity`].

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer};
use secrecy::{ExposeSecret, SecretString};

use crate::config::{CertificateSourceConfig, CertificateSourceKind};
use crate::transport::certificate::{thumbprints_match, CertificateInfo};
use crate::transport::IdentityError;

/// Where the outbound client certificate is looked up.
pub enum CertificateSource {
    None,
    /// PKCS#12 archive protected by a passphrase.
    File { path: PathBuf, passphrase: SecretString },
    /// Directory of PEM bundles (certificate chain + PKCS#8 key),
    /// searched for a leaf with the given thumbprint.
    Store { dir: PathBuf, thumbprint: String },
}

impl CertificateSource {
    pub fn from_config(config: &CertificateSourceConfig) -> Self {
        match config.source {
            CertificateSourceKind::None => CertificateSource::None,
            CertificateSourceKind::File => CertificateSource::File {
                path: PathBuf::from(config.path.clone().unwrap_or_default()),
                passphrase: SecretString::from(config.passphrase.clone().unwrap_or_default()),
            },
            CertificateSourceKind::Store => CertificateSource::Store {
                dir: PathBuf::from(config.store_dir.clone().unwrap_or_default()),
                thumbprint: config.thumbprint.clone().unwrap_or_default(),
            },
        }
    }

    /// Locate the certificate. `Ok(None)` when the source finds nothing.
    pub fn resolve(&self) -> Result<Option<ClientCertificate>, IdentityError> {
        match self {
            CertificateSource::None => Ok(None),
            CertificateSource::File { path, passphrase } => resolve_file(path, passphrase),
            CertificateSource::Store { dir, thumbprint } => resolve_store(dir, thumbprint),
        }
    }
}

/// A resolved client certificate ready for the HTTP client.
pub struct ClientCertificate {
    identity: reqwest::Identity,
    pub description: String,
    pub thumbprint: Option<String>,
    pub not_after: Option<DateTime<Utc>>,
}

fn resolve_file(path: &Path, passphrase: &SecretString) -> Result<Option<ClientCertificate>, IdentityError> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "Client certificate file not found");
        return Ok(None);
    }
    let der = fs::read(path).map_err(|e| IdentityError::Io(path.to_path_buf(), e))?;
    let identity = reqwest::Identity::from_pkcs12_der(&der, passphrase.expose_secret())
        .map_err(|e| IdentityError::InvalidClientCertificate(format!("{}: {}", path.display(), e)))?;

    Ok(Some(ClientCertificate {
        identity,
        description: format!("file {}", path.display()),
        thumbprint: None,
        not_after: None,
    }))
}

fn resolve_store(dir: &Path, wanted: &str) -> Result<Option<ClientCertificate>, IdentityError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Certificate store unreadable");
            return Ok(None);
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "pem"))
        .collect();
    paths.sort();

    for path in paths {
        let text = fs::read_to_string(&path).map_err(|e| IdentityError::Io(path.clone(), e))?;
        let certs = parse_certificates(text.as_bytes())
            .map_err(|e| IdentityError::Pem(path.clone(), e.to_string()))?;
        let Some(leaf) = certs.first() else {
            continue;
        };
        let info = match CertificateInfo::parse(leaf) {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping unparsable certificate");
                continue;
            }
        };
        if !thumbprints_match(wanted, &info.thumbprint) {
            continue;
        }

        let cert_pem = pem_blocks(&text, "CERTIFICATE").concat();
        let key_pem = pem_blocks(&text, "PRIVATE KEY").concat();
        if key_pem.is_empty() {
            return Err(IdentityError::InvalidClientCertificate(format!(
                "{} has no PKCS#8 private key",
                path.display()
            )));
        }
        let identity = reqwest::Identity::from_pkcs8_pem(cert_pem.as_bytes(), key_pem.as_bytes())
            .map_err(|e| IdentityError::InvalidClientCertificate(format!("{}: {}", path.display(), e)))?;

        return Ok(Some(ClientCertificate {
            identity,
            description: format!("store {} ({})", path.display(), info.subject),
            thumbprint: Some(info.thumbprint.clone()),
            not_after: info.not_after_utc(),
        }));
    }

    tracing::warn!(dir = %dir.display(), thumbprint = %wanted, "No certificate with matching thumbprint in store");
    Ok(None)
}

/// Full text of every PEM block with the given label.
fn pem_blocks<'a>(text: &'a str, label: &str) -> Vec<&'a str> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(&begin) {
        let Some(stop) = rest[start..].find(&end) else {
            break;
        };
        let stop = start + stop + end.len();
        blocks.push(&rest[start..stop]);
        rest = &rest[stop..];
    }
    blocks
}

/// Client certificate material and upstream trust, fixed at startup.
pub struct TransportIdentity {
    client_certificate: Option<ClientCertificate>,
    upstream_roots: Vec<reqwest::Certificate>,
}

impl TransportIdentity {
    /// Resolve the source and load extra upstream roots.
    ///
    /// A source that finds nothing is not an error: calls go out without a
    /// client certificate, and that is logged as a warning.
    pub fn resolve(source: &CertificateSource, extra_root_certs: &[String]) -> Result<Self, IdentityError> {
        let client_certificate = source.resolve()?;
        match &client_certificate {
            Some(cert) => tracing::info!(
                source = %cert.description,
                thumbprint = cert.thumbprint.as_deref().unwrap_or("-"),
                "Outbound client certificate loaded"
            ),
            None => tracing::warn!(
                "No outbound client certificate resolved; upstream calls proceed without one"
            ),
        }

        let mut upstream_roots = Vec::new();
        for path in extra_root_certs {
            let pem = fs::read(path).map_err(|e| IdentityError::Io(PathBuf::from(path), e))?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem)
                .map_err(|e| IdentityError::Pem(PathBuf::from(path), e.to_string()))?;
            upstream_roots.extend(certs);
        }

        Ok(Self {
            client_certificate,
            upstream_roots,
        })
    }

    pub fn client_certificate(&self) -> Option<&ClientCertificate> {
        self.client_certificate.as_ref()
    }

    /// Apply the identity to an HTTP client builder.
    pub fn configure_outbound(&self, mut builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        if let Some(cert) = &self.client_certificate {
            builder = builder.identity(cert.identity.clone());
        }
        for root in &self.upstream_roots {
            builder = builder.add_root_certificate(root.clone());
        }
        builder
    }
}

/// Read every certificate in a PEM file.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, IdentityError> {
    let data = fs::read(path).map_err(|e| IdentityError::Io(path.to_path_buf(), e))?;
    parse_certificates(&data).map_err(|e| IdentityError::Pem(path.to_path_buf(), e.to_string()))
}

fn parse_certificates(pem: &[u8]) -> std::io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut BufReader::new(pem)).collect()
}

/// Read CRLs from a PEM file, or a single DER-encoded CRL.
pub fn load_crls(path: &Path) -> Result<Vec<CertificateRevocationListDer<'static>>, IdentityError> {
    let data = fs::read(path).map_err(|e| IdentityError::Io(path.to_path_buf(), e))?;
    if data.starts_with(b"-----BEGIN") {
        rustls_pemfile::crls(&mut BufReader::new(data.as_slice()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| IdentityError::Pem(path.to_path_buf(), e.to_string()))
    } else {
        Ok(vec![CertificateRevocationListDer::from(data)])
    }
}
