//! X.509 parsing for trust decisions.

use chrono::{DateTime, TimeZone, Utc};
use rustls::pki_types::CertificateDer;
use sha1::{Digest, Sha1};

use crate::transport::TrustError;

/// Uppercase hex SHA-1 of the DER encoding.
pub fn thumbprint(der: &[u8]) -> String {
    hex::encode_upper(Sha1::digest(der))
}

/// Compare thumbprints ignoring case, spaces and colons.
pub fn thumbprints_match(a: &str, b: &str) -> bool {
    let normalize = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .map(|c| c.to_ascii_uppercase())
            .collect()
    };
    let (a, b) = (normalize(a), normalize(b));
    !a.is_empty() && a == b
}

/// The fields of a certificate that trust checks look at.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    /// Serial number as uppercase hex.
    pub serial_number: String,
    pub thumbprint: String,
    pub not_before: i64,
    pub not_after: i64,
    /// Issuer and subject names are byte-identical.
    pub self_issued: bool,
}

impl CertificateInfo {
    pub fn parse(der: &CertificateDer<'_>) -> Result<Self, TrustError> {
        let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
            .map_err(|e| TrustError::Malformed(e.to_string()))?;

        let validity = cert.validity();
        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial_number: hex::encode_upper(cert.raw_serial()),
            thumbprint: thumbprint(der.as_ref()),
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
            self_issued: cert.subject().as_raw() == cert.issuer().as_raw(),
        })
    }

    pub fn not_after_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.not_after, 0).single()
    }

    /// Check the validity window against `now` (unix seconds).
    pub fn check_validity(&self, now: i64) -> Result<(), TrustError> {
        if now < self.not_before {
            return Err(TrustError::NotYetValid);
        }
        if now > self.not_after {
            return Err(TrustError::Expired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbprint_matching() {
        assert!(thumbprints_match("ab:cd:ef 01", "ABCDEF01"));
        assert!(!thumbprints_match("ABCDEF01", "ABCDEF02"));
        assert!(!thumbprints_match("", ""));
    }

    #[test]
    fn test_parse_generated_certificate() {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["client.example".to_string()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "Test Client");
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(2040, 1, 1);
        let cert = params.self_signed(&key).unwrap();

        let info = CertificateInfo::parse(cert.der()).unwrap();
        assert!(info.subject.contains("Test Client"));
        assert!(info.self_issued);
        assert_eq!(info.thumbprint, thumbprint(cert.der()));
        assert_eq!(info.thumbprint.len(), 40);
        assert!(info.check_validity(Utc::now().timestamp()).is_ok());
        assert_eq!(info.check_validity(0), Err(TrustError::NotYetValid));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let der = CertificateDer::from(vec![0x30, 0x03, 0x01, 0x01, 0xff]);
        assert!(matches!(CertificateInfo::parse(&der), Err(TrustError::Malformed(_))));
    }
}
