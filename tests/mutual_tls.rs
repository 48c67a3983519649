//! Client certificate authentication over a real TLS listener.

mod common;

use std::path::Path;

use common::*;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose};
use tempfile::TempDir;
use vat_gateway::audit::{AuditEventKind, AuditResult};
use vat_gateway::config::TlsConfig;
use vat_gateway::GatewayConfig;

struct Pki {
    dir: TempDir,
    client_cert: String,
    client_key: String,
}

impl Pki {
    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    fn client(&self) -> reqwest::Client {
        let identity = reqwest::Identity::from_pkcs8_pem(self.client_cert.as_bytes(), self.client_key.as_bytes()).unwrap();
        reqwest::Client::builder()
            .identity(identity)
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap()
    }
}

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

/// Server certificate, a client CA and one client certificate it issued.
fn pki() -> Pki {
    let dir = TempDir::new().unwrap();

    let server_key = KeyPair::generate().unwrap();
    let server = CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
        .unwrap()
        .self_signed(&server_key)
        .unwrap();
    write(dir.path(), "server.pem", &server.pem());
    write(dir.path(), "server.key", &server_key.serialize_pem());

    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.distinguished_name.push(DnType::CommonName, "Gateway Test CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::DigitalSignature];
    let ca = ca_params.self_signed(&ca_key).unwrap();
    write(dir.path(), "ca.pem", &ca.pem());

    let client_key = KeyPair::generate().unwrap();
    let mut client_params = CertificateParams::new(vec!["client.example".to_string()]).unwrap();
    client_params.distinguished_name.push(DnType::CommonName, "gateway-client");
    let client = client_params.signed_by(&client_key, &ca, &ca_key).unwrap();

    Pki {
        dir,
        client_cert: client.pem(),
        client_key: client_key.serialize_pem(),
    }
}

fn tls_config(upstream: std::net::SocketAddr, pki: &Pki) -> GatewayConfig {
    let mut config = gateway_config(upstream);
    config.listener.tls = Some(TlsConfig {
        cert_path: pki.path("server.pem"),
        key_path: pki.path("server.key"),
    });
    config.client_auth.required = true;
    config.client_auth.trust_anchors = vec![pki.path("ca.pem")];
    config
}

fn https(gateway: &TestGateway, path: &str) -> String {
    format!("https://{}{}", gateway.addr, path)
}

#[tokio::test]
async fn test_trusted_client_certificate_becomes_actor() {
    let (upstream, mock) = start_mock_upstream().await;
    let pki = pki();
    let gateway = start_tls_gateway(tls_config(upstream, &pki)).await;

    let res = pki.client().get(https(&gateway, DECLARATION_PATH)).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(mock.api_calls(), 1);

    let auth = gateway.audit.of_kind(AuditEventKind::Authentication);
    assert_eq!(auth.len(), 1);
    assert_eq!(auth[0].result, AuditResult::Success);
    assert!(auth[0].actor.contains("gateway-client"));

    let calls = gateway.audit.of_kind(AuditEventKind::ApiCall);
    assert!(calls.iter().any(|e| e.actor.contains("gateway-client")));
}

#[tokio::test]
async fn test_missing_client_certificate_is_rejected_when_required() {
    let (upstream, mock) = start_mock_upstream().await;
    let pki = pki();
    let gateway = start_tls_gateway(tls_config(upstream, &pki)).await;

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap();
    let res = client.get(https(&gateway, DECLARATION_PATH)).send().await.unwrap();

    assert_eq!(res.status(), 401);
    assert_eq!(mock.api_calls(), 0);
}

#[tokio::test]
async fn test_untrusted_client_certificate_is_rejected() {
    let (upstream, mock) = start_mock_upstream().await;
    let pki = pki();
    let mut config = tls_config(upstream, &pki);
    let other_ca = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, "Other CA");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let other = params.self_signed(&other_ca).unwrap();
    write(pki.dir.path(), "other.pem", &other.pem());
    config.client_auth.trust_anchors = vec![pki.path("other.pem")];
    let gateway = start_tls_gateway(config).await;

    let res = pki.client().get(https(&gateway, DECLARATION_PATH)).send().await.unwrap();

    assert_eq!(res.status(), 401);
    assert_eq!(mock.api_calls(), 0);
    let auth = gateway.audit.of_kind(AuditEventKind::Authentication);
    assert_eq!(auth.len(), 1);
    assert_eq!(auth[0].result, AuditResult::Failure);
}

#[tokio::test]
async fn test_exempt_path_skips_certificate_authentication() {
    let (upstream, _mock) = start_mock_upstream().await;
    let pki = pki();
    let gateway = start_tls_gateway(tls_config(upstream, &pki)).await;

    let res = pki.client().get(https(&gateway, "/ping")).send().await.unwrap();

    assert_eq!(res.status(), 200);
    assert!(gateway.audit.of_kind(AuditEventKind::Authentication).is_empty());
}
