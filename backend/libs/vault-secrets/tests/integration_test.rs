//! Integration tests against a mocked Vault HTTP API
//!
//! These tests verify:
//! 1. KV v2 reads, typed decoding and caching
//! 2. Error mapping for missing/forbidden/invalid secrets
//! 3. PKI issuance through the certificate provisioner

use grpc_tls::{
    CertificateIdentity, CertificateProvisioner, DevelopmentPki, PkiBackend, PkiBackendError,
    ProvisionerConfig, TlsError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vault_secrets::{
    read_kv, ClientCredentialsSecret, JwtVerificationSecret, SecretError, VaultClient,
    VaultConfig, VaultPki,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET_PATH: &str = "hello-service/data/auth0";

fn client(server: &MockServer) -> VaultClient {
    VaultClient::new(
        VaultConfig::new(server.uri(), "root").request_timeout(Duration::from_secs(2)),
    )
    .unwrap()
}

fn kv_body(data: serde_json::Value) -> serde_json::Value {
    json!({
        "request_id": "7d3f5b2e",
        "data": {
            "data": data,
            "metadata": { "version": 1 }
        }
    })
}

#[tokio::test]
async fn test_read_typed_secret_and_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", SECRET_PATH)))
        .and(header("X-Vault-Token", "root"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kv_body(json!({
            "pem": "-----BEGIN PUBLIC KEY-----\n...\n-----END PUBLIC KEY-----\n",
            "id": "client-id",
            "secret": "client-secret",
            "domain": "https://tenant.example.com/oauth/token",
            "audience": "hello-service",
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);

    let key: JwtVerificationSecret = read_kv(&client, SECRET_PATH).await.unwrap();
    assert!(key.pem.starts_with("-----BEGIN PUBLIC KEY-----"));

    // Second read of the same path is served from cache
    let creds: ClientCredentialsSecret = read_kv(&client, SECRET_PATH).await.unwrap();
    assert_eq!(creds.id, "client-id");
    assert_eq!(creds.audience, "hello-service");
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", SECRET_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(kv_body(json!({ "pem": "k" }))))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    client.get_secret(SECRET_PATH).await.unwrap();
    client.invalidate_cache(SECRET_PATH).await;
    client.get_secret(SECRET_PATH).await.unwrap();
}

#[tokio::test]
async fn test_missing_field_is_invalid_format() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", SECRET_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(kv_body(json!({ "other": "x" }))))
        .mount(&server)
        .await;

    let result = read_kv::<JwtVerificationSecret, _>(&client(&server), SECRET_PATH).await;
    assert!(matches!(result, Err(SecretError::InvalidFormat(_))));
}

#[tokio::test]
async fn test_status_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/missing/data/x"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/forbidden/data/x"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({ "errors": ["permission denied"] })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/sealed/data/x"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({ "errors": ["Vault is sealed"] })),
        )
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(matches!(
        client.get_secret("missing/data/x").await,
        Err(SecretError::NotFound(_))
    ));
    assert!(matches!(
        client.get_secret("forbidden/data/x").await,
        Err(SecretError::AccessDenied(_))
    ));
    match client.get_secret("sealed/data/x").await {
        Err(SecretError::Http { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "Vault is sealed");
        }
        other => panic!("expected Http error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_unreachable_vault() {
    let client = VaultClient::new(
        VaultConfig::new("http://127.0.0.1:1", "root").request_timeout(Duration::from_secs(1)),
    )
    .unwrap();

    assert!(matches!(
        client.get_secret(SECRET_PATH).await,
        Err(SecretError::Unreachable(_))
    ));
}

#[tokio::test]
async fn test_pki_issue_feeds_the_provisioner() {
    let pki = DevelopmentPki::new().unwrap();
    let issued = pki
        .issue_for("grpc.example.com", &["localhost".to_string()], Duration::from_secs(3600))
        .unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/grpc/issue/hello-service"))
        .and(header("X-Vault-Token", "root"))
        .and(body_partial_json(json!({
            "common_name": "grpc.example.com",
            "alt_names": "localhost",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "certificate": issued.certificate,
                "private_key": issued.private_key,
                "private_key_type": "ec",
                "issuing_ca": issued.issuing_ca,
                "ca_chain": issued.ca_chain,
                "expiration": issued.expiration,
                "serial_number": issued.serial_number,
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = VaultPki::new(Arc::new(client(&server)), "grpc", "hello-service");
    let provisioner = CertificateProvisioner::new(Arc::new(backend), ProvisionerConfig::default());
    let identity = CertificateIdentity::new("grpc.example.com", vec!["localhost".to_string()]);

    let bundle = provisioner.issue(&identity).await.unwrap();
    assert!(bundle.not_after() > chrono::Utc::now());
    assert_eq!(bundle.trust_chain().len(), 2);

    // Same identity before the reuse threshold: no second Vault call
    let again = provisioner.issue(&identity).await.unwrap();
    assert!(Arc::ptr_eq(&bundle, &again));
}

#[tokio::test]
async fn test_pki_rejection_is_issuance_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/grpc/issue/hello-service"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": ["common name grpc.example.com not allowed by this role"]
        })))
        .mount(&server)
        .await;

    let backend = VaultPki::new(Arc::new(client(&server)), "grpc", "hello-service");
    let request = grpc_tls::IssueRequest {
        common_name: "grpc.example.com".to_string(),
        alt_names: "localhost".to_string(),
        ttl: None,
    };
    assert!(matches!(
        backend.issue(&request).await,
        Err(PkiBackendError::Rejected { status: 400, .. })
    ));

    let provisioner = CertificateProvisioner::new(Arc::new(backend), ProvisionerConfig::default());
    let identity = CertificateIdentity::new("grpc.example.com", vec!["localhost".to_string()]);
    assert!(matches!(
        provisioner.issue(&identity).await,
        Err(TlsError::IssuanceFailed { .. })
    ));
}

#[tokio::test]
async fn test_pki_garbage_is_parse_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/grpc/issue/hello-service"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "certificate": 12 }
        })))
        .mount(&server)
        .await;

    let backend = VaultPki::new(Arc::new(client(&server)), "grpc", "hello-service");
    let provisioner = CertificateProvisioner::new(Arc::new(backend), ProvisionerConfig::default());
    let identity = CertificateIdentity::new("grpc.example.com", vec!["localhost".to_string()]);

    assert!(matches!(
        provisioner.issue(&identity).await,
        Err(TlsError::ParseFailed { .. })
    ));
}
