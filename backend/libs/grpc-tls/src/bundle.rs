//! Issued certificate material and the transport configuration derived from it
//!
//! A [`CredentialBundle`] is immutable once built. Renewal produces a new bundle;
//! the old one is dropped when the last listener snapshot referencing it goes away.

use crate::error::{TlsError, TlsResult};
use chrono::{DateTime, Utc};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, SupportedProtocolVersion};
use std::fmt;
use std::io::BufReader;
use std::sync::Arc;
use tonic::transport::{Certificate, ClientTlsConfig, Identity};
use tracing::{debug, info};
use x509_parser::prelude::*;

/// Lowest TLS protocol version the listener negotiates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinTlsVersion {
    #[default]
    Tls12,
    Tls13,
}

impl MinTlsVersion {
    fn protocol_versions(self) -> &'static [&'static SupportedProtocolVersion] {
        static TLS12_AND_UP: &[&SupportedProtocolVersion] =
            &[&rustls::version::TLS13, &rustls::version::TLS12];
        static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

        match self {
            MinTlsVersion::Tls12 => TLS12_AND_UP,
            MinTlsVersion::Tls13 => TLS13_ONLY,
        }
    }
}

impl std::str::FromStr for MinTlsVersion {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.2" | "tls1.2" | "TLS1.2" => Ok(MinTlsVersion::Tls12),
            "1.3" | "tls1.3" | "TLS1.3" => Ok(MinTlsVersion::Tls13),
            other => Err(TlsError::Tls(format!(
                "unsupported minimum TLS version '{}' (expected 1.2 or 1.3)",
                other
            ))),
        }
    }
}

/// Transport knobs applied on top of a bundle.
///
/// Client authentication is not a knob: every server config built from a
/// bundle requires and verifies a client certificate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportSettings {
    pub min_tls_version: MinTlsVersion,
}

/// Leaf certificate, private key and trust chain issued by the PKI backend
pub struct CredentialBundle {
    leaf_certificate: CertificateDer<'static>,
    private_key: PrivateKeyDer<'static>,
    /// Leaf first, then intermediates, root last
    trust_chain: Vec<CertificateDer<'static>>,
    not_after: DateTime<Utc>,
    serial_number: Option<String>,
}

impl CredentialBundle {
    /// Parse PEM material into a bundle.
    ///
    /// `certificate_pem` holds the leaf (optionally followed by more certs);
    /// `ca_chain_pem` holds CA certificates in any order. The resulting trust
    /// chain is re-ordered leaf, intermediates, root by following issuer links.
    pub fn from_pem(
        certificate_pem: &str,
        private_key_pem: &str,
        ca_chain_pem: &[String],
    ) -> TlsResult<Self> {
        let mut leaf_and_extras = parse_certificates(certificate_pem)?;
        if leaf_and_extras.is_empty() {
            return Err(TlsError::parse("no certificate in issued material"));
        }
        let leaf_certificate = leaf_and_extras.remove(0);

        let private_key = rustls_pemfile::private_key(&mut BufReader::new(
            private_key_pem.as_bytes(),
        ))
        .map_err(|e| TlsError::parse(format!("private key PEM invalid: {}", e)))?
        .ok_or_else(|| TlsError::parse("no private key in issued material"))?;

        let mut candidates = leaf_and_extras;
        for pem in ca_chain_pem {
            candidates.extend(parse_certificates(pem)?);
        }

        let mut ca_certificates: Vec<CertificateDer<'static>> = Vec::new();
        for cert in candidates {
            if cert != leaf_certificate && !ca_certificates.contains(&cert) {
                ca_certificates.push(cert);
            }
        }

        if ca_certificates.is_empty() {
            return Err(TlsError::parse(
                "issued material carries no CA certificates to verify peers against",
            ));
        }

        let not_after = certificate_not_after(&leaf_certificate)?;
        let trust_chain = order_chain(leaf_certificate.clone(), ca_certificates)?;

        debug!(
            chain_len = trust_chain.len(),
            not_after = %not_after,
            "Parsed credential bundle"
        );

        Ok(Self {
            leaf_certificate,
            private_key,
            trust_chain,
            not_after,
            serial_number: None,
        })
    }

    pub fn with_serial_number(mut self, serial_number: Option<String>) -> Self {
        self.serial_number = serial_number;
        self
    }

    pub fn leaf_certificate(&self) -> &CertificateDer<'static> {
        &self.leaf_certificate
    }

    pub fn private_key(&self) -> &PrivateKeyDer<'static> {
        &self.private_key
    }

    pub fn trust_chain(&self) -> &[CertificateDer<'static>] {
        &self.trust_chain
    }

    /// CA certificates (everything after the leaf) used as the trusted root set
    pub fn ca_certificates(&self) -> &[CertificateDer<'static>] {
        &self.trust_chain[1..]
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.not_after - now
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.not_after
    }

    pub fn ensure_valid_at(&self, now: DateTime<Utc>) -> TlsResult<()> {
        if self.is_valid_at(now) {
            Ok(())
        } else {
            Err(TlsError::Expired {
                not_after: self.not_after,
            })
        }
    }

    /// Build a rustls server config with mandatory client certificate verification
    /// against this bundle's CA certificates.
    pub fn server_config(&self, settings: &TransportSettings) -> TlsResult<ServerConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let mut roots = RootCertStore::empty();
        for ca in self.ca_certificates() {
            roots.add(ca.clone())?;
        }

        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|e| TlsError::Tls(format!("client verifier: {}", e)))?;

        let mut config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(settings.min_tls_version.protocol_versions())?
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.trust_chain.clone(), self.private_key.clone_key())?;

        config.alpn_protocols = vec![b"h2".to_vec()];

        info!(
            min_tls_version = ?settings.min_tls_version,
            not_after = %self.not_after,
            "Server TLS config built with mandatory client certificate verification"
        );

        Ok(config)
    }

    /// Build a tonic client TLS config presenting this bundle as the client identity
    pub fn client_tls_config(&self, domain_name: &str) -> ClientTlsConfig {
        let chain_pem = self
            .trust_chain
            .iter()
            .take(self.trust_chain.len() - 1)
            .map(|cert| encode_pem("CERTIFICATE", cert.as_ref()))
            .collect::<String>();
        let identity = Identity::from_pem(chain_pem, self.private_key_pem());

        let mut tls_config = ClientTlsConfig::new()
            .identity(identity)
            .domain_name(domain_name);
        for ca in self.ca_certificates() {
            tls_config =
                tls_config.ca_certificate(Certificate::from_pem(encode_pem("CERTIFICATE", ca.as_ref())));
        }

        info!(domain = %domain_name, "Client TLS config built with mTLS authentication");

        tls_config
    }

    fn private_key_pem(&self) -> String {
        let tag = match &self.private_key {
            PrivateKeyDer::Pkcs1(_) => "RSA PRIVATE KEY",
            PrivateKeyDer::Sec1(_) => "EC PRIVATE KEY",
            _ => "PRIVATE KEY",
        };
        encode_pem(tag, self.private_key.secret_der())
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("chain_len", &self.trust_chain.len())
            .field("not_after", &self.not_after)
            .field("serial_number", &self.serial_number)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

fn encode_pem(tag: &str, der: &[u8]) -> String {
    ::pem::encode(&::pem::Pem::new(tag, der.to_vec()))
}

fn parse_certificates(pem_text: &str) -> TlsResult<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut BufReader::new(pem_text.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::parse(format!("certificate PEM invalid: {}", e)))
}

fn parse_x509<'a>(der: &'a CertificateDer<'_>) -> TlsResult<X509Certificate<'a>> {
    let (_, cert) = X509Certificate::from_der(der.as_ref())
        .map_err(|e| TlsError::parse(format!("X.509 parse failed: {}", e)))?;
    Ok(cert)
}

pub(crate) fn certificate_not_after(der: &CertificateDer<'_>) -> TlsResult<DateTime<Utc>> {
    let cert = parse_x509(der)?;
    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| TlsError::parse(format!("notAfter out of range: {}", timestamp)))
}

/// Walk issuer links from the leaf so the chain reads leaf, intermediates, root.
/// Certificates not reachable from the leaf are appended in their original order.
fn order_chain(
    leaf: CertificateDer<'static>,
    mut remaining: Vec<CertificateDer<'static>>,
) -> TlsResult<Vec<CertificateDer<'static>>> {
    let mut chain = vec![leaf];

    loop {
        let issuer = {
            let current = parse_x509(&chain[chain.len() - 1])?;
            if current.subject().as_raw() == current.issuer().as_raw() {
                break;
            }
            current.issuer().as_raw().to_vec()
        };

        let mut next = None;
        for (idx, candidate) in remaining.iter().enumerate() {
            if parse_x509(candidate)?.subject().as_raw() == issuer.as_slice() {
                next = Some(idx);
                break;
            }
        }

        match next {
            Some(idx) => chain.push(remaining.remove(idx)),
            None => break,
        }
    }

    chain.extend(remaining);
    Ok(chain)
}
