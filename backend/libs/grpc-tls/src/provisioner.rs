//! Certificate provisioning from a PKI backend
//!
//! The provisioner performs one outbound issuance call per `issue`/renewal,
//! bounded by a caller-supplied timeout, and keeps the last bundle it issued so
//! that renewal can be a no-op while the bundle still has enough lifetime left.

use crate::bundle::CredentialBundle;
use crate::error::{TlsError, TlsResult};
use crate::san_validation::{ensure_requested_sans, CertificateIdentity};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Issuance request sent to the PKI backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub common_name: String,
    /// Comma-separated subject alternative names
    pub alt_names: String,
    /// Requested lifetime; `None` lets the backend role decide
    pub ttl: Option<Duration>,
}

impl IssueRequest {
    pub fn for_identity(identity: &CertificateIdentity, ttl: Option<Duration>) -> Self {
        Self {
            common_name: identity.common_name.clone(),
            alt_names: identity.alt_names_csv(),
            ttl,
        }
    }
}

/// Raw certificate material as returned by the PKI backend (PEM encoded)
#[derive(Clone, Deserialize)]
pub struct IssuedCertificate {
    pub certificate: String,
    pub private_key: String,
    #[serde(default)]
    pub issuing_ca: Option<String>,
    #[serde(default)]
    pub ca_chain: Vec<String>,
    /// Unix timestamp reported by the backend
    #[serde(default)]
    pub expiration: Option<i64>,
    #[serde(default)]
    pub serial_number: Option<String>,
}

impl IssuedCertificate {
    /// Parse into a bundle. `issuing_ca` is folded into the chain; duplicates are dropped.
    pub fn into_bundle(self) -> TlsResult<CredentialBundle> {
        let mut chain = self.ca_chain;
        if let Some(issuing_ca) = self.issuing_ca {
            chain.push(issuing_ca);
        }

        let bundle = CredentialBundle::from_pem(&self.certificate, &self.private_key, &chain)?
            .with_serial_number(self.serial_number);

        if let Some(expiration) = self.expiration {
            if (bundle.not_after().timestamp() - expiration).abs() > 1 {
                warn!(
                    reported = expiration,
                    actual = bundle.not_after().timestamp(),
                    "PKI backend expiration disagrees with certificate notAfter, trusting the certificate"
                );
            }
        }

        Ok(bundle)
    }
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("serial_number", &self.serial_number)
            .field("expiration", &self.expiration)
            .field("ca_chain_len", &self.ca_chain.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum PkiBackendError {
    #[error("PKI backend unreachable: {0}")]
    Unreachable(String),

    #[error("PKI backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("PKI backend returned an unexpected response: {0}")]
    InvalidResponse(String),
}

/// The secret-issuing collaborator
#[async_trait]
pub trait PkiBackend: Send + Sync {
    async fn issue(&self, request: &IssueRequest) -> Result<IssuedCertificate, PkiBackendError>;
}

#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Upper bound on a single issuance call
    pub issue_timeout: Duration,
    /// Requested certificate lifetime
    pub ttl: Option<Duration>,
    /// `issue` for the cached identity reuses the cached bundle while more
    /// than this much lifetime remains
    pub reuse_threshold: Duration,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            issue_timeout: Duration::from_secs(10),
            ttl: None,
            reuse_threshold: Duration::from_secs(300),
        }
    }
}

struct CachedBundle {
    identity: CertificateIdentity,
    bundle: Arc<CredentialBundle>,
}

/// Requests certificate material for an identity and keeps it fresh
pub struct CertificateProvisioner {
    backend: Arc<dyn PkiBackend>,
    config: ProvisionerConfig,
    cached: RwLock<Option<CachedBundle>>,
}

impl CertificateProvisioner {
    pub fn new(backend: Arc<dyn PkiBackend>, config: ProvisionerConfig) -> Self {
        Self {
            backend,
            config,
            cached: RwLock::new(None),
        }
    }

    /// Issue a bundle for `identity`.
    ///
    /// Returns the cached bundle when it was issued for the same identity and
    /// still has more than `reuse_threshold` of lifetime left.
    pub async fn issue(&self, identity: &CertificateIdentity) -> TlsResult<Arc<CredentialBundle>> {
        identity.validate()?;

        if let Some(bundle) = self.reusable(identity) {
            debug!(
                common_name = %identity.common_name,
                not_after = %bundle.not_after(),
                "Reusing cached certificate bundle"
            );
            return Ok(bundle);
        }

        self.fetch(identity).await
    }

    /// Re-issue the cached bundle only if `not_after - now <= threshold`;
    /// otherwise return the cached bundle untouched.
    pub async fn renew_if_expiring_soon(
        &self,
        threshold: Duration,
    ) -> TlsResult<Arc<CredentialBundle>> {
        let (identity, bundle) = {
            let cached = self.cached.read();
            let cached = cached.as_ref().ok_or(TlsError::NotProvisioned)?;
            (cached.identity.clone(), cached.bundle.clone())
        };

        let remaining = bundle.remaining_lifetime(Utc::now());
        if remaining > to_chrono(threshold) {
            debug!(
                remaining_secs = remaining.num_seconds(),
                threshold_secs = threshold.as_secs(),
                "Certificate not due for renewal"
            );
            return Ok(bundle);
        }

        info!(
            common_name = %identity.common_name,
            remaining_secs = remaining.num_seconds(),
            "Certificate expiring soon, renewing"
        );
        self.fetch(&identity).await
    }

    /// Last bundle issued, if any
    pub fn cached(&self) -> Option<Arc<CredentialBundle>> {
        self.cached.read().as_ref().map(|c| c.bundle.clone())
    }

    fn reusable(&self, identity: &CertificateIdentity) -> Option<Arc<CredentialBundle>> {
        let cached = self.cached.read();
        let cached = cached.as_ref()?;
        let fresh = cached.bundle.remaining_lifetime(Utc::now())
            > to_chrono(self.config.reuse_threshold);
        (cached.identity == *identity && fresh).then(|| cached.bundle.clone())
    }

    async fn fetch(&self, identity: &CertificateIdentity) -> TlsResult<Arc<CredentialBundle>> {
        let request = IssueRequest::for_identity(identity, self.config.ttl);

        let issued =
            match tokio::time::timeout(self.config.issue_timeout, self.backend.issue(&request)).await
            {
                Err(_) => {
                    return Err(TlsError::issuance(format!(
                        "PKI backend did not answer within {:?}",
                        self.config.issue_timeout
                    )))
                }
                Ok(Err(PkiBackendError::InvalidResponse(reason))) => {
                    return Err(TlsError::parse(reason))
                }
                Ok(Err(e)) => return Err(TlsError::issuance(e.to_string())),
                Ok(Ok(issued)) => issued,
            };

        let bundle = issued.into_bundle()?;
        ensure_requested_sans(bundle.leaf_certificate(), identity)?;
        if !bundle.is_valid_at(Utc::now()) {
            return Err(TlsError::parse(format!(
                "issued certificate already expired at {}",
                bundle.not_after()
            )));
        }

        let bundle = Arc::new(bundle);
        *self.cached.write() = Some(CachedBundle {
            identity: identity.clone(),
            bundle: bundle.clone(),
        });

        info!(
            common_name = %identity.common_name,
            serial_number = ?bundle.serial_number(),
            not_after = %bundle.not_after(),
            "Certificate issued"
        );

        Ok(bundle)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36500))
}
