//! In-process development PKI
//!
//! Issues short-lived leaf certificates from a locally generated CA so the
//! service and its tests can run without a real PKI backend.
//! **WARNING**: NEVER use in production - the CA key lives in process memory.

use crate::error::{TlsError, TlsResult};
use crate::provisioner::{IssueRequest, IssuedCertificate, PkiBackend, PkiBackendError};
use async_trait::async_trait;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SerialNumber,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{info, warn};

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

struct SigningCa {
    certificate: Certificate,
    key: KeyPair,
}

/// Development certificate authority: a root, optionally an intermediate
pub struct DevelopmentPki {
    root: SigningCa,
    intermediate: Option<SigningCa>,
    next_serial: AtomicU64,
}

impl DevelopmentPki {
    /// Root CA that signs leaves directly
    pub fn new() -> TlsResult<Self> {
        warn!("Using development PKI with an in-memory CA - NOT for production");

        let root = generate_ca("Hello Development Root CA", None)?;

        Ok(Self {
            root,
            intermediate: None,
            next_serial: AtomicU64::new(1000),
        })
    }

    /// Root CA plus an intermediate that signs the leaves
    pub fn with_intermediate() -> TlsResult<Self> {
        let mut pki = Self::new()?;
        pki.intermediate = Some(generate_ca(
            "Hello Development Intermediate CA",
            Some(&pki.root),
        )?);
        Ok(pki)
    }

    /// Root CA certificate (PEM) that peers should trust
    pub fn root_certificate_pem(&self) -> String {
        self.root.certificate.pem()
    }

    /// Issue a leaf valid from one minute ago until `ttl` from now
    pub fn issue_for(
        &self,
        common_name: &str,
        alt_names: &[String],
        ttl: Duration,
    ) -> TlsResult<IssuedCertificate> {
        let now = OffsetDateTime::now_utc();
        let lifetime = time::Duration::try_from(ttl)
            .map_err(|e| TlsError::issuance(format!("invalid ttl: {}", e)))?;
        self.issue_with_validity(
            common_name,
            alt_names,
            now - time::Duration::minutes(1),
            now + lifetime,
        )
    }

    /// Issue a leaf with an explicit validity window
    pub fn issue_with_validity(
        &self,
        common_name: &str,
        alt_names: &[String],
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> TlsResult<IssuedCertificate> {
        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);

        let mut params = CertificateParams::new(alt_names.to_vec()).map_err(rcgen_error)?;
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params
            .distinguished_name
            .push(DnType::OrganizationName, "Hello Development");
        params.serial_number = Some(SerialNumber::from(serial));
        params.not_before = not_before;
        params.not_after = not_after;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        // Same leaf serves as server and client identity, like a PKI role
        // with both server_flag and client_flag set
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];

        let signer = self.intermediate.as_ref().unwrap_or(&self.root);
        let key = KeyPair::generate().map_err(rcgen_error)?;
        let certificate = params
            .signed_by(&key, &signer.certificate, &signer.key)
            .map_err(rcgen_error)?;

        let mut ca_chain = Vec::new();
        if let Some(intermediate) = &self.intermediate {
            ca_chain.push(intermediate.certificate.pem());
        }
        ca_chain.push(self.root.certificate.pem());

        info!(
            common_name = %common_name,
            serial = serial,
            not_after = %not_after,
            "Development PKI issued certificate"
        );

        Ok(IssuedCertificate {
            certificate: certificate.pem(),
            private_key: key.serialize_pem(),
            issuing_ca: Some(signer.certificate.pem()),
            ca_chain,
            expiration: Some(not_after.unix_timestamp()),
            serial_number: Some(format!("{:x}", serial)),
        })
    }
}

#[async_trait]
impl PkiBackend for DevelopmentPki {
    async fn issue(&self, request: &IssueRequest) -> Result<IssuedCertificate, PkiBackendError> {
        let alt_names: Vec<String> = request
            .alt_names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        self.issue_for(
            &request.common_name,
            &alt_names,
            request.ttl.unwrap_or(DEFAULT_TTL),
        )
        .map_err(|e| PkiBackendError::Rejected {
            status: 400,
            message: e.to_string(),
        })
    }
}

fn generate_ca(common_name: &str, issuer: Option<&SigningCa>) -> TlsResult<SigningCa> {
    let now = OffsetDateTime::now_utc();

    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params
        .distinguished_name
        .push(DnType::OrganizationName, "Hello Development");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = now - time::Duration::hours(1);
    params.not_after = now + time::Duration::days(365);

    let key = KeyPair::generate().map_err(rcgen_error)?;
    let certificate = match issuer {
        Some(issuer) => params.signed_by(&key, &issuer.certificate, &issuer.key),
        None => params.self_signed(&key),
    }
    .map_err(rcgen_error)?;

    Ok(SigningCa { certificate, key })
}

fn rcgen_error(err: rcgen::Error) -> TlsError {
    TlsError::issuance(format!("development PKI: {}", err))
}
