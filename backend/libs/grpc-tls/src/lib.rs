//! mTLS credential provisioning and transport for gRPC services
//!
//! **Security Features**:
//! - Short-lived certificates issued by a PKI backend, never read from disk
//! - Mandatory client certificate verification on every connection
//! - Certificate rotation without downtime
//! - In-process development PKI for local runs and tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use grpc_tls::{
//!     CertificateIdentity, CertificateProvisioner, DevelopmentPki, MtlsListener,
//!     ProvisionerConfig, RenewalPolicy, ServerCredentials, TransportSettings,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), grpc_tls::TlsError> {
//! let provisioner = Arc::new(CertificateProvisioner::new(
//!     Arc::new(DevelopmentPki::new()?),
//!     ProvisionerConfig::default(),
//! ));
//! let identity = CertificateIdentity::new("grpc.example.com", vec!["localhost".into()]);
//! let bundle = provisioner.issue(&identity).await?;
//!
//! let credentials = ServerCredentials::new(bundle, TransportSettings::default())?;
//! let _renewal = grpc_tls::spawn_renewal_task(
//!     provisioner,
//!     credentials.clone(),
//!     RenewalPolicy::default(),
//! );
//!
//! let listener =
//!     MtlsListener::bind("0.0.0.0:3000".parse().unwrap(), credentials, Duration::from_secs(10))
//!         .await?;
//! let _incoming = listener.into_incoming();
//! # Ok(())
//! # }
//! ```

mod bundle;
pub mod cert_generation;
mod error;
mod listener;
mod provisioner;
mod rotation;
pub mod san_validation;

pub use bundle::{CredentialBundle, MinTlsVersion, TransportSettings};
pub use cert_generation::DevelopmentPki;
pub use error::{TlsError, TlsResult};
pub use listener::{MtlsListener, MtlsStream};
pub use provisioner::{
    CertificateProvisioner, IssueRequest, IssuedCertificate, PkiBackend, PkiBackendError,
    ProvisionerConfig,
};
pub use rotation::{
    renew_once, run_renewal_loop, spawn_renewal_task, ActiveCredentials, RenewalPolicy,
    ServerCredentials,
};
pub use san_validation::CertificateIdentity;
