//! Error types for certificate provisioning and mTLS transport setup

use thiserror::Error;

pub type TlsResult<T> = Result<T, TlsError>;

#[derive(Debug, Error)]
pub enum TlsError {
    /// PKI backend unreachable, timed out, or rejected the request.
    /// Fatal at startup, retryable during renewal.
    #[error("certificate issuance failed: {reason}")]
    IssuanceFailed { reason: String },

    /// Issued material is malformed. Always fatal: the backend is incompatible
    /// and the listener must not fall back to a weaker configuration.
    #[error("certificate material could not be parsed: {reason}")]
    ParseFailed { reason: String },

    #[error("invalid certificate identity: {reason}")]
    InvalidIdentity { reason: String },

    #[error("no certificate bundle has been issued yet")]
    NotProvisioned,

    #[error("certificate bundle expired at {not_after}")]
    Expired {
        not_after: chrono::DateTime<chrono::Utc>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl TlsError {
    pub(crate) fn parse(reason: impl Into<String>) -> Self {
        TlsError::ParseFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn issuance(reason: impl Into<String>) -> Self {
        TlsError::IssuanceFailed {
            reason: reason.into(),
        }
    }

    /// Whether a renewal loop may try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, TlsError::IssuanceFailed { .. })
    }
}

impl From<pem::PemError> for TlsError {
    fn from(err: pem::PemError) -> Self {
        TlsError::parse(format!("PEM decode failed: {}", err))
    }
}

impl From<rustls::Error> for TlsError {
    fn from(err: rustls::Error) -> Self {
        TlsError::Tls(err.to_string())
    }
}
