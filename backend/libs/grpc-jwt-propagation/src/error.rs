//! Authorization failure taxonomy and its mapping onto gRPC status codes

use thiserror::Error;
use tonic::{Code, Status};

/// Why a call was refused.
///
/// Every kind stays distinct all the way to the caller. Messages name only the
/// kind, never the expected claim value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing metadata")]
    MissingMetadata,

    #[error("missing token")]
    MissingToken,

    #[error("malformed token")]
    MalformedToken,

    #[error("unexpected signing method")]
    UnexpectedSigningMethod,

    /// Well-formed token with a pinned algorithm whose signature does not
    /// verify against the configured key
    #[error("invalid signature")]
    InvalidSignature,

    #[error("token expired")]
    TokenExpired,

    #[error("insufficient scope")]
    InsufficientScope,

    #[error("invalid audience")]
    InvalidAudience,

    #[error("invalid issuer")]
    InvalidIssuer,

    #[error("invalid subject")]
    InvalidSubject,
}

impl AuthError {
    /// Input defects on the caller's side, as opposed to failed authentication
    pub fn is_client_defect(&self) -> bool {
        matches!(
            self,
            AuthError::MissingMetadata | AuthError::MissingToken | AuthError::MalformedToken
        )
    }

    /// Stable identifier for logs
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingMetadata => "missing_metadata",
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedToken => "malformed_token",
            AuthError::UnexpectedSigningMethod => "unexpected_signing_method",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::InsufficientScope => "insufficient_scope",
            AuthError::InvalidAudience => "invalid_audience",
            AuthError::InvalidIssuer => "invalid_issuer",
            AuthError::InvalidSubject => "invalid_subject",
        }
    }
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        let code = if err.is_client_defect() {
            Code::InvalidArgument
        } else {
            Code::Unauthenticated
        };
        Status::new(code, err.to_string())
    }
}
