//! Token verification keys
//!
//! Keys are loaded once at startup and handed to the validator explicitly.
//! [`VerificationKeyProvider`] is the seam where a rotation policy would plug in;
//! the shipped [`StaticKeyProvider`] serves one key for the process lifetime.

use jsonwebtoken::DecodingKey;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid RSA public key: {0}")]
    InvalidRsaKey(String),
}

/// RSA public key used to check token signatures
#[derive(Clone)]
pub struct VerificationKey {
    decoding_key: DecodingKey,
}

impl VerificationKey {
    /// Parse a PEM encoded RSA public key (PKCS#1 or SubjectPublicKeyInfo)
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, KeyError> {
        let decoding_key =
            DecodingKey::from_rsa_pem(pem).map_err(|e| KeyError::InvalidRsaKey(e.to_string()))?;
        Ok(Self { decoding_key })
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey").field("family", &"RSA").finish()
    }
}

/// Source of the key tokens are verified against
pub trait VerificationKeyProvider: Send + Sync {
    fn current_key(&self) -> Arc<VerificationKey>;
}

/// Serves the key loaded at startup, forever
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    key: Arc<VerificationKey>,
}

impl StaticKeyProvider {
    pub fn new(key: VerificationKey) -> Self {
        Self { key: Arc::new(key) }
    }
}

impl VerificationKeyProvider for StaticKeyProvider {
    fn current_key(&self) -> Arc<VerificationKey> {
        self.key.clone()
    }
}
