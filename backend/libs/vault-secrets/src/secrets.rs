//! Typed secrets read from the KV store

use serde::Deserialize;
use std::fmt;

/// Public key material for bearer token verification
#[derive(Clone, Deserialize)]
pub struct JwtVerificationSecret {
    /// PEM encoded RSA public key
    pub pem: String,
}

impl fmt::Debug for JwtVerificationSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerificationSecret")
            .field("pem_len", &self.pem.len())
            .finish()
    }
}

/// OAuth client credentials used by callers of the service
#[derive(Clone, Deserialize)]
pub struct ClientCredentialsSecret {
    pub id: String,
    pub secret: String,
    /// Token endpoint URL
    pub domain: String,
    pub audience: String,
}

impl fmt::Debug for ClientCredentialsSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsSecret")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .field("domain", &self.domain)
            .field("audience", &self.audience)
            .finish()
    }
}
