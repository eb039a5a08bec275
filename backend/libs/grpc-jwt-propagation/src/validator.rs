//! Bearer token validation
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. strip `Bearer `; empty remainder is `MalformedToken`
//! 2. algorithm pinned to the RSA family (any other `alg`, including `none`,
//!    is `UnexpectedSigningMethod`), then signature
//! 3. `exp > now`
//! 4. required scope, 5. audience, 6. issuer, 7. subject
//!
//! Validation is pure: no I/O, no shared mutable state, safe to call from any
//! number of tasks at once.

use crate::claims::{TokenClaims, WireClaims};
use crate::error::AuthError;
use crate::key::{StaticKeyProvider, VerificationKey, VerificationKeyProvider};
use crate::policy::AuthorizationPolicy;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// RSA signature algorithms accepted for bearer tokens
const RSA_FAMILY: [Algorithm; 6] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// Validates bearer tokens against one key source and one policy
#[derive(Clone)]
pub struct ClaimsValidator {
    keys: Arc<dyn VerificationKeyProvider>,
    policy: Arc<AuthorizationPolicy>,
}

impl ClaimsValidator {
    pub fn new(keys: Arc<dyn VerificationKeyProvider>, policy: AuthorizationPolicy) -> Self {
        Self {
            keys,
            policy: Arc::new(policy),
        }
    }

    /// Validator bound to a single key for the process lifetime
    pub fn with_key(key: VerificationKey, policy: AuthorizationPolicy) -> Self {
        Self::new(Arc::new(StaticKeyProvider::new(key)), policy)
    }

    pub fn policy(&self) -> &AuthorizationPolicy {
        &self.policy
    }

    pub fn validate(&self, raw_token: &str) -> Result<TokenClaims, AuthError> {
        self.validate_at(raw_token, Utc::now())
    }

    pub fn validate_at(&self, raw_token: &str, now: DateTime<Utc>) -> Result<TokenClaims, AuthError> {
        validate_token(raw_token, &self.policy, &self.keys.current_key(), now)
    }
}

/// Validate `raw_token` against `policy` and `key` as of `now`
pub fn validate_token(
    raw_token: &str,
    policy: &AuthorizationPolicy,
    key: &VerificationKey,
    now: DateTime<Utc>,
) -> Result<TokenClaims, AuthError> {
    let token = raw_token.strip_prefix("Bearer ").unwrap_or(raw_token);
    if token.is_empty() {
        return Err(AuthError::MalformedToken);
    }

    let claims = verify_signature(token, key)?;

    if claims.expires_at <= now {
        return Err(AuthError::TokenExpired);
    }

    if let Some(scope) = &policy.required_scope {
        if !claims.has_scope(scope) {
            return Err(AuthError::InsufficientScope);
        }
    }

    if let Some(audience) = &policy.required_audience {
        if !claims.has_audience(audience) {
            return Err(AuthError::InvalidAudience);
        }
    }

    if let Some(issuer) = &policy.required_issuer {
        if claims.issuer != *issuer {
            return Err(AuthError::InvalidIssuer);
        }
    }

    if let Some(subject) = &policy.required_subject {
        if claims.subject != *subject {
            return Err(AuthError::InvalidSubject);
        }
    }

    Ok(claims)
}

/// The header's `alg` must name a member of the RSA family.
///
/// Names jsonwebtoken does not model (`none`, typos) fail header decoding, so
/// the raw header JSON is consulted before calling the token malformed.
fn check_algorithm(token: &str) -> Result<(), AuthError> {
    match jsonwebtoken::decode_header(token) {
        Ok(header) if RSA_FAMILY.contains(&header.alg) => Ok(()),
        Ok(_) => Err(AuthError::UnexpectedSigningMethod),
        Err(_) => match raw_header_algorithm(token) {
            Some(alg) if !is_rsa_family(&alg) => Err(AuthError::UnexpectedSigningMethod),
            _ => Err(AuthError::MalformedToken),
        },
    }
}

fn raw_header_algorithm(token: &str) -> Option<String> {
    let header = token.split('.').next()?;
    let bytes = URL_SAFE_NO_PAD.decode(header).ok()?;
    let json: Value = serde_json::from_slice(&bytes).ok()?;
    json.get("alg")?.as_str().map(str::to_string)
}

fn is_rsa_family(name: &str) -> bool {
    name.parse::<Algorithm>()
        .map(|alg| RSA_FAMILY.contains(&alg))
        .unwrap_or(false)
}

/// Signature and algorithm only. Every claim check is ours, in our order.
fn verify_signature(token: &str, key: &VerificationKey) -> Result<TokenClaims, AuthError> {
    check_algorithm(token)?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.algorithms = RSA_FAMILY.to_vec();
    validation.required_spec_claims = HashSet::new();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.leeway = 0;

    let data = jsonwebtoken::decode::<WireClaims>(token, key.decoding_key(), &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                AuthError::UnexpectedSigningMethod
            }
            ErrorKind::InvalidSignature | ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
                AuthError::InvalidSignature
            }
            _ => AuthError::MalformedToken,
        })?;

    data.claims.into_claims()
}
