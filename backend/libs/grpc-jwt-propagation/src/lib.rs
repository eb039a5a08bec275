//! Bearer token authorization for gRPC services
//!
//! Validates the caller's bearer token on every incoming call and enforces a
//! claim-based access policy before the request reaches business logic.
//!
//! ## Core Components
//!
//! - **ClaimsValidator**: signature (RSA family only), expiry, then scope,
//!   audience, issuer, subject, in that order
//! - **AuthorizationInterceptor**: per-call gate that extracts the token from
//!   metadata and delegates to the validator
//! - **GatePipeline**: ordered list of call gates, usable as a tonic interceptor
//! - **JwtClientInterceptor**: injects the bearer token on the client side
//! - **TokenClaimsExt**: handler access to the validated claims
//!
//! ## Security Guarantees
//!
//! - Only RS256/384/512 and PS256/384/512 tokens are accepted; anything else is
//!   `UnexpectedSigningMethod`, which closes the HMAC-with-public-key confusion
//! - Verification key and policy are injected, never read from globals
//! - Client defects map to `InvalidArgument`, everything else to
//!   `Unauthenticated`, with messages that name only the failure kind
//! - Raw tokens are never logged

mod claims;
mod client;
mod error;
mod extensions;
mod gate;
mod key;
mod policy;
mod server;
mod validator;

pub use claims::TokenClaims;
pub use client::JwtClientInterceptor;
pub use error::AuthError;
pub use extensions::TokenClaimsExt;
pub use gate::{CallGate, CorrelationId, CorrelationIdGate, GatePipeline, CORRELATION_ID_KEY};
pub use key::{KeyError, StaticKeyProvider, VerificationKey, VerificationKeyProvider};
pub use policy::AuthorizationPolicy;
pub use server::AuthorizationInterceptor;
pub use validator::{validate_token, ClaimsValidator};

// Re-export tonic Status for convenience
pub use tonic::Status;
