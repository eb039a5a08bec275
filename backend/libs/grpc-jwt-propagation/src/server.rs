//! Server-side authorization gate
//!
//! Extracts the bearer token from incoming call metadata, validates it, and
//! stores the resulting [`TokenClaims`] in request extensions for handlers.

use crate::claims::TokenClaims;
use crate::error::AuthError;
use crate::gate::CallGate;
use crate::validator::ClaimsValidator;
use std::future::Future;
use tonic::metadata::MetadataMap;
use tonic::service::Interceptor;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

const AUTHORIZATION_KEY: &str = "authorization";

/// Per-call gate that admits only calls carrying a valid bearer token
///
/// 1. metadata map with no entries at all: `MissingMetadata`
/// 2. no `authorization` entry: `MissingToken`
/// 3. everything else is decided by [`ClaimsValidator`]
///
/// A rejected call never reaches the handler. The raw token is never logged;
/// subject and scope of admitted calls are, for audit.
///
/// ## Usage
///
/// ```rust,no_run
/// use grpc_jwt_propagation::{
///     AuthorizationInterceptor, AuthorizationPolicy, ClaimsValidator, GatePipeline,
///     VerificationKey,
/// };
///
/// # fn example(pem: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let key = VerificationKey::from_rsa_pem(pem.as_bytes())?;
/// let policy = AuthorizationPolicy::new().require_scope("read:messages");
/// let interceptor = AuthorizationInterceptor::new(ClaimsValidator::with_key(key, policy));
///
/// let pipeline = GatePipeline::new().with_gate(interceptor);
/// // let service = HelloServiceServer::with_interceptor(HelloGreeter, pipeline);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AuthorizationInterceptor {
    validator: ClaimsValidator,
}

impl AuthorizationInterceptor {
    pub fn new(validator: ClaimsValidator) -> Self {
        Self { validator }
    }

    /// Decide whether the call described by `metadata` is admitted
    pub fn authorize(&self, metadata: &MetadataMap) -> Result<TokenClaims, AuthError> {
        if metadata.is_empty() {
            return Err(AuthError::MissingMetadata);
        }

        let header = metadata
            .get(AUTHORIZATION_KEY)
            .ok_or(AuthError::MissingToken)?;
        let raw_token = header.to_str().map_err(|_| AuthError::MalformedToken)?;

        self.validator.validate(raw_token)
    }

    /// Gate `next` behind authorization.
    ///
    /// On success the claims are attached to the request and `next`'s result is
    /// returned unchanged; on failure `next` is never invoked.
    pub async fn intercept<T, U, F, Fut>(
        &self,
        mut request: Request<T>,
        next: F,
    ) -> Result<Response<U>, Status>
    where
        F: FnOnce(Request<T>) -> Fut,
        Fut: Future<Output = Result<Response<U>, Status>>,
    {
        let claims = self.admit(request.metadata())?;
        request.extensions_mut().insert(claims);
        next(request).await
    }

    fn admit(&self, metadata: &MetadataMap) -> Result<TokenClaims, Status> {
        match self.authorize(metadata) {
            Ok(claims) => {
                debug!(
                    subject = %claims.subject,
                    scope = %claims.scope_string(),
                    "Call authorized"
                );
                Ok(claims)
            }
            Err(err) => {
                warn!(reason = err.kind(), "Call rejected by authorization gate");
                Err(err.into())
            }
        }
    }
}

impl CallGate for AuthorizationInterceptor {
    fn name(&self) -> &'static str {
        "authorization"
    }

    fn inspect(&self, request: &mut Request<()>) -> Result<(), Status> {
        let claims = self.admit(request.metadata())?;
        request.extensions_mut().insert(claims);
        Ok(())
    }
}

impl Interceptor for AuthorizationInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        self.inspect(&mut request)?;
        Ok(request)
    }
}
