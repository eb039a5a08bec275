//! Request extension trait for token claims access
//!
//! Gives handlers typed access to the claims stored by
//! [`AuthorizationInterceptor`](crate::AuthorizationInterceptor).

use crate::claims::TokenClaims;
use crate::gate::CorrelationId;
use tonic::{Request, Status};

/// Extension trait for accessing validated claims from gRPC requests
///
/// ## Usage
///
/// ```rust,no_run
/// use grpc_jwt_propagation::TokenClaimsExt;
/// use tonic::{Request, Response, Status};
///
/// async fn archive(request: Request<()>) -> Result<Response<()>, Status> {
///     request.require_scope("write:messages")?;
///     Ok(Response::new(()))
/// }
/// ```
pub trait TokenClaimsExt {
    /// Claims stored by the authorization gate.
    ///
    /// Returns `Status::unauthenticated` if the gate was not attached.
    fn token_claims(&self) -> Result<&TokenClaims, Status>;

    /// Require an additional scope beyond the service-wide policy
    fn require_scope(&self, scope: &str) -> Result<&TokenClaims, Status>;

    fn correlation_id(&self) -> Option<&str>;
}

impl<T> TokenClaimsExt for Request<T> {
    fn token_claims(&self) -> Result<&TokenClaims, Status> {
        self.extensions()
            .get::<TokenClaims>()
            .ok_or_else(|| Status::unauthenticated("missing token claims"))
    }

    fn require_scope(&self, scope: &str) -> Result<&TokenClaims, Status> {
        let claims = self.token_claims()?;
        if claims.has_scope(scope) {
            Ok(claims)
        } else {
            Err(Status::permission_denied("insufficient scope"))
        }
    }

    fn correlation_id(&self) -> Option<&str> {
        self.extensions()
            .get::<CorrelationId>()
            .map(|id| id.0.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn claims() -> TokenClaims {
        TokenClaims {
            subject: "client@clients".to_string(),
            issuer: "https://tenant.example.com/".to_string(),
            audience: BTreeSet::from(["hello-service".to_string()]),
            scope: BTreeSet::from(["read:messages".to_string()]),
            expires_at: Utc::now(),
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn test_token_claims_missing() {
        let request = Request::new(());
        let status = request.token_claims().unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn test_require_scope() {
        let mut request = Request::new(());
        request.extensions_mut().insert(claims());

        assert!(request.require_scope("read:messages").is_ok());
        let status = request.require_scope("write:messages").unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
    }

    #[test]
    fn test_correlation_id() {
        let mut request = Request::new(());
        assert!(request.correlation_id().is_none());

        request
            .extensions_mut()
            .insert(CorrelationId("abc".to_string()));
        assert_eq!(request.correlation_id(), Some("abc"));
    }
}
