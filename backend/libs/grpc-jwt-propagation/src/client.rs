//! Client-side bearer token injection
//!
//! Attaches `authorization: Bearer <token>` to every outgoing gRPC request.

use tonic::metadata::AsciiMetadataValue;
use tonic::service::Interceptor;
use tonic::{Request, Status};

/// Client-side interceptor that injects a bearer token into gRPC metadata
///
/// ## Usage
///
/// ```rust,no_run
/// use grpc_jwt_propagation::JwtClientInterceptor;
/// use tonic::transport::Channel;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let interceptor = JwtClientInterceptor::new("eyJhbGc...")?;
///
/// let channel = Channel::from_static("https://localhost:3000")
///     .connect()
///     .await?;
///
/// // let mut client = HelloServiceClient::with_interceptor(channel, interceptor);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct JwtClientInterceptor {
    /// Pre-formatted "Bearer {token}", parsed once
    auth_header: AsciiMetadataValue,
}

impl JwtClientInterceptor {
    /// Fails with `Status::invalid_argument` if the token is not visible ASCII.
    /// Valid JWTs (base64url segments) always are.
    pub fn new(jwt_token: impl AsRef<str>) -> Result<Self, Status> {
        let auth_header = AsciiMetadataValue::try_from(format!("Bearer {}", jwt_token.as_ref()))
            .map_err(|_| Status::invalid_argument("token contains invalid characters"))?;

        Ok(Self { auth_header })
    }
}

impl Interceptor for JwtClientInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert("authorization", self.auth_header.clone());

        Ok(request)
    }
}

impl std::fmt::Debug for JwtClientInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtClientInterceptor")
            .field("auth_header", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interceptor_injects_header() {
        let mut interceptor = JwtClientInterceptor::new("test-token-123").unwrap();

        let request = interceptor.call(Request::new(())).unwrap();

        let auth = request.metadata().get("authorization").unwrap();
        assert_eq!(auth.to_str().unwrap(), "Bearer test-token-123");
    }

    #[test]
    fn test_invalid_token_is_an_error_not_a_panic() {
        let result = JwtClientInterceptor::new("line\nbreak");
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn test_debug_redacts_token() {
        let interceptor = JwtClientInterceptor::new("secret-token").unwrap();
        assert!(!format!("{:?}", interceptor).contains("secret-token"));
    }
}
