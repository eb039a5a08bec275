use super::hello::{hello_service_server::HelloService, HelloRequest};
use grpc_jwt_propagation::TokenClaimsExt;
use tonic::{Request, Response, Status};
use tracing::info;

/// Greets authorized callers by name
#[derive(Debug, Clone, Default)]
pub struct HelloGreeter;

#[tonic::async_trait]
impl HelloService for HelloGreeter {
    async fn say_hello(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloRequest>, Status> {
        let claims = request.token_claims()?;
        info!(
            subject = %claims.subject,
            correlation_id = request.correlation_id().unwrap_or("-"),
            "SayHello"
        );

        let name = &request.get_ref().name;
        Ok(Response::new(HelloRequest {
            name: format!("Hello {}", name),
        }))
    }
}
