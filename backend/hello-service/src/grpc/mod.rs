/// gRPC module for hello-service
///
/// Exports:
/// - hello: Protobuf message and service definitions generated from hello.proto
/// - HelloGreeter: SayHello implementation
pub mod hello {
    // hello.proto declares no package, so prost names the output `_.rs`
    tonic::include_proto!("_");
}
mod service;

pub use hello::hello_service_client::HelloServiceClient;
pub use hello::hello_service_server::{HelloService, HelloServiceServer};
pub use hello::HelloRequest;
pub use service::HelloGreeter;
