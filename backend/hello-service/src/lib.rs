/// Hello Service Library
///
/// A single-RPC gRPC service behind mutual TLS and bearer token authorization.
///
/// ## Modules
///
/// - `bootstrap`: Startup wiring (certificate, verification key, policy, listener)
/// - `client`: OAuth client-credentials token fetch and authenticated channel
/// - `config`: Service configuration
/// - `grpc`: HelloService definitions and handler
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod grpc;

pub use bootstrap::PreparedService;
pub use config::Settings;
