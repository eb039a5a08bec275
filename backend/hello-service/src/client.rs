//! Caller side of the service: token acquisition and an authenticated channel

use crate::grpc::HelloServiceClient;
use anyhow::{anyhow, Context, Result};
use grpc_jwt_propagation::JwtClientInterceptor;
use grpc_tls::CredentialBundle;
use serde::{Deserialize, Serialize};
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};
use vault_secrets::ClientCredentialsSecret;

pub type AuthenticatedClient = HelloServiceClient<InterceptedService<Channel, JwtClientInterceptor>>;

#[derive(Serialize)]
struct ClientCredentialsGrant<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    audience: &'a str,
    grant_type: &'static str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Exchange OAuth client credentials for an access token.
///
/// `credentials.domain` is the full token endpoint URL.
pub async fn fetch_client_credentials_token(
    http: &reqwest::Client,
    credentials: &ClientCredentialsSecret,
) -> Result<String> {
    let grant = ClientCredentialsGrant {
        client_id: &credentials.id,
        client_secret: &credentials.secret,
        audience: &credentials.audience,
        grant_type: "client_credentials",
    };

    debug!(endpoint = %credentials.domain, client_id = %credentials.id, "Requesting access token");
    let response = http
        .post(&credentials.domain)
        .json(&grant)
        .send()
        .await
        .context("Token endpoint unreachable")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("Token endpoint returned {}: {}", status, body));
    }

    let token: TokenResponse = response
        .json()
        .await
        .context("Invalid token endpoint response")?;
    if token.access_token.is_empty() {
        return Err(anyhow!("Token endpoint returned an empty access token"));
    }

    info!(expires_in = ?token.expires_in, "Access token acquired");
    Ok(token.access_token)
}

/// Open an mTLS channel presenting `bundle` and attach `token` to every call
pub async fn connect(
    server_url: &str,
    tls_domain: &str,
    bundle: &CredentialBundle,
    token: &str,
) -> Result<AuthenticatedClient> {
    let channel = Endpoint::from_shared(server_url.to_string())
        .context("Invalid server URL")?
        .tls_config(bundle.client_tls_config(tls_domain))
        .context("Failed to configure client TLS")?
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", server_url))?;

    let interceptor = JwtClientInterceptor::new(token).context("Invalid access token")?;
    Ok(HelloServiceClient::with_interceptor(channel, interceptor))
}
