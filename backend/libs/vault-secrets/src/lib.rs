//! HashiCorp Vault integration with caching
//!
//! Two collaborators of the service's auth boundary live behind Vault:
//! - the PKI secrets engine, which issues short-lived mTLS certificates
//!   ([`VaultPki`], a [`grpc_tls::PkiBackend`])
//! - the KV v2 secrets engine, which holds the JWT verification key and the
//!   client credentials ([`SecretStore`])
//!
//! KV reads are cached with a TTL. Certificate issuance is never cached here;
//! the certificate provisioner owns that decision.
//!
//! # Example
//!
//! ```no_run
//! use vault_secrets::{read_kv, JwtVerificationSecret, VaultClient, VaultConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = VaultClient::new(VaultConfig::new("http://localhost:8200", "root"))?;
//!
//!     let secret: JwtVerificationSecret = read_kv(&client, "hello-service/data/auth0").await?;
//!     println!("{} bytes of PEM", secret.pem.len());
//!
//!     Ok(())
//! }
//! ```

mod pki;
mod secrets;

pub use pki::VaultPki;
pub use secrets::{ClientCredentialsSecret, JwtVerificationSecret};

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const TOKEN_HEADER: &str = "X-Vault-Token";

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Access denied to secret: {0}")]
    AccessDenied(String),

    #[error("Vault unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid secret format: {0}")]
    InvalidFormat(String),

    #[error("Vault returned {status}: {message}")]
    Http { status: u16, message: String },
}

/// Secret fields stored at one path
pub type SecretData = Map<String, Value>;

/// Read path of the secret-storage collaborator
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn read_secret(&self, path: &str) -> Result<Arc<SecretData>, SecretError>;
}

/// Read the secret at `path` into a typed structure.
///
/// Missing or mistyped fields are `SecretError::InvalidFormat`.
pub async fn read_kv<T, S>(store: &S, path: &str) -> Result<T, SecretError>
where
    T: DeserializeOwned,
    S: SecretStore + ?Sized,
{
    let data = store.read_secret(path).await?;
    serde_json::from_value(Value::Object((*data).clone()))
        .map_err(|e| SecretError::InvalidFormat(format!("{}: {}", path, e)))
}

#[derive(Clone)]
pub struct VaultConfig {
    /// Base address, e.g. `http://localhost:8200`
    pub address: String,
    pub token: String,
    pub request_timeout: Duration,
    pub cache_ttl: Duration,
    pub max_cache_entries: u64,
}

impl VaultConfig {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
            request_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(300), // 5 minutes
            max_cache_entries: 100,
        }
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("address", &self.address)
            .field("token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

#[derive(Deserialize)]
struct VaultResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct KvV2Data {
    data: SecretData,
}

#[derive(Deserialize, Default)]
struct VaultErrors {
    #[serde(default)]
    errors: Vec<String>,
}

/// Vault HTTP client with a TTL cache for KV reads
pub struct VaultClient {
    http: reqwest::Client,
    config: VaultConfig,
    cache: Cache<String, Arc<SecretData>>,
}

impl VaultClient {
    pub fn new(config: VaultConfig) -> Result<Self, SecretError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SecretError::Unreachable(format!("HTTP client setup failed: {}", e)))?;

        let cache = Cache::builder()
            .max_capacity(config.max_cache_entries)
            .time_to_live(config.cache_ttl)
            .build();

        info!(
            address = %config.address,
            cache_ttl = ?config.cache_ttl,
            "Initialized Vault client"
        );

        Ok(Self {
            http,
            config,
            cache,
        })
    }

    /// Read a KV v2 secret (cached). `path` includes the `data/` segment,
    /// e.g. `hello-service/data/auth0`.
    pub async fn get_secret(&self, path: &str) -> Result<Arc<SecretData>, SecretError> {
        if let Some(cached) = self.cache.get(path).await {
            debug!(path = %path, "Secret retrieved from cache");
            return Ok(cached);
        }

        debug!(path = %path, "Fetching secret from Vault");
        let response = self
            .http
            .get(self.url(path))
            .header(TOKEN_HEADER, &self.config.token)
            .send()
            .await
            .map_err(unreachable)?;
        let response = check_status(response, path).await?;

        let body: VaultResponse<KvV2Data> = response
            .json()
            .await
            .map_err(|e| SecretError::InvalidFormat(format!("{}: {}", path, e)))?;

        let data = Arc::new(body.data.data);
        self.cache.insert(path.to_string(), data.clone()).await;

        info!(path = %path, fields = data.len(), "Secret fetched and cached from Vault");

        Ok(data)
    }

    /// POST to `path` and decode the response's `data` object
    pub(crate) async fn write<B, T>(&self, path: &str, body: &B) -> Result<T, SecretError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.url(path))
            .header(TOKEN_HEADER, &self.config.token)
            .json(body)
            .send()
            .await
            .map_err(unreachable)?;
        let response = check_status(response, path).await?;

        let body: VaultResponse<T> = response
            .json()
            .await
            .map_err(|e| SecretError::InvalidFormat(format!("{}: {}", path, e)))?;
        Ok(body.data)
    }

    /// Invalidate cache for a specific secret (useful for manual rotation)
    pub async fn invalidate_cache(&self, path: &str) {
        self.cache.invalidate(path).await;
        info!(path = %path, "Secret cache invalidated");
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.config.address.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn read_secret(&self, path: &str) -> Result<Arc<SecretData>, SecretError> {
        self.get_secret(path).await
    }
}

fn unreachable(err: reqwest::Error) -> SecretError {
    SecretError::Unreachable(err.to_string())
}

async fn check_status(response: Response, path: &str) -> Result<Response, SecretError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::NOT_FOUND => Err(SecretError::NotFound(path.to_string())),
        StatusCode::FORBIDDEN => Err(SecretError::AccessDenied(path.to_string())),
        _ => {
            let errors = response.json::<VaultErrors>().await.unwrap_or_default();
            Err(SecretError::Http {
                status: status.as_u16(),
                message: errors.errors.join("; "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_cleanly() {
        let client = VaultClient::new(VaultConfig::new("http://vault:8200/", "t")).unwrap();
        assert_eq!(
            client.url("/hello-service/data/auth0"),
            "http://vault:8200/v1/hello-service/data/auth0"
        );
    }

    #[test]
    fn test_config_debug_redacts_token() {
        let config = VaultConfig::new("http://vault:8200", "s.very-secret");
        assert!(!format!("{:?}", config).contains("very-secret"));
    }
}
