//! Configuration management for Hello Service
//!
//! Settings come from environment variables, with a `.env` file loaded first
//! in debug builds. Every value except the Vault address and token has a
//! default suitable for a local Vault dev server.
//!
//! # Example
//!
//! ```no_run
//! use hello_service::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("Listening on {}", settings.server.addr()?);
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use grpc_jwt_propagation::AuthorizationPolicy;
use grpc_tls::{
    CertificateIdentity, MinTlsVersion, ProvisionerConfig, RenewalPolicy, TransportSettings,
};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub vault: VaultSettings,
    pub pki: PkiSettings,
    pub auth: AuthSettings,
}

impl Settings {
    /// Load settings from environment variables (and `.env` in development)
    pub fn load() -> Result<Self> {
        load_dotenv();

        Ok(Settings {
            server: ServerSettings::from_env()?,
            vault: VaultSettings::from_env()?,
            pki: PkiSettings::from_env()?,
            auth: AuthSettings::from_env(),
        })
    }
}

fn load_dotenv() {
    if cfg!(debug_assertions) {
        dotenvy::dotenv().ok();
        info!("Loaded .env file for development");
    }
}

/// gRPC listener settings
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub min_tls_version: MinTlsVersion,
    pub handshake_timeout: Duration,
}

impl ServerSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("GRPC_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("GRPC_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("Invalid GRPC_PORT")?,
            min_tls_version: env::var("GRPC_MIN_TLS_VERSION")
                .unwrap_or_else(|_| "1.2".to_string())
                .parse()
                .context("Invalid GRPC_MIN_TLS_VERSION")?,
            handshake_timeout: Duration::from_secs(
                env::var("GRPC_HANDSHAKE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .context("Invalid GRPC_HANDSHAKE_TIMEOUT_SECS")?,
            ),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("Invalid server address")
    }

    pub fn transport(&self) -> TransportSettings {
        TransportSettings {
            min_tls_version: self.min_tls_version,
        }
    }
}

/// Vault connection settings
#[derive(Clone)]
pub struct VaultSettings {
    pub address: String,
    pub token: String,
    pub request_timeout: Duration,
    /// KV path holding the RSA public key (`pem` field)
    pub jwt_key_path: String,
}

impl VaultSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            address: env::var("VAULT_ADDR").context("VAULT_ADDR must be set")?,
            token: env::var("VAULT_TOKEN").context("VAULT_TOKEN must be set")?,
            request_timeout: Duration::from_secs(
                env::var("VAULT_REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .context("Invalid VAULT_REQUEST_TIMEOUT_SECS")?,
            ),
            jwt_key_path: env::var("JWT_KEY_SECRET_PATH")
                .unwrap_or_else(|_| "hello-service/data/auth0".to_string()),
        })
    }

    pub fn client_config(&self) -> vault_secrets::VaultConfig {
        vault_secrets::VaultConfig::new(&self.address, &self.token)
            .request_timeout(self.request_timeout)
    }
}

impl fmt::Debug for VaultSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSettings")
            .field("address", &self.address)
            .field("token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("jwt_key_path", &self.jwt_key_path)
            .finish()
    }
}

/// Certificate issuance and renewal settings
#[derive(Debug, Clone)]
pub struct PkiSettings {
    pub mount: String,
    pub role: String,
    pub common_name: String,
    pub alt_names: Vec<String>,
    /// Requested certificate lifetime; the role's default when unset
    pub ttl: Option<Duration>,
    pub issue_timeout: Duration,
    pub renew_before: Duration,
    pub renew_check_interval: Duration,
}

impl PkiSettings {
    fn from_env() -> Result<Self> {
        let ttl = match env::var("PKI_TTL_SECS") {
            Ok(raw) => Some(Duration::from_secs(
                raw.parse().context("Invalid PKI_TTL_SECS")?,
            )),
            Err(_) => None,
        };

        Ok(Self {
            mount: env::var("PKI_MOUNT").unwrap_or_else(|_| "grpc".to_string()),
            role: env::var("PKI_ROLE").unwrap_or_else(|_| "hello-service".to_string()),
            common_name: env::var("PKI_COMMON_NAME")
                .unwrap_or_else(|_| "grpc.example.com".to_string()),
            alt_names: split_csv(
                &env::var("PKI_ALT_NAMES").unwrap_or_else(|_| "localhost".to_string()),
            ),
            ttl,
            issue_timeout: Duration::from_secs(
                env::var("PKI_ISSUE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .context("Invalid PKI_ISSUE_TIMEOUT_SECS")?,
            ),
            renew_before: Duration::from_secs(
                env::var("PKI_RENEW_BEFORE_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .context("Invalid PKI_RENEW_BEFORE_SECS")?,
            ),
            renew_check_interval: Duration::from_secs(
                env::var("PKI_RENEW_CHECK_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .context("Invalid PKI_RENEW_CHECK_SECS")?,
            ),
        })
    }

    pub fn identity(&self) -> CertificateIdentity {
        CertificateIdentity::new(&self.common_name, self.alt_names.clone())
    }

    pub fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            issue_timeout: self.issue_timeout,
            ttl: self.ttl,
            ..ProvisionerConfig::default()
        }
    }

    pub fn renewal_policy(&self) -> RenewalPolicy {
        RenewalPolicy {
            check_interval: self.renew_check_interval,
            renew_before: self.renew_before,
            ..RenewalPolicy::default()
        }
    }
}

/// Claim predicates enforced on every call. Empty values are not checked.
#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    pub scope: String,
    pub audience: String,
    pub issuer: String,
    pub subject: String,
}

impl AuthSettings {
    fn from_env() -> Self {
        Self {
            scope: env::var("AUTH0_SCOPE").unwrap_or_default(),
            audience: env::var("AUTH0_AUDIENCE").unwrap_or_default(),
            issuer: env::var("AUTH0_ISSUER").unwrap_or_default(),
            subject: env::var("AUTH0_SUBJECT").unwrap_or_default(),
        }
    }

    pub fn policy(&self) -> AuthorizationPolicy {
        AuthorizationPolicy::new()
            .require_scope(&self.scope)
            .require_audience(&self.audience)
            .require_issuer(&self.issuer)
            .require_subject(&self.subject)
    }
}

/// Settings for the `hello-client` binary
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub vault: VaultSettings,
    pub pki: PkiSettings,
    /// KV path holding the OAuth client credentials
    pub credentials_path: String,
    pub server_url: String,
    /// Name the server certificate must carry
    pub tls_domain: String,
    pub calls: u32,
}

impl ClientSettings {
    pub fn load() -> Result<Self> {
        load_dotenv();

        Ok(Self {
            vault: VaultSettings::from_env()?,
            pki: PkiSettings::from_env()?,
            credentials_path: env::var("CLIENT_CREDENTIALS_SECRET_PATH")
                .unwrap_or_else(|_| "hello-service/data/auth0".to_string()),
            server_url: env::var("HELLO_SERVER_URL")
                .unwrap_or_else(|_| "https://localhost:3000".to_string()),
            tls_domain: env::var("HELLO_TLS_DOMAIN").unwrap_or_else(|_| "localhost".to_string()),
            calls: env::var("HELLO_CALLS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("Invalid HELLO_CALLS")?,
        })
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
