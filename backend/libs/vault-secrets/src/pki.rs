//! Vault PKI secrets engine as a certificate issuing backend

use crate::{SecretError, VaultClient};
use async_trait::async_trait;
use grpc_tls::{IssueRequest, IssuedCertificate, PkiBackend, PkiBackendError};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Serialize)]
struct IssueBody<'a> {
    common_name: &'a str,
    alt_names: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<String>,
}

/// Issues certificates from `{mount}/issue/{role}`
#[derive(Clone)]
pub struct VaultPki {
    client: Arc<VaultClient>,
    mount: String,
    role: String,
}

impl VaultPki {
    pub fn new(client: Arc<VaultClient>, mount: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            client,
            mount: mount.into(),
            role: role.into(),
        }
    }

    fn issue_path(&self) -> String {
        format!("{}/issue/{}", self.mount.trim_matches('/'), self.role)
    }
}

#[async_trait]
impl PkiBackend for VaultPki {
    async fn issue(&self, request: &IssueRequest) -> Result<IssuedCertificate, PkiBackendError> {
        let path = self.issue_path();
        debug!(path = %path, common_name = %request.common_name, "Requesting certificate from Vault PKI");

        let body = IssueBody {
            common_name: &request.common_name,
            alt_names: &request.alt_names,
            ttl: request.ttl.map(|ttl| format!("{}s", ttl.as_secs())),
        };

        self.client
            .write(&path, &body)
            .await
            .map_err(|e| match e {
                SecretError::Unreachable(reason) => PkiBackendError::Unreachable(reason),
                SecretError::InvalidFormat(reason) => PkiBackendError::InvalidResponse(reason),
                SecretError::NotFound(path) => PkiBackendError::Rejected {
                    status: 404,
                    message: format!("no PKI role at {}", path),
                },
                SecretError::AccessDenied(path) => PkiBackendError::Rejected {
                    status: 403,
                    message: format!("token may not issue from {}", path),
                },
                SecretError::Http { status, message } => {
                    PkiBackendError::Rejected { status, message }
                }
            })
    }
}
