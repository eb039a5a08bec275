//! Service bootstrap
//!
//! Wires the provisioned credential bundle into the mTLS listener and the
//! authorization gate in front of the `HelloService` handler:
//!
//! 1. issue the server certificate (failure is fatal, nothing is cached yet)
//! 2. load the JWT verification key from secret storage
//! 3. build the authorization policy from configuration
//! 4. bind the listener with mandatory client certificates
//! 5. serve, with the renewal task running beside the server
//!
//! The collaborators (PKI backend and secret store) are injected so the same
//! wiring runs against Vault in production and in-process fakes in tests.

use crate::config::Settings;
use crate::grpc::{HelloGreeter, HelloServiceServer};
use anyhow::{anyhow, Context, Result};
use grpc_jwt_propagation::{
    AuthorizationInterceptor, ClaimsValidator, CorrelationIdGate, GatePipeline, VerificationKey,
};
use grpc_tls::{
    spawn_renewal_task, CertificateProvisioner, MtlsListener, PkiBackend, RenewalPolicy,
    ServerCredentials,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Server;
use tracing::{error, info};
use vault_secrets::{read_kv, JwtVerificationSecret, SecretStore, VaultClient, VaultPki};

/// Everything the server needs, assembled but not yet listening
pub struct PreparedService {
    provisioner: Arc<CertificateProvisioner>,
    credentials: ServerCredentials,
    pipeline: GatePipeline,
    renewal: RenewalPolicy,
    handshake_timeout: Duration,
}

impl PreparedService {
    /// Provision credentials, load the verification key and build the gate pipeline
    pub async fn prepare(
        settings: &Settings,
        pki: Arc<dyn PkiBackend>,
        secrets: &dyn SecretStore,
    ) -> Result<Self> {
        let provisioner = Arc::new(CertificateProvisioner::new(
            pki,
            settings.pki.provisioner_config(),
        ));
        let bundle = provisioner
            .issue(&settings.pki.identity())
            .await
            .context("Failed to provision server certificate")?;
        info!(
            common_name = %settings.pki.common_name,
            not_after = %bundle.not_after(),
            "Server certificate provisioned"
        );

        let secret: JwtVerificationSecret = read_kv(secrets, &settings.vault.jwt_key_path)
            .await
            .context("Failed to read JWT verification key")?;
        let key = VerificationKey::from_rsa_pem(secret.pem.as_bytes())
            .context("Failed to parse JWT verification key")?;
        info!(path = %settings.vault.jwt_key_path, "JWT verification key loaded");

        let policy = settings.auth.policy();
        info!(predicates = policy.predicate_count(), "Authorization policy configured");

        let credentials = ServerCredentials::new(bundle, settings.server.transport())
            .context("Failed to build server TLS config")?;

        // Authorization runs first; nothing after it sees an unauthenticated call
        let pipeline = GatePipeline::new()
            .with_gate(AuthorizationInterceptor::new(ClaimsValidator::with_key(
                key, policy,
            )))
            .with_gate(CorrelationIdGate);

        Ok(Self {
            provisioner,
            credentials,
            pipeline,
            renewal: settings.pki.renewal_policy(),
            handshake_timeout: settings.server.handshake_timeout,
        })
    }

    pub fn credentials(&self) -> &ServerCredentials {
        &self.credentials
    }

    pub async fn bind(&self, addr: SocketAddr) -> Result<MtlsListener> {
        MtlsListener::bind(addr, self.credentials.clone(), self.handshake_timeout)
            .await
            .with_context(|| format!("Failed to bind {}", addr))
    }

    /// Serve until `shutdown` resolves or certificate renewal fails fatally
    pub async fn serve_with_shutdown<F>(self, listener: MtlsListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            addr = %listener.local_addr()?,
            gates = ?self.pipeline.gate_names(),
            "Starting gRPC server"
        );

        let mut renewal = spawn_renewal_task(self.provisioner, self.credentials, self.renewal);

        let server = Server::builder()
            .add_service(HelloServiceServer::with_interceptor(
                HelloGreeter,
                self.pipeline,
            ))
            .serve_with_incoming_shutdown(listener.into_incoming(), shutdown);

        tokio::select! {
            result = server => {
                renewal.abort();
                result.context("gRPC server error")
            }
            joined = &mut renewal => {
                let err = match joined {
                    Ok(Ok(())) => anyhow!("Certificate renewal task stopped"),
                    Ok(Err(e)) => anyhow::Error::new(e).context("Certificate renewal failed"),
                    Err(e) => anyhow::Error::new(e).context("Certificate renewal task panicked"),
                };
                error!(error = %err, "Stopping server");
                Err(err)
            }
        }
    }
}

/// Production wiring against Vault
pub async fn run<F>(settings: Settings, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let vault = Arc::new(
        VaultClient::new(settings.vault.client_config())
            .context("Failed to initialize Vault client")?,
    );
    let pki = Arc::new(VaultPki::new(
        vault.clone(),
        &settings.pki.mount,
        &settings.pki.role,
    ));

    let service = PreparedService::prepare(&settings, pki, vault.as_ref()).await?;
    let listener = service.bind(settings.server.addr()?).await?;

    service.serve_with_shutdown(listener, shutdown).await
}
