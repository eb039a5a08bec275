/// Demo caller for HelloService
///
/// Issues a client certificate from Vault PKI, exchanges the client
/// credentials stored in Vault for an access token, then calls `SayHello`
/// `HELLO_CALLS` times with a random pause between calls.
use anyhow::{anyhow, Context, Result};
use grpc_tls::CertificateProvisioner;
use hello_service::client::{connect, fetch_client_credentials_token};
use hello_service::config::ClientSettings;
use hello_service::grpc::HelloRequest;
use rand::Rng;
use resilience::{with_retry, RetryConfig, RetryError};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vault_secrets::{read_kv, ClientCredentialsSecret, VaultClient, VaultPki};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(err) = rustls::crypto::ring::default_provider().install_default() {
        return Err(anyhow!("Unable to install TLS crypto provider: {:?}", err));
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "hello_client=info,hello_service=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    let settings = ClientSettings::load().context("Failed to load configuration")?;

    let vault = Arc::new(
        VaultClient::new(settings.vault.client_config())
            .context("Failed to initialize Vault client")?,
    );
    let pki = Arc::new(VaultPki::new(
        vault.clone(),
        &settings.pki.mount,
        &settings.pki.role,
    ));
    let provisioner = CertificateProvisioner::new(pki, settings.pki.provisioner_config());
    let bundle = provisioner
        .issue(&settings.pki.identity())
        .await
        .context("Failed to provision client certificate")?;

    let credentials: ClientCredentialsSecret = read_kv(vault.as_ref(), &settings.credentials_path)
        .await
        .context("Failed to read client credentials")?;

    let http = reqwest::Client::builder()
        .timeout(settings.vault.request_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let token = with_retry(RetryConfig::default(), || {
        fetch_client_credentials_token(&http, &credentials)
    })
    .await
    .map_err(RetryError::into_inner)?;

    let mut client = connect(
        &settings.server_url,
        &settings.tls_domain,
        &bundle,
        &token,
    )
    .await?;

    for call in 1..=settings.calls {
        let response = client
            .say_hello(HelloRequest {
                name: "Jamie".to_string(),
            })
            .await
            .context("SayHello failed")?;
        info!(call = call, reply = %response.into_inner().name, "SayHello");

        if call < settings.calls {
            let pause = rand::thread_rng().gen_range(0..10);
            tokio::time::sleep(Duration::from_secs(pause)).await;
        }
    }

    Ok(())
}
