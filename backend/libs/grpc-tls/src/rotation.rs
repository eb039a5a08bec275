//! Hot certificate rotation
//!
//! The active bundle and the rustls config built from it travel together as one
//! immutable snapshot behind a `watch` channel. The renewal task is the single
//! writer; every new connection reads one snapshot, so a handshake never sees a
//! certificate from one bundle paired with a key from another.

use crate::bundle::{CredentialBundle, TransportSettings};
use crate::error::{TlsError, TlsResult};
use crate::provisioner::CertificateProvisioner;
use chrono::Utc;
use resilience::{with_retry_if, RetryConfig, RetryError};
use rustls::ServerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// One consistent (bundle, server config) pair
pub struct ActiveCredentials {
    pub bundle: Arc<CredentialBundle>,
    pub server_config: Arc<ServerConfig>,
}

impl ActiveCredentials {
    fn build(bundle: Arc<CredentialBundle>, settings: &TransportSettings) -> TlsResult<Self> {
        let server_config = Arc::new(bundle.server_config(settings)?);
        Ok(Self {
            bundle,
            server_config,
        })
    }
}

/// Shared handle to the credentials the listener accepts connections with
#[derive(Clone)]
pub struct ServerCredentials {
    settings: TransportSettings,
    sender: Arc<watch::Sender<Arc<ActiveCredentials>>>,
}

impl ServerCredentials {
    pub fn new(bundle: Arc<CredentialBundle>, settings: TransportSettings) -> TlsResult<Self> {
        bundle.ensure_valid_at(Utc::now())?;
        let active = Arc::new(ActiveCredentials::build(bundle, &settings)?);
        let (sender, _) = watch::channel(active);

        Ok(Self {
            settings,
            sender: Arc::new(sender),
        })
    }

    /// Snapshot of the active credentials
    pub fn current(&self) -> Arc<ActiveCredentials> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ActiveCredentials>> {
        self.sender.subscribe()
    }

    /// Swap in `bundle`. Returns `Ok(false)` if it is already active.
    ///
    /// The new server config is fully built before the swap; a bundle that
    /// fails to build leaves the active snapshot untouched.
    pub fn install(&self, bundle: Arc<CredentialBundle>) -> TlsResult<bool> {
        if Arc::ptr_eq(&self.current().bundle, &bundle) {
            return Ok(false);
        }

        bundle.ensure_valid_at(Utc::now())?;
        let next = Arc::new(ActiveCredentials::build(bundle, &self.settings)?);
        let previous = self.sender.send_replace(next);

        info!(
            previous_not_after = %previous.bundle.not_after(),
            not_after = %self.current().bundle.not_after(),
            "Server certificate rotated"
        );

        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    /// How often to check the active bundle's remaining lifetime
    pub check_interval: Duration,
    /// Renew when remaining lifetime drops to this or below
    pub renew_before: Duration,
    pub retry: RetryConfig,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
            renew_before: Duration::from_secs(3600),
            retry: RetryConfig {
                max_retries: 5,
                initial_backoff: Duration::from_secs(1),
                max_backoff: Duration::from_secs(60),
                ..RetryConfig::default()
            },
        }
    }
}

/// One renewal round: renew if due, retrying transient failures with backoff.
///
/// Returns whether a new bundle was installed. When retries run out the old
/// bundle keeps serving; only an already-expired bundle escalates to
/// `TlsError::Expired`. Parse failures are returned immediately.
pub async fn renew_once(
    provisioner: &CertificateProvisioner,
    credentials: &ServerCredentials,
    policy: &RenewalPolicy,
) -> TlsResult<bool> {
    let threshold = policy.renew_before;

    let renewed = with_retry_if(policy.retry.clone(), TlsError::is_retryable, move || {
        provisioner.renew_if_expiring_soon(threshold)
    })
    .await;

    match renewed {
        Ok(bundle) => credentials.install(bundle),
        Err(RetryError::Permanent(e)) => {
            error!(error = %e, "Certificate renewal failed permanently");
            Err(e)
        }
        Err(RetryError::MaxRetriesExceeded { retries, last }) => {
            let active = credentials.current();
            if active.bundle.is_valid_at(Utc::now()) {
                warn!(
                    error = %last,
                    retries = retries,
                    not_after = %active.bundle.not_after(),
                    "Certificate renewal failed, still serving the current bundle"
                );
                Ok(false)
            } else {
                error!(
                    error = %last,
                    not_after = %active.bundle.not_after(),
                    "Certificate renewal failed and the current bundle has expired"
                );
                Err(TlsError::Expired {
                    not_after: active.bundle.not_after(),
                })
            }
        }
    }
}

/// Run renewal rounds every `check_interval` until one fails fatally
pub async fn run_renewal_loop(
    provisioner: Arc<CertificateProvisioner>,
    credentials: ServerCredentials,
    policy: RenewalPolicy,
) -> TlsResult<()> {
    let mut ticker = tokio::time::interval(policy.check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; the bundle was just issued
    ticker.tick().await;

    loop {
        ticker.tick().await;
        debug!("Checking certificate lifetime");
        renew_once(&provisioner, &credentials, &policy).await?;
    }
}

pub fn spawn_renewal_task(
    provisioner: Arc<CertificateProvisioner>,
    credentials: ServerCredentials,
    policy: RenewalPolicy,
) -> JoinHandle<TlsResult<()>> {
    info!(
        check_interval = ?policy.check_interval,
        renew_before = ?policy.renew_before,
        "Starting certificate renewal task"
    );
    tokio::spawn(run_renewal_loop(provisioner, credentials, policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert_generation::DevelopmentPki;
    use crate::provisioner::{
        IssueRequest, IssuedCertificate, PkiBackend, PkiBackendError, ProvisionerConfig,
    };
    use crate::san_validation::CertificateIdentity;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Development PKI that can be switched off to simulate an outage
    struct FlakyBackend {
        pki: DevelopmentPki,
        down: AtomicBool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl PkiBackend for FlakyBackend {
        async fn issue(&self, request: &IssueRequest) -> Result<IssuedCertificate, PkiBackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(PkiBackendError::Unreachable("connection refused".to_string()));
            }
            self.pki.issue(request).await
        }
    }

    fn fast_policy(renew_before: Duration) -> RenewalPolicy {
        RenewalPolicy {
            check_interval: Duration::from_millis(50),
            renew_before,
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                backoff_multiplier: 2.0,
                jitter: false,
            },
        }
    }

    async fn setup(ttl: Duration) -> (Arc<FlakyBackend>, Arc<CertificateProvisioner>, ServerCredentials) {
        let backend = Arc::new(FlakyBackend {
            pki: DevelopmentPki::new().unwrap(),
            down: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        });
        let provisioner = Arc::new(CertificateProvisioner::new(
            backend.clone(),
            ProvisionerConfig {
                ttl: Some(ttl),
                ..ProvisionerConfig::default()
            },
        ));
        let identity = CertificateIdentity::new("grpc.example.com", vec!["localhost".to_string()]);
        let bundle = provisioner.issue(&identity).await.unwrap();
        let credentials = ServerCredentials::new(bundle, TransportSettings::default()).unwrap();
        (backend, provisioner, credentials)
    }

    #[tokio::test]
    async fn test_install_same_bundle_is_noop() {
        let (_, provisioner, credentials) = setup(Duration::from_secs(3600)).await;
        let bundle = provisioner.cached().unwrap();

        assert!(!credentials.install(bundle).unwrap());
    }

    #[tokio::test]
    async fn test_install_swaps_whole_snapshot() {
        let (backend, _, credentials) = setup(Duration::from_secs(3600)).await;
        let mut updates = credentials.subscribe();
        let before = credentials.current();

        let fresh = backend
            .pki
            .issue_for("grpc.example.com", &["localhost".to_string()], Duration::from_secs(7200))
            .unwrap()
            .into_bundle()
            .unwrap();
        assert!(credentials.install(Arc::new(fresh)).unwrap());

        assert!(updates.has_changed().unwrap());
        let after = updates.borrow_and_update().clone();
        assert!(!Arc::ptr_eq(&before.bundle, &after.bundle));
        assert!(!Arc::ptr_eq(&before.server_config, &after.server_config));
        assert!(after.bundle.not_after() > before.bundle.not_after());
    }

    #[tokio::test]
    async fn test_expired_bundle_is_never_installed() {
        let (backend, _, credentials) = setup(Duration::from_secs(3600)).await;
        let now = time::OffsetDateTime::now_utc();
        let stale = backend
            .pki
            .issue_with_validity(
                "grpc.example.com",
                &["localhost".to_string()],
                now - time::Duration::hours(2),
                now - time::Duration::hours(1),
            )
            .unwrap()
            .into_bundle()
            .unwrap();

        let result = credentials.install(Arc::new(stale));
        assert!(matches!(result, Err(TlsError::Expired { .. })));
        assert!(credentials.current().bundle.is_valid_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_renew_once_rotates_inside_threshold() {
        let (_, provisioner, credentials) = setup(Duration::from_secs(600)).await;
        let before = credentials.current();

        let rotated = renew_once(&provisioner, &credentials, &fast_policy(Duration::from_secs(3600)))
            .await
            .unwrap();

        assert!(rotated);
        assert!(!Arc::ptr_eq(&before.bundle, &credentials.current().bundle));
    }

    #[tokio::test]
    async fn test_renew_once_outside_threshold_keeps_bundle() {
        let (backend, provisioner, credentials) = setup(Duration::from_secs(3600)).await;

        let rotated = renew_once(&provisioner, &credentials, &fast_policy(Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(!rotated);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_outage_keeps_serving_valid_bundle() {
        let (backend, provisioner, credentials) = setup(Duration::from_secs(600)).await;
        let before = credentials.current();
        backend.down.store(true, Ordering::SeqCst);

        let rotated = renew_once(&provisioner, &credentials, &fast_policy(Duration::from_secs(3600)))
            .await
            .unwrap();

        assert!(!rotated);
        // initial issue + first attempt + 2 retries
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
        assert!(Arc::ptr_eq(&before.bundle, &credentials.current().bundle));
    }

    #[tokio::test]
    async fn test_renewal_task_rotates_in_background() {
        let (_, provisioner, credentials) = setup(Duration::from_secs(600)).await;
        let mut updates = credentials.subscribe();

        let handle = spawn_renewal_task(
            provisioner,
            credentials.clone(),
            fast_policy(Duration::from_secs(3600)),
        );

        tokio::time::timeout(Duration::from_secs(10), updates.changed())
            .await
            .expect("renewal task never rotated")
            .unwrap();

        handle.abort();
    }
}
