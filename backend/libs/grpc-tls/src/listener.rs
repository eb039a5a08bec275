//! TCP listener that terminates mTLS with the currently active credentials
//!
//! Each accepted connection takes one snapshot of [`ServerCredentials`] and
//! handshakes with it, so connections that are already established keep the
//! bundle they negotiated and new connections pick up rotated bundles.

use crate::error::TlsResult;
use crate::rotation::ServerCredentials;
use chrono::Utc;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Server side of an established mTLS connection
pub type MtlsStream = tokio_rustls::server::TlsStream<TcpStream>;

const INCOMING_BACKLOG: usize = 64;

pub struct MtlsListener {
    listener: TcpListener,
    credentials: ServerCredentials,
    handshake_timeout: Duration,
}

impl MtlsListener {
    pub async fn bind(
        addr: SocketAddr,
        credentials: ServerCredentials,
        handshake_timeout: Duration,
    ) -> TlsResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "mTLS listener bound");

        Ok(Self {
            listener,
            credentials,
            handshake_timeout,
        })
    }

    pub fn local_addr(&self) -> TlsResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Stream of completed handshakes, suitable for `Server::serve_with_incoming`.
    ///
    /// Failed handshakes are logged and dropped; they never surface as stream
    /// errors, which would shut the server down.
    pub fn into_incoming(self) -> ReceiverStream<Result<MtlsStream, io::Error>> {
        let (tx, rx) = mpsc::channel(INCOMING_BACKLOG);
        tokio::spawn(accept_loop(self, tx));
        ReceiverStream::new(rx)
    }
}

async fn accept_loop(listener: MtlsListener, tx: mpsc::Sender<Result<MtlsStream, io::Error>>) {
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept TCP connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
            _ = tx.closed() => {
                debug!("Incoming stream dropped, stopping accept loop");
                return;
            }
        };

        let active = listener.credentials.current();
        if !active.bundle.is_valid_at(Utc::now()) {
            warn!(
                peer = %peer,
                not_after = %active.bundle.not_after(),
                "Refusing connection: server certificate expired"
            );
            continue;
        }

        let acceptor = TlsAcceptor::from(active.server_config.clone());
        let handshake_timeout = listener.handshake_timeout;
        let tx = tx.clone();

        tokio::spawn(async move {
            match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => {
                    let presented = tls
                        .get_ref()
                        .1
                        .peer_certificates()
                        .map_or(0, |certs| certs.len());
                    debug!(peer = %peer, client_chain_len = presented, "mTLS handshake complete");
                    let _ = tx.send(Ok(tls)).await;
                }
                Ok(Err(e)) => {
                    warn!(peer = %peer, error = %e, "mTLS handshake failed");
                }
                Err(_) => {
                    warn!(peer = %peer, timeout = ?handshake_timeout, "mTLS handshake timed out");
                }
            }
        });
    }
}
