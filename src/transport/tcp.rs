//! TCP connection adapter.
//!
//! Accepted and dialed streams are handed to a [`LinkProvider`]; the peer's
//! socket address becomes the link's transport identity.

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::TcpConfig;
use crate::error::Result;
use crate::link::Link;
use crate::transport::provider::LinkProvider;

/// Bind `config.address` and accept links until `shutdown_rx` fires.
#[instrument(skip(provider, config, shutdown_rx), fields(address = %config.address))]
pub async fn serve(
    provider: LinkProvider,
    config: &TcpConfig,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(&config.address).await?;
    serve_listener(provider, listener, config.shutdown_timeout, shutdown_rx).await
}

/// Accept loop over an already bound listener.
///
/// On shutdown every link of `provider` is disconnected, bounded by
/// `shutdown_timeout`.
#[instrument(skip(provider, listener, shutdown_rx))]
pub async fn serve_listener(
    provider: LinkProvider,
    listener: TcpListener,
    shutdown_timeout: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    info!(local = ?listener.local_addr().ok(), "Accepting TCP links");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!(links = provider.len(), "Shutting down TCP listener");
                if tokio::time::timeout(shutdown_timeout, provider.disconnect_all()).await.is_err() {
                    warn!("Shutdown timeout reached before all links closed");
                }
                return Ok(());
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        match provider.add_connection(peer.to_string(), stream).await {
                            Ok(link) => info!(link = %link.id(), peer = %peer, "Accepted link"),
                            Err(e) => warn!(peer = %peer, error = %e, "Rejected connection"),
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}

/// Dial `address` and register the resulting link with `provider`
#[instrument(skip(provider))]
pub async fn connect(provider: &LinkProvider, address: &str) -> Result<Link> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    provider.add_connection(peer.to_string(), stream).await
}
