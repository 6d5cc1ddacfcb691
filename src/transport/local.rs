//! Unix-domain socket connection adapter.
//!
//! Unix peers have no useful address, so accepted links are named
//! `unix:<n>` in accept order; dialers choose their own identity.

use std::path::Path;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::link::Link;
use crate::transport::provider::LinkProvider;

/// Bind a Unix socket at `path` and accept links until `shutdown_rx` fires.
///
/// A stale socket file at `path` is removed before binding and the file is
/// removed again on shutdown.
#[instrument(skip(provider, path, shutdown_rx), fields(socket_path = %path.as_ref().display()))]
pub async fn serve<P: AsRef<Path>>(
    provider: LinkProvider,
    path: P,
    shutdown_timeout: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let path = path.as_ref().to_path_buf();
    if path.exists() {
        tokio::fs::remove_file(&path).await.ok();
    }

    let listener = UnixListener::bind(&path)?;
    info!(path = %path.display(), "Listening on unix socket");

    let mut accepted_count: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!(links = provider.len(), "Shutting down unix listener");
                if tokio::time::timeout(shutdown_timeout, provider.disconnect_all()).await.is_err() {
                    warn!("Shutdown timeout reached before all links closed");
                }

                if path.exists() {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        error!(error = %e, path = %path.display(), "Failed to remove socket file");
                    } else {
                        info!(path = %path.display(), "Removed socket file");
                    }
                }
                return Ok(());
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _)) => {
                        accepted_count += 1;
                        let identity = format!("unix:{accepted_count}");
                        match provider.add_connection(identity.clone(), stream).await {
                            Ok(link) => info!(link = %link.id(), identity = %identity, "Accepted link"),
                            Err(e) => warn!(identity = %identity, error = %e, "Rejected connection"),
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

/// Connect to the Unix socket at `path` and register the link as `identity`
#[instrument(skip(provider, path), fields(socket_path = %path.as_ref().display()))]
pub async fn connect<P: AsRef<Path>>(
    provider: &LinkProvider,
    path: P,
    identity: &str,
) -> Result<Link> {
    let stream = UnixStream::connect(path).await?;
    provider.add_connection(identity, stream).await
}
