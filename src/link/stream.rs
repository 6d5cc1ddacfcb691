//! Stream link: a link over any bidirectional byte stream.
//!
//! Used for Bluetooth RFCOMM sockets, TCP and Unix-domain streams, and
//! in-memory duplex pipes in tests. Construction spawns the reader task; the
//! task ends when the link disconnects, and the stream is closed once both of
//! its halves are dropped.
//!
//! Concurrent sends on one link are serialized by the writer lock, so frames
//! never interleave on the wire. A write that fails or times out leaves the
//! stream mid-frame, so it disconnects the link after the failure is
//! reported to the caller.

use std::sync::Arc;

use bytes::BytesMut;
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{LinkContext, LinkCore};
use crate::core::codec::FrameCodec;
use crate::core::package::Package;
use crate::error::{ProtocolError, Result};
use crate::transport::reader::{StopReason, TransportReader};
use crate::utils::crypto::PublicKey;
use crate::utils::timeout::with_timeout_error;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type Writer = FramedWrite<BoxedWriter, FrameCodec>;

struct StreamInner {
    core: LinkCore,
    writer: Mutex<Option<Writer>>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct StreamLink {
    inner: Arc<StreamInner>,
}

impl StreamLink {
    /// Take ownership of `stream` and start reading from it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S>(identity: impl Into<String>, stream: S, ctx: Arc<LinkContext>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let codec = FrameCodec::with_max_frame_length(ctx.settings.max_frame_length);
        let buffer_capacity = ctx.settings.read_buffer_capacity;
        let (read_half, write_half) = tokio::io::split(stream);
        let writer: BoxedWriter = Box::new(write_half);

        let link = Self {
            inner: Arc::new(StreamInner {
                core: LinkCore::new(identity.into(), ctx),
                writer: Mutex::new(Some(FramedWrite::new(writer, codec.clone()))),
                shutdown: CancellationToken::new(),
            }),
        };

        let reader = TransportReader::new(read_half, codec, buffer_capacity);
        let task_link = link.clone();
        tokio::spawn(async move {
            let token = task_link.inner.shutdown.clone();
            let reason = reader.run(&token, |frame| task_link.handle_frame(frame)).await;
            task_link.reader_stopped(reason).await;
        });

        link
    }

    pub(crate) fn core(&self) -> &LinkCore {
        &self.inner.core
    }

    pub async fn send(&self, package: Package) -> Result<()> {
        let outcome = self.write_package(package, None).await;
        self.inner.core.finish_send(outcome)
    }

    pub async fn send_encrypted(&self, package: Package, key: &PublicKey) -> Result<()> {
        let outcome = self.write_package(package, Some(key)).await;
        self.inner.core.finish_send(outcome)
    }

    #[instrument(level = "debug", skip_all, fields(link = %self.inner.core.id()))]
    async fn write_package(&self, mut package: Package, key: Option<&PublicKey>) -> Result<usize> {
        let core = &self.inner.core;
        core.ensure_connected()?;

        if package.has_payload() {
            warn!(kind = %package.package_type(), "Payload transfer not supported on stream links, sending package without it");
            package.clear_payload();
        }

        let package = match key {
            Some(key) => {
                let envelope = package.encrypt(key)?;
                core.ctx().metrics.encryption();
                envelope
            }
            None => package,
        };
        let wire = package.serialize()?;
        let max_frame_length = core.ctx().settings.max_frame_length;
        if wire.len() > max_frame_length {
            return Err(ProtocolError::OversizedFrame(wire.len()));
        }
        let frame_len = wire.len() + 1;

        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        if !writer.write_buffer().is_empty() {
            // A send dropped by its caller left part of a frame behind
            let broken = guard.take();
            drop(guard);
            warn!("Previous send was cancelled mid-frame, dropping the link");
            self.abort(broken).await;
            return Err(ProtocolError::NotConnected);
        }

        if let Err(e) = with_timeout_error(writer.send(wire), core.ctx().settings.write_timeout).await {
            // Part of the frame may be on the wire or still buffered; the
            // stream cannot carry another frame.
            let broken = guard.take();
            drop(guard);
            warn!(error = %e, "Write failed, dropping the link");
            self.abort(broken).await;
            return Err(e);
        }

        debug!(bytes = frame_len, "Frame written");
        Ok(frame_len)
    }

    fn handle_frame(&self, frame: BytesMut) {
        let core = &self.inner.core;
        match Package::from_frame(&frame) {
            Ok(package) => core.receive(package, frame.len()),
            Err(e) => {
                warn!(link = %core.id(), bytes = frame.len(), error = %e, "Dropping undecodable frame");
                core.ctx().metrics.frame_dropped();
            }
        }
    }

    async fn reader_stopped(&self, reason: StopReason) {
        let core = &self.inner.core;
        match reason {
            StopReason::Cancelled => {
                debug!(link = %core.id(), "Reader cancelled");
            }
            StopReason::EndOfStream => {
                info!(link = %core.id(), identity = %core.identity(), "Remote closed the stream");
                self.disconnect().await;
            }
            StopReason::Failed(e) => {
                warn!(link = %core.id(), identity = %core.identity(), error = %e, "Connection likely broken");
                core.ctx().metrics.transport_error();
                self.disconnect().await;
            }
        }
    }

    /// Stop the reader, close the stream and notify the provider, once.
    pub async fn disconnect(&self) {
        if !self.inner.core.begin_disconnect() {
            return;
        }

        self.inner.shutdown.cancel();
        let writer = self.inner.writer.lock().await.take();
        self.close_writer(writer).await;
        self.inner.core.notify_disconnected();
    }

    /// Tear down after a failed write. `broken` was already taken out of the
    /// writer slot so no later send can flush its leftovers.
    async fn abort(&self, broken: Option<Writer>) {
        let first = self.inner.core.begin_disconnect();
        if first {
            self.inner.shutdown.cancel();
        }
        self.close_writer(broken).await;
        if first {
            self.inner.core.notify_disconnected();
        }
    }

    async fn close_writer(&self, writer: Option<Writer>) {
        let Some(mut writer) = writer else {
            return;
        };
        let core = &self.inner.core;
        let closed = tokio::time::timeout(
            core.ctx().settings.write_timeout,
            writer.get_mut().shutdown(),
        )
        .await;
        match closed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(link = %core.id(), error = %e, "Error closing stream"),
            Err(_) => debug!(link = %core.id(), "Timed out closing stream"),
        }
    }
}
