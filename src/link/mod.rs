//! # Links
//!
//! A link is a live channel to one remote endpoint. Callers send and receive
//! [`Package`]s through it without knowing which transport carries them.
//!
//! ## Variants
//! - **Loopback**: same-process echo, fully synchronous, no transport
//! - **Stream**: any bidirectional byte stream (RFCOMM socket, TCP, Unix
//!   socket, in-memory duplex) with one background reader task
//!
//! ## Lifecycle
//! A link starts connected and becomes disconnected exactly once, on local
//! `disconnect()`, remote close, or a read error. After that every send fails
//! with [`ProtocolError::NotConnected`] without touching the transport, and
//! the creating provider hears about it exactly once.

pub mod callback;
pub mod loopback;
pub mod stream;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, trace, warn};

use crate::config::LinkSettings;
use crate::core::package::Package;
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::{KeyMaterial, PublicKey};
use crate::utils::metrics::Metrics;

pub use callback::{callback_fn, DeliveryCallback, FnCallback};
pub use loopback::{LoopbackLink, LOOPBACK_IDENTITY};
pub use stream::StreamLink;

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique link identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    fn next() -> Self {
        Self(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Transport family a link runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Loopback,
    Bluetooth,
    Tcp,
    UnixSocket,
    Memory,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Loopback => "loopback",
            TransportKind::Bluetooth => "bluetooth",
            TransportKind::Tcp => "tcp",
            TransportKind::UnixSocket => "unix",
            TransportKind::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Inbound delivery sink, implemented by the device-facing layer.
///
/// Called inline from the link's reader task (or the caller's task for
/// loopback), so implementations must not block for long.
pub trait PackageReceiver: Send + Sync {
    fn on_package_received(&self, identity: &str, package: Package);
}

/// Receives the one disconnect notification each link emits.
pub trait LinkDisconnectSink: Send + Sync {
    fn on_link_disconnected(&self, id: LinkId, identity: &str);
}

/// A package together with the identity of the link it arrived on
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPackage {
    pub identity: String,
    pub package: Package,
}

/// [`PackageReceiver`] that forwards into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelReceiver {
    tx: mpsc::UnboundedSender<ReceivedPackage>,
}

impl PackageReceiver for ChannelReceiver {
    fn on_package_received(&self, identity: &str, package: Package) {
        let received = ReceivedPackage {
            identity: identity.to_string(),
            package,
        };
        if self.tx.send(received).is_err() {
            trace!(identity, "Inbound channel closed, dropping package");
        }
    }
}

/// Create a channel-backed receiver and the stream of packages it yields
pub fn package_channel() -> (ChannelReceiver, UnboundedReceiverStream<ReceivedPackage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelReceiver { tx }, UnboundedReceiverStream::new(rx))
}

struct Detached;

impl LinkDisconnectSink for Detached {
    fn on_link_disconnected(&self, _id: LinkId, _identity: &str) {}
}

/// Everything a link needs from its surroundings, shared by all links of one
/// provider.
pub struct LinkContext {
    pub(crate) kind: TransportKind,
    pub(crate) keys: Arc<KeyMaterial>,
    pub(crate) receiver: Arc<dyn PackageReceiver>,
    pub(crate) settings: LinkSettings,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) provider: Weak<dyn LinkDisconnectSink>,
}

impl LinkContext {
    /// Context with default settings, its own metrics, and no provider
    pub fn new(
        kind: TransportKind,
        keys: Arc<KeyMaterial>,
        receiver: Arc<dyn PackageReceiver>,
    ) -> Self {
        let detached: Weak<dyn LinkDisconnectSink> = Weak::<Detached>::new();
        Self {
            kind,
            keys,
            receiver,
            settings: LinkSettings::default(),
            metrics: Arc::new(Metrics::new()),
            provider: detached,
        }
    }

    pub fn with_settings(mut self, settings: LinkSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Route disconnect notifications to `sink` without keeping it alive
    pub fn with_disconnect_sink(mut self, sink: Weak<dyn LinkDisconnectSink>) -> Self {
        self.provider = sink;
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

impl fmt::Debug for LinkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkContext")
            .field("kind", &self.kind)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// State shared by every link variant
pub(crate) struct LinkCore {
    id: LinkId,
    identity: String,
    connected: AtomicBool,
    ctx: Arc<LinkContext>,
}

impl LinkCore {
    pub(crate) fn new(identity: String, ctx: Arc<LinkContext>) -> Self {
        let id = LinkId::next();
        ctx.metrics.link_opened();
        info!(link = %id, identity = %identity, transport = %ctx.kind, "Link opened");
        Self {
            id,
            identity,
            connected: AtomicBool::new(true),
            ctx,
        }
    }

    pub(crate) fn id(&self) -> LinkId {
        self.id
    }

    pub(crate) fn identity(&self) -> &str {
        &self.identity
    }

    pub(crate) fn ctx(&self) -> &LinkContext {
        &self.ctx
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ProtocolError::NotConnected)
        }
    }

    /// Flip to disconnected. Returns true only for the first caller.
    pub(crate) fn begin_disconnect(&self) -> bool {
        self.connected.swap(false, Ordering::AcqRel)
    }

    /// Tell the provider. Must follow a successful `begin_disconnect`.
    pub(crate) fn notify_disconnected(&self) {
        self.ctx.metrics.link_closed();
        info!(link = %self.id, identity = %self.identity, transport = %self.ctx.kind, "Link disconnected");
        if let Some(provider) = self.ctx.provider.upgrade() {
            provider.on_link_disconnected(self.id, &self.identity);
        }
    }

    /// Inbound path from the wire: open envelopes, then hand off.
    pub(crate) fn receive(&self, package: Package, wire_len: usize) {
        let package = if package.is_encrypted() {
            match package.decrypt(&self.ctx.keys) {
                Ok(plain) => plain,
                Err(e) => {
                    warn!(link = %self.id, identity = %self.identity, error = %e, "Dropping package that failed to decrypt");
                    self.ctx.metrics.decryption_failed();
                    self.ctx.metrics.frame_dropped();
                    return;
                }
            }
        } else {
            package
        };
        self.deliver(package, wire_len);
    }

    /// Hand a package to the receiver as is
    pub(crate) fn deliver(&self, package: Package, wire_len: usize) {
        if !self.is_connected() {
            debug!(link = %self.id, "Link disconnected, dropping inbound package");
            return;
        }

        trace!(link = %self.id, kind = %package.package_type(), "Delivering package");
        self.ctx.metrics.package_received(wire_len as u64);
        self.ctx.receiver.on_package_received(&self.identity, package);
    }

    /// Account for a finished send and pass the outcome through
    pub(crate) fn finish_send(&self, outcome: Result<usize>) -> Result<()> {
        match outcome {
            Ok(bytes) => {
                self.ctx.metrics.package_sent(bytes as u64);
                Ok(())
            }
            Err(e) => {
                self.ctx.metrics.send_failed();
                if e.is_transport() {
                    self.ctx.metrics.transport_error();
                }
                warn!(link = %self.id, identity = %self.identity, error = %e, "Send failed");
                Err(e)
            }
        }
    }
}

/// A live channel to one remote endpoint
#[derive(Clone)]
pub enum Link {
    Loopback(LoopbackLink),
    Stream(StreamLink),
}

impl Link {
    fn core(&self) -> &LinkCore {
        match self {
            Link::Loopback(link) => link.core(),
            Link::Stream(link) => link.core(),
        }
    }

    pub fn id(&self) -> LinkId {
        self.core().id()
    }

    /// Remote endpoint identifier, stable for the owning device
    pub fn transport_identity(&self) -> &str {
        self.core().identity()
    }

    pub fn kind(&self) -> TransportKind {
        self.core().ctx().kind
    }

    pub fn is_connected(&self) -> bool {
        self.core().is_connected()
    }

    /// Serialize and write one package.
    pub async fn send(&self, package: Package) -> Result<()> {
        match self {
            Link::Loopback(link) => link.send(package),
            Link::Stream(link) => link.send(package).await,
        }
    }

    /// Seal `package` to `key`, then send it. Encryption failures never
    /// reach the transport.
    pub async fn send_encrypted(&self, package: Package, key: &PublicKey) -> Result<()> {
        match self {
            Link::Loopback(link) => link.send_encrypted(package, key),
            Link::Stream(link) => link.send_encrypted(package, key).await,
        }
    }

    /// Send and report the outcome through `callback`, exactly once.
    pub async fn send_with_callback<C>(&self, package: Package, key: Option<&PublicKey>, callback: C)
    where
        C: DeliveryCallback,
    {
        let outcome = match key {
            Some(key) => self.send_encrypted(package, key).await,
            None => self.send(package).await,
        };
        callback.complete(outcome);
    }

    /// Close the link. Idempotent.
    pub async fn disconnect(&self) {
        match self {
            Link::Loopback(link) => link.disconnect(),
            Link::Stream(link) => link.disconnect().await,
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core();
        f.debug_struct("Link")
            .field("id", &core.id())
            .field("identity", &core.identity())
            .field("kind", &core.ctx().kind)
            .field("connected", &core.is_connected())
            .finish()
    }
}

impl From<LoopbackLink> for Link {
    fn from(link: LoopbackLink) -> Self {
        Link::Loopback(link)
    }
}

impl From<StreamLink> for Link {
    fn from(link: StreamLink) -> Self {
        Link::Stream(link)
    }
}
