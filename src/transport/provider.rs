//! # Link Provider
//!
//! Owns the identity → link registry for one transport family.
//!
//! Creating a link and registering it happen under one registry lock, so two
//! live links never exist for the same identity. What happens when a second
//! connection arrives is decided by [`DuplicatePolicy`]:
//! - `ReplaceExisting` (default): the newer connection wins and the older
//!   link is disconnected in the background once the lock is released
//! - `RejectNew`: the newer connection is refused and its stream dropped
//!
//! Links only hold a weak reference back to the registry. A disconnect
//! notification removes the entry only if it still belongs to the notifying
//! link, so a replaced link cannot evict its successor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{DuplicatePolicy, LinkSettings};
use crate::error::{constants, ProtocolError, Result};
use crate::link::{
    Link, LinkContext, LinkDisconnectSink, LinkId, LoopbackLink, PackageReceiver, StreamLink,
    TransportKind, LOOPBACK_IDENTITY,
};
use crate::utils::crypto::KeyMaterial;
use crate::utils::metrics::{global_metrics, Metrics};

/// Capacity of the disconnect event channel
const DISCONNECT_EVENT_CAPACITY: usize = 64;

/// Broadcast to subscribers whenever a link of this provider disconnects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDisconnected {
    pub id: LinkId,
    pub identity: String,
    pub kind: TransportKind,
}

struct Registry {
    ctx: Arc<LinkContext>,
    policy: DuplicatePolicy,
    links: Mutex<HashMap<String, Link>>,
    events: broadcast::Sender<LinkDisconnected>,
}

impl Registry {
    fn links(&self) -> Result<MutexGuard<'_, HashMap<String, Link>>> {
        self.links
            .lock()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_REGISTRY_LOCK))
    }
}

impl LinkDisconnectSink for Registry {
    fn on_link_disconnected(&self, id: LinkId, identity: &str) {
        let removed = {
            let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
            match links.get(identity) {
                Some(current) if current.id() == id => links.remove(identity).is_some(),
                _ => false,
            }
        };

        if removed {
            info!(link = %id, identity, transport = %self.ctx.kind, "Link removed from registry");
        } else {
            debug!(link = %id, identity, "Disconnected link was no longer registered");
        }

        // No subscribers is fine
        let _ = self.events.send(LinkDisconnected {
            id,
            identity: identity.to_string(),
            kind: self.ctx.kind,
        });
    }
}

/// Factory and registry of links for one transport family
#[derive(Clone)]
pub struct LinkProvider {
    registry: Arc<Registry>,
}

impl LinkProvider {
    /// Provider recording into the process-wide metrics collector
    pub fn new(
        kind: TransportKind,
        settings: LinkSettings,
        keys: Arc<KeyMaterial>,
        receiver: Arc<dyn PackageReceiver>,
    ) -> Self {
        Self::with_metrics(kind, settings, keys, receiver, global_metrics())
    }

    /// Like `new`, recording into an existing metrics collector
    pub fn with_metrics(
        kind: TransportKind,
        settings: LinkSettings,
        keys: Arc<KeyMaterial>,
        receiver: Arc<dyn PackageReceiver>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let policy = settings.duplicate_policy;
        let (events, _) = broadcast::channel(DISCONNECT_EVENT_CAPACITY);

        let registry = Arc::new_cyclic(|weak: &Weak<Registry>| {
            let sink: Weak<dyn LinkDisconnectSink> = weak.clone();
            let ctx = LinkContext::new(kind, keys, receiver)
                .with_settings(settings)
                .with_metrics(metrics)
                .with_disconnect_sink(sink);
            Registry {
                ctx: Arc::new(ctx),
                policy,
                links: Mutex::new(HashMap::new()),
                events,
            }
        });

        Self { registry }
    }

    pub fn kind(&self) -> TransportKind {
        self.registry.ctx.kind
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.registry.policy
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.registry.ctx.metrics
    }

    /// Create (or replace) the loopback link
    pub async fn open_loopback(&self) -> Result<Link> {
        let ctx = Arc::clone(&self.registry.ctx);
        self.register(LOOPBACK_IDENTITY.to_string(), move || {
            Link::Loopback(LoopbackLink::new(ctx))
        })
        .await
    }

    /// Wrap a freshly accepted or established stream in a link.
    pub async fn add_connection<S>(&self, identity: impl Into<String>, stream: S) -> Result<Link>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let identity = identity.into();
        let ctx = Arc::clone(&self.registry.ctx);
        let link_identity = identity.clone();
        self.register(identity, move || {
            Link::Stream(StreamLink::spawn(link_identity, stream, ctx))
        })
        .await
    }

    async fn register<F>(&self, identity: String, make_link: F) -> Result<Link>
    where
        F: FnOnce() -> Link,
    {
        let (link, replaced) = {
            let mut links = self.registry.links()?;

            let duplicate = links.get(&identity).is_some_and(Link::is_connected);
            if duplicate && self.registry.policy == DuplicatePolicy::RejectNew {
                self.metrics().duplicate_connection();
                warn!(identity = %identity, "Refusing duplicate connection");
                return Err(ProtocolError::DuplicateConnection(identity));
            }

            let link = make_link();
            let replaced = links.insert(identity.clone(), link.clone());
            (link, replaced)
        };

        if let Some(old) = replaced.filter(Link::is_connected) {
            self.metrics().duplicate_connection();
            info!(identity = %identity, old = %old.id(), new = %link.id(), "Newer connection replaces existing link");
            // A stuck writer on the old link must not hold up the caller
            tokio::spawn(async move { old.disconnect().await });
        }

        Ok(link)
    }

    /// The live link for `identity`, if any
    pub fn link(&self, identity: &str) -> Option<Link> {
        self.registry.links().ok()?.get(identity).cloned()
    }

    /// Snapshot of all registered links
    pub fn links(&self) -> Vec<Link> {
        self.registry
            .links()
            .map(|links| links.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.registry.links().map(|links| links.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive an event for every link disconnect from now on
    pub fn subscribe_disconnects(&self) -> broadcast::Receiver<LinkDisconnected> {
        self.registry.events.subscribe()
    }

    /// Disconnect every registered link
    pub async fn disconnect_all(&self) {
        let links = self.links();
        info!(count = links.len(), transport = %self.kind(), "Disconnecting all links");
        for link in links {
            link.disconnect().await;
        }
        self.metrics().log_metrics();
    }
}

impl std::fmt::Debug for LinkProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkProvider")
            .field("kind", &self.kind())
            .field("policy", &self.policy())
            .field("links", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::core::package::Package;
    use crate::link::package_channel;
    use std::time::Duration;

    fn provider(policy: DuplicatePolicy) -> LinkProvider {
        let (receiver, _packages) = package_channel();
        let settings = LinkSettings {
            duplicate_policy: policy,
            ..LinkSettings::default()
        };
        LinkProvider::with_metrics(
            TransportKind::Memory,
            settings,
            Arc::new(KeyMaterial::from_private_bytes([31; 32])),
            Arc::new(receiver),
            Arc::new(Metrics::new()),
        )
    }

    #[tokio::test]
    async fn test_newer_connection_replaces_older() {
        let provider = provider(DuplicatePolicy::ReplaceExisting);
        let (a, _peer_a) = tokio::io::duplex(64);
        let (b, _peer_b) = tokio::io::duplex(64);

        let first = provider.add_connection("dev", a).await.unwrap();
        let second = provider.add_connection("dev", b).await.unwrap();

        wait_until_disconnected(&first).await;
        assert!(second.is_connected());
        assert_eq!(provider.len(), 1);
        assert_eq!(provider.link("dev").unwrap().id(), second.id());
        assert_eq!(provider.metrics().snapshot().duplicate_connections, 1);
    }

    async fn wait_until_disconnected(link: &Link) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while link.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("old link disconnected");
    }

    #[tokio::test]
    async fn test_replacement_not_blocked_by_stuck_writer() {
        let (receiver, _packages) = package_channel();
        let settings = LinkSettings {
            write_timeout: Duration::from_secs(5),
            ..LinkSettings::default()
        };
        let provider = LinkProvider::with_metrics(
            TransportKind::Memory,
            settings,
            Arc::new(KeyMaterial::from_private_bytes([32; 32])),
            Arc::new(receiver),
            Arc::new(Metrics::new()),
        );

        // Nobody reads `_peer_a`, so a large send parks inside the writer lock
        let (a, _peer_a) = tokio::io::duplex(64);
        let first = provider.add_connection("dev", a).await.unwrap();
        let stuck = first.clone();
        let pending = tokio::spawn(async move {
            let package = Package::new("kdeconnect.test").with_field("filler", "x".repeat(4096));
            stuck.send(package).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (b, _peer_b) = tokio::io::duplex(64);
        let second = tokio::time::timeout(
            Duration::from_millis(500),
            provider.add_connection("dev", b),
        )
        .await
        .expect("replacement registered without waiting on the old writer")
        .unwrap();

        assert_eq!(provider.link("dev").unwrap().id(), second.id());
        pending.abort();
    }

    #[tokio::test]
    async fn test_reject_new_keeps_existing() {
        let provider = provider(DuplicatePolicy::RejectNew);
        let (a, _peer_a) = tokio::io::duplex(64);
        let (b, _peer_b) = tokio::io::duplex(64);

        let first = provider.add_connection("dev", a).await.unwrap();
        let err = provider.add_connection("dev", b).await.unwrap_err();

        assert!(matches!(err, ProtocolError::DuplicateConnection(id) if id == "dev"));
        assert!(first.is_connected());
        assert_eq!(provider.link("dev").unwrap().id(), first.id());
    }

    #[tokio::test]
    async fn test_disconnect_removes_entry_and_emits_event() {
        let provider = provider(DuplicatePolicy::ReplaceExisting);
        let mut events = provider.subscribe_disconnects();
        let (a, _peer) = tokio::io::duplex(64);

        let link = provider.add_connection("dev", a).await.unwrap();
        link.disconnect().await;
        link.disconnect().await;

        assert!(provider.is_empty());
        let event = events.recv().await.unwrap();
        assert_eq!(event.id, link.id());
        assert_eq!(event.identity, "dev");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_loopback_registered_under_fixed_identity() {
        let provider = provider(DuplicatePolicy::ReplaceExisting);
        let link = provider.open_loopback().await.unwrap();
        assert_eq!(link.transport_identity(), LOOPBACK_IDENTITY);
        assert_eq!(provider.link(LOOPBACK_IDENTITY).unwrap().id(), link.id());

        provider.disconnect_all().await;
        assert!(provider.is_empty());
    }
}
