//! Loopback link: same-process echo without a transport.
//!
//! Every send goes through the full codec path (and, for encrypted sends, a
//! real seal/open with the local key) before the package is delivered inline
//! on the caller's task. Plain sends deliver exactly what was sent, even an
//! envelope.

use std::sync::Arc;

use tracing::{debug, instrument};

use super::{LinkContext, LinkCore};
use crate::core::package::Package;
use crate::error::Result;
use crate::utils::crypto::PublicKey;

/// Transport identity of every loopback link
pub const LOOPBACK_IDENTITY: &str = "loopback";

#[derive(Clone)]
pub struct LoopbackLink {
    core: Arc<LinkCore>,
}

impl LoopbackLink {
    pub fn new(ctx: Arc<LinkContext>) -> Self {
        Self {
            core: Arc::new(LinkCore::new(LOOPBACK_IDENTITY.to_string(), ctx)),
        }
    }

    pub(crate) fn core(&self) -> &LinkCore {
        &self.core
    }

    /// Serialize, parse back and deliver.
    #[instrument(level = "debug", skip_all, fields(link = %self.core.id()))]
    pub fn send(&self, package: Package) -> Result<()> {
        let outcome = self.echo(package, None);
        self.core.finish_send(outcome)
    }

    /// Encrypt, serialize, parse back, decrypt and deliver.
    #[instrument(level = "debug", skip_all, fields(link = %self.core.id()))]
    pub fn send_encrypted(&self, package: Package, key: &PublicKey) -> Result<()> {
        let outcome = self.echo(package, Some(key));
        self.core.finish_send(outcome)
    }

    fn echo(&self, package: Package, key: Option<&PublicKey>) -> Result<usize> {
        self.core.ensure_connected()?;
        let ctx = self.core.ctx();

        let outbound = match key {
            Some(key) => {
                let envelope = package.encrypt(key)?;
                ctx.metrics.encryption();
                envelope
            }
            None => package,
        };

        let wire = outbound.serialize()?;
        let mut inbound = Package::deserialize(&wire)?;
        if key.is_some() {
            inbound = inbound.decrypt(&ctx.keys)?;
        }

        debug!(bytes = wire.len(), kind = %inbound.package_type(), "Loopback delivery");
        self.core.deliver(inbound, wire.len());
        Ok(wire.len() + 1)
    }

    pub fn disconnect(&self) {
        if self.core.begin_disconnect() {
            self.core.notify_disconnected();
        }
    }
}
