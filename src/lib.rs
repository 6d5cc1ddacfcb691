//! # package-link
//!
//! Transport-agnostic links that exchange framed, optionally end-to-end
//! encrypted packages between two devices.
//!
//! A [`LinkProvider`] turns live connections (a loopback echo, a Bluetooth
//! RFCOMM socket, a TCP or Unix stream) into [`Link`]s. Every link offers
//! the same operations: send, send encrypted, disconnect. Inbound packages
//! are reassembled from newline-delimited JSON frames, decrypted when needed
//! and handed to a [`PackageReceiver`].
//!
//! ## Modules
//! - `core`: package type and frame codec
//! - `link`: link variants, inbound sink and delivery callbacks
//! - `transport`: reader state machine, providers, TCP/Unix adapters
//! - `utils`: crypto, logging, metrics, timeouts
//! - `config`: TOML/env configuration
//! - `error`: error taxonomy
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use package_link::config::LinkSettings;
//! use package_link::link::{package_channel, TransportKind};
//! use package_link::{KeyMaterial, LinkProvider, Package};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> package_link::Result<()> {
//! let keys = Arc::new(KeyMaterial::from_private_bytes([7; 32]));
//! let (receiver, mut inbound) = package_channel();
//! let provider = LinkProvider::new(
//!     TransportKind::Loopback,
//!     LinkSettings::default(),
//!     Arc::clone(&keys),
//!     Arc::new(receiver),
//! );
//!
//! let link = provider.open_loopback().await?;
//! link.send_encrypted(Package::new("kdeconnect.ping"), &keys.public_key()).await?;
//!
//! let received = inbound.next().await.expect("delivered");
//! assert!(received.package.is_type("kdeconnect.ping"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod link;
pub mod transport;
pub mod utils;

pub use crate::core::codec::FrameCodec;
pub use crate::core::package::{Package, PACKAGE_TYPE_ENCRYPTED};
pub use config::{DuplicatePolicy, LinkConfig, LinkSettings};
pub use error::{ProtocolError, Result};
pub use link::{DeliveryCallback, Link, LinkId, PackageReceiver, TransportKind};
pub use transport::LinkProvider;
pub use utils::crypto::{KeyMaterial, PublicKey};
