//! # Transports
//!
//! How byte streams become links.
//!
//! - **reader**: frame reassembly state machine for stream transports
//! - **provider**: per-transport-family link factory and registry
//! - **tcp**: accept loop and dialer for TCP streams
//! - **local**: accept loop and dialer for Unix-domain sockets (unix only)
//!
//! Bluetooth RFCOMM sockets, or any other `AsyncRead + AsyncWrite` stream,
//! go straight to [`LinkProvider::add_connection`].

#[cfg(unix)]
pub mod local;
pub mod provider;
pub mod reader;
pub mod tcp;

pub use provider::{LinkDisconnected, LinkProvider};
pub use reader::{ReaderState, StopReason, TransportReader};
