//! # Error Types
//!
//! Error handling for links, framing and package encryption.
//!
//! Every failure in this crate resolves to one of three outcomes: a dropped
//! inbound frame, a reported send failure, or an explicit disconnect. The
//! variants below carry enough context to tell which of those happened.
//!
//! ## Error Categories
//! - **Serialization**: malformed wire form on decode, unrepresentable body on encode
//! - **Cryptographic**: invalid key, corrupt ciphertext, key mismatch
//! - **Transport**: read/write I/O failures, oversized frames, write timeouts
//! - **Link state**: sends after disconnect, duplicate connections
//! - **Configuration**: invalid or unreadable configuration
//!
//! ## Example Usage
//! ```rust
//! use package_link::error::{ProtocolError, Result};
//! use package_link::Package;
//! use tracing::{error, info};
//!
//! fn parse(line: &str) -> Result<Package> {
//!     Package::deserialize(line)
//! }
//!
//! match parse("not json") {
//!     Ok(package) => info!(kind = %package.package_type(), "Parsed package"),
//!     Err(e) => error!(error = %e, "Dropping frame"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry errors
    pub const ERR_REGISTRY_LOCK: &str = "Failed to acquire link registry lock";

    /// Framing errors
    pub const ERR_FRAME_CONTAINS_DELIMITER: &str = "Serialized package contains a frame delimiter";
    pub const ERR_INVALID_UTF8: &str = "Frame is not valid UTF-8";

    /// Package errors
    pub const ERR_MISSING_ENVELOPE_DATA: &str = "Encrypted package has no data field";
    pub const ERR_NOT_ENCRYPTED: &str = "Package is not an encrypted envelope";
    pub const ERR_INVALID_BASE64: &str = "Encrypted data is not valid base64";
    pub const ERR_BODY_NOT_OBJECT: &str = "Package body must be a JSON object";

    /// Cryptographic errors
    pub const ERR_SEALED_TOO_SHORT: &str = "Sealed data shorter than header";
    pub const ERR_AEAD_ENCRYPT: &str = "AEAD encryption failed";
    pub const ERR_AEAD_DECRYPT: &str = "AEAD decryption failed (wrong key or tampered data)";
    pub const ERR_NONCE_GENERATION: &str = "Failed to generate random nonce";
    pub const ERR_INVALID_PUBLIC_KEY: &str = "Public key must be 32 bytes";
    pub const ERR_WEAK_SHARED_SECRET: &str = "Key agreement produced a non-contributory secret";
}

/// ProtocolError is the primary error type for all link operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Frame too large: {0} bytes without delimiter")]
    OversizedFrame(usize),

    #[error("Link is not connected")]
    NotConnected,

    #[error("Duplicate connection for {0}")]
    DuplicateConnection(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Synchronization primitive poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl ProtocolError {
    /// Whether this error came from the underlying transport rather than from
    /// package handling.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_) | Self::OversizedFrame(_) | Self::Timeout)
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
