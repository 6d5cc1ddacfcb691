//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, metrics and timing.
//!
//! ## Components
//! - **Crypto**: X25519 sealed boxes with ChaCha20-Poly1305
//! - **Logging**: `tracing-subscriber` setup from configuration
//! - **Metrics**: Thread-safe link and traffic counters
//! - **Timeout**: Async timeout wrappers
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom / OsRng)
//! - Derived keys are zeroized after use

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;

pub use crypto::{KeyMaterial, PublicKey};
pub use metrics::{global_metrics, Metrics, MetricsSnapshot};
