//! # Core Protocol Components
//!
//! Packages and the framing that carries them over byte streams.
//!
//! ## Components
//! - **Package**: JSON message unit with plaintext and encrypted forms
//! - **Codec**: Tokio codec splitting a byte stream into newline-terminated frames
//!
//! ## Wire Format
//! ```text
//! {"body":{...},"id":<ms>,"type":"<kind>"}\n
//! ```
//!
//! ## Security
//! - Frames are bounded by a configurable maximum length
//! - Serialized packages never contain a raw delimiter

pub mod codec;
pub mod package;
