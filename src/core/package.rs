//! # Package
//!
//! The unit of exchange between two devices.
//!
//! A package is a JSON object with a type tag and a free-form body:
//! ```text
//! {"body":{"message":"hi"},"id":1700000000000,"type":"kdeconnect.ping"}
//! ```
//!
//! Encrypted packages are envelopes of the reserved type
//! [`PACKAGE_TYPE_ENCRYPTED`] whose body holds the sealed wire form of the
//! original package as base64 under `data`.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::{self, KeyMaterial, PublicKey};

/// Reserved type tag for encrypted envelopes
pub const PACKAGE_TYPE_ENCRYPTED: &str = "kdeconnect.encrypted";

/// Body key holding the base64 ciphertext of an envelope
const ENVELOPE_DATA_KEY: &str = "data";

/// A typed message with a JSON body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// Creation time in milliseconds since the Unix epoch
    #[serde(default)]
    pub id: i64,

    #[serde(rename = "type")]
    package_type: String,

    #[serde(default)]
    body: Map<String, Value>,

    #[serde(
        rename = "payloadSize",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    payload_size: Option<i64>,

    #[serde(
        rename = "payloadTransferInfo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    payload_transfer_info: Option<Map<String, Value>>,
}

impl Package {
    /// Create a package with an empty body
    pub fn new(package_type: impl Into<String>) -> Self {
        Self::from_parts(package_type, Map::new())
    }

    /// Create a package from a type and an existing body
    pub fn from_parts(package_type: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            id: current_timestamp_ms(),
            package_type: package_type.into(),
            body,
            payload_size: None,
            payload_transfer_info: None,
        }
    }

    /// Create a package from a JSON value, which must be an object
    pub fn with_body(package_type: impl Into<String>, body: Value) -> Result<Self> {
        match body {
            Value::Object(map) => Ok(Self::from_parts(package_type, map)),
            _ => Err(ProtocolError::Serialization(
                constants::ERR_BODY_NOT_OBJECT.into(),
            )),
        }
    }

    /// Builder-style body field setter
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    pub fn package_type(&self) -> &str {
        &self.package_type
    }

    pub fn is_type(&self, package_type: &str) -> bool {
        self.package_type == package_type
    }

    pub fn is_encrypted(&self) -> bool {
        self.is_type(PACKAGE_TYPE_ENCRYPTED)
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.body
    }

    /// Look up a single body field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Whether a bulk payload is announced alongside this package
    pub fn has_payload(&self) -> bool {
        self.payload_size.is_some()
    }

    pub fn payload_size(&self) -> Option<i64> {
        self.payload_size
    }

    pub fn payload_transfer_info(&self) -> Option<&Map<String, Value>> {
        self.payload_transfer_info.as_ref()
    }

    /// Announce (or clear) a payload. Links in this crate never transfer it.
    pub fn set_payload(&mut self, size: Option<i64>, transfer_info: Option<Map<String, Value>>) {
        self.payload_size = size;
        self.payload_transfer_info = transfer_info;
    }

    /// Drop any payload announcement
    pub fn clear_payload(&mut self) {
        self.set_payload(None, None);
    }

    /// Serialize to the compact single-line wire form (no trailing newline)
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a wire form. A trailing frame delimiter is tolerated.
    pub fn deserialize(wire: &str) -> Result<Self> {
        let trimmed = wire.trim_end_matches(['\n', '\r']);
        Ok(serde_json::from_str(trimmed)?)
    }

    /// Parse a raw frame as received from a stream transport
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(frame)
            .map_err(|_| ProtocolError::Serialization(constants::ERR_INVALID_UTF8.into()))?;
        Self::deserialize(text)
    }

    /// Seal this package to `recipient`, producing an encrypted envelope.
    ///
    /// The envelope keeps the original id and payload announcement so that
    /// transports can see them without decrypting.
    pub fn encrypt(&self, recipient: &PublicKey) -> Result<Package> {
        let wire = self
            .serialize()
            .map_err(|e| ProtocolError::Encryption(e.to_string()))?;
        let sealed = crypto::seal(wire.as_bytes(), recipient)?;

        let mut body = Map::new();
        body.insert(ENVELOPE_DATA_KEY.into(), Value::String(BASE64.encode(sealed)));

        Ok(Package {
            id: self.id,
            package_type: PACKAGE_TYPE_ENCRYPTED.into(),
            body,
            payload_size: self.payload_size,
            payload_transfer_info: self.payload_transfer_info.clone(),
        })
    }

    /// Open an encrypted envelope with the local key material.
    pub fn decrypt(&self, keys: &KeyMaterial) -> Result<Package> {
        if !self.is_encrypted() {
            return Err(ProtocolError::Decryption(constants::ERR_NOT_ENCRYPTED.into()));
        }

        let data = self
            .body
            .get(ENVELOPE_DATA_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Decryption(constants::ERR_MISSING_ENVELOPE_DATA.into()))?;

        let sealed = BASE64
            .decode(data)
            .map_err(|_| ProtocolError::Decryption(constants::ERR_INVALID_BASE64.into()))?;

        let plaintext = keys.open(&sealed)?;
        let wire = String::from_utf8(plaintext)
            .map_err(|_| ProtocolError::Decryption(constants::ERR_INVALID_UTF8.into()))?;

        Self::deserialize(&wire).map_err(|e| ProtocolError::Decryption(e.to_string()))
    }
}

/// Milliseconds since the Unix epoch, zero if the clock is before it
fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
