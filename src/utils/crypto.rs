//! # Package Sealing
//!
//! Public-key encryption for package envelopes.
//!
//! A sender only knows the recipient's long-term X25519 public key, so every
//! sealed message carries a fresh ephemeral public key. Both sides derive the
//! same ChaCha20-Poly1305 key from the Diffie-Hellman shared secret.
//!
//! ## Sealed Layout
//! ```text
//! [EphemeralPublic(32)] [Nonce(12)] [Ciphertext + Tag(N + 16)]
//! ```
//!
//! Key material is always handed in by the caller. Long-term private keys are
//! never generated or persisted here.

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, SharedSecret, StaticSecret};
use zeroize::Zeroize;

use crate::error::{constants, ProtocolError, Result};

/// Length of an X25519 public key
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of the ChaCha20-Poly1305 nonce
pub const NONCE_LEN: usize = 12;

/// Length of the Poly1305 authentication tag
pub const TAG_LEN: usize = 16;

/// Bytes preceding the ciphertext in a sealed message
pub const SEALED_HEADER_LEN: usize = PUBLIC_KEY_LEN + NONCE_LEN;

/// A peer's public key, used as the target of `Package::encrypt`
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

impl PublicKey {
    /// Build a public key from its raw 32 bytes
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Raw key bytes
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.0.to_bytes()
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = ProtocolError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; PUBLIC_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| ProtocolError::Encryption(constants::ERR_INVALID_PUBLIC_KEY.into()))?;
        Ok(Self::from_bytes(raw))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        write!(f, "PublicKey({:02x}{:02x}{:02x}{:02x}…)", bytes[0], bytes[1], bytes[2], bytes[3])
    }
}

/// Local key material used to open packages sealed to this device.
///
/// Injected into providers and links at construction time.
pub struct KeyMaterial {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyMaterial {
    /// Wrap a caller-supplied private key. The input array is zeroized.
    pub fn from_private_bytes(mut bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        bytes.zeroize();
        let public = PublicKey(x25519_dalek::PublicKey::from(&secret));
        Self { secret, public }
    }

    /// The public half, to be shared with peers
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Open a message produced by [`seal`] for this key.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < SEALED_HEADER_LEN + TAG_LEN {
            return Err(ProtocolError::Decryption(constants::ERR_SEALED_TOO_SHORT.into()));
        }

        let (ephemeral_raw, rest) = sealed.split_at(PUBLIC_KEY_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let mut ephemeral_bytes = [0u8; PUBLIC_KEY_LEN];
        ephemeral_bytes.copy_from_slice(ephemeral_raw);
        let ephemeral = x25519_dalek::PublicKey::from(ephemeral_bytes);

        let shared = self.secret.diffie_hellman(&ephemeral);
        if !shared.was_contributory() {
            return Err(ProtocolError::Decryption(constants::ERR_WEAK_SHARED_SECRET.into()));
        }

        let mut key = derive_key(&shared, &ephemeral_bytes, &self.public.to_bytes());
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        key.zeroize();

        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProtocolError::Decryption(constants::ERR_AEAD_DECRYPT.into()))
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Seal `plaintext` so only the holder of `recipient`'s private key can read it.
pub fn seal(plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(&recipient.0);
    if !shared.was_contributory() {
        return Err(ProtocolError::Encryption(constants::ERR_WEAK_SHARED_SECRET.into()));
    }

    let mut key = derive_key(&shared, ephemeral_public.as_bytes(), &recipient.to_bytes());
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    key.zeroize();

    let nonce = generate_nonce()?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| ProtocolError::Encryption(constants::ERR_AEAD_ENCRYPT.into()))?;

    let mut sealed = Vec::with_capacity(SEALED_HEADER_LEN + ciphertext.len());
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Generate a random 96-bit nonce from the OS RNG
fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::fill(&mut nonce)
        .map_err(|_| ProtocolError::Encryption(constants::ERR_NONCE_GENERATION.into()))?;
    Ok(nonce)
}

/// Derive the AEAD key from a shared secret, bound to both public keys
fn derive_key(shared: &SharedSecret, ephemeral_public: &[u8], recipient_public: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared.as_bytes());
    // Order matters for domain separation
    hasher.update(b"ephemeral_public");
    hasher.update(ephemeral_public);
    hasher.update(b"recipient_public");
    hasher.update(recipient_public);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn keys(seed: u8) -> KeyMaterial {
        KeyMaterial::from_private_bytes([seed; 32])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let recipient = keys(7);
        let sealed = seal(b"hello device", &recipient.public_key()).expect("seal");
        assert_eq!(sealed.len(), SEALED_HEADER_LEN + 12 + TAG_LEN);

        let opened = recipient.open(&sealed).expect("open");
        assert_eq!(opened, b"hello device");
    }

    #[test]
    fn test_sealing_is_randomized() {
        let recipient = keys(3);
        let a = seal(b"same", &recipient.public_key()).unwrap();
        let b = seal(b"same", &recipient.public_key()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let sealed = seal(b"secret", &keys(1).public_key()).unwrap();
        let err = keys(2).open(&sealed).unwrap_err();
        assert!(matches!(err, ProtocolError::Decryption(_)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let recipient = keys(9);
        let mut sealed = seal(b"payload", &recipient.public_key()).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(recipient.open(&sealed), Err(ProtocolError::Decryption(_))));
    }

    #[test]
    fn test_truncated_input_fails() {
        let recipient = keys(4);
        assert!(matches!(recipient.open(&[0u8; 10]), Err(ProtocolError::Decryption(_))));
    }

    #[test]
    fn test_low_order_public_key_rejected() {
        let zero = PublicKey::from_bytes([0u8; 32]);
        assert!(matches!(seal(b"x", &zero), Err(ProtocolError::Encryption(_))));
    }

    #[test]
    fn test_public_key_from_slice() {
        let pk = keys(5).public_key();
        let bytes = pk.to_bytes();
        assert_eq!(PublicKey::try_from(&bytes[..]).unwrap(), pk);
        assert!(PublicKey::try_from(&bytes[..31]).is_err());
    }
}
