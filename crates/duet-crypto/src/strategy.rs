//! Encryption strategy selection.
//!
//! A conversation uses exactly one [`EncryptionStrategy`]. The concrete
//! cipher is chosen once, in [`CipherConfig::into_strategy`]; everything
//! downstream works with the trait object and never branches on the scheme.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    error::{CryptoError, DecryptionFailed},
    key_pair::{KeyMaterial, KeyPairCipher, PublicKeyHandle},
    shared_secret::{SharedSecret, SharedSecretCipher},
};

/// Encryption scheme identifier.
///
/// Advertised in directory records so two participants can agree on a
/// scheme before opening a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// Symmetric key known to both participants out of band.
    SharedSecret,
    /// Per-recipient public key encryption.
    KeyPair,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedSecret => f.write_str("shared-secret"),
            Self::KeyPair => f.write_str("key-pair"),
        }
    }
}

/// Capability to turn plaintext into stored ciphertext and back.
///
/// # Invariants
///
/// - `decrypt(encrypt(p)) == p` for the intended reader
/// - `decrypt` never panics; unreadable input yields [`DecryptionFailed`]
/// - `encrypt` rejects plaintext longer than [`max_plaintext_len`] with
///   [`CryptoError::PayloadTooLarge`] and never truncates
///
/// [`max_plaintext_len`]: EncryptionStrategy::max_plaintext_len
pub trait EncryptionStrategy: Send + Sync + fmt::Debug {
    /// Scheme implemented by this strategy.
    fn scheme(&self) -> Scheme;

    /// Encrypt `plaintext` into the text envelope stored in the log.
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;

    /// Decrypt a stored envelope.
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptionFailed>;

    /// Largest plaintext in bytes this strategy accepts. `None` if unbounded.
    fn max_plaintext_len(&self) -> Option<usize>;
}

/// Strategy choice and key material for one conversation.
#[derive(Clone)]
pub enum CipherConfig {
    /// Both participants hold the same symmetric key.
    SharedSecret {
        /// The shared key.
        key: SharedSecret,
    },
    /// Messages are encrypted to the peer's public key and decrypted with
    /// our own private key.
    KeyPair {
        /// Our key material; the private half decrypts incoming messages.
        own: KeyMaterial,
        /// Peer's public key; encrypts outgoing messages.
        peer: PublicKeyHandle,
    },
}

impl CipherConfig {
    /// Scheme selected by this configuration.
    pub fn scheme(&self) -> Scheme {
        match self {
            Self::SharedSecret { .. } => Scheme::SharedSecret,
            Self::KeyPair { .. } => Scheme::KeyPair,
        }
    }

    /// Build the strategy instance for a conversation.
    pub fn into_strategy(self) -> Arc<dyn EncryptionStrategy> {
        match self {
            Self::SharedSecret { key } => Arc::new(SharedSecretCipher::new(key)),
            Self::KeyPair { own, peer } => Arc::new(KeyPairCipher::new(own, peer)),
        }
    }
}

impl fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherConfig").field("scheme", &self.scheme()).finish_non_exhaustive()
    }
}
