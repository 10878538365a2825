//! Key-pair message encryption using RSA-OAEP (SHA-256).
//!
//! Each participant publishes a public key; senders encrypt per recipient and
//! only the holder of the matching private key can decrypt. Messages are not
//! chunked: plaintext longer than the OAEP bound for the recipient's modulus
//! is rejected with [`CryptoError::PayloadTooLarge`].

use std::{fmt, sync::Arc};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand::rngs::OsRng;
use rsa::{
    Oaep, RsaPrivateKey, RsaPublicKey,
    pkcs8::{DecodePublicKey, EncodePublicKey},
    traits::PublicKeyParts,
};
use sha2::{Digest, Sha256};

use crate::{
    envelope,
    error::{CryptoError, DecryptionFailed},
    strategy::{EncryptionStrategy, Scheme},
};

/// Smallest accepted modulus size in bits.
pub const MIN_MODULUS_BITS: usize = 2048;

/// SHA-256 output length, used in the OAEP payload bound.
const OAEP_HASH_LEN: usize = 32;

/// Public half of a key pair. Freely cloneable and shareable.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKeyHandle {
    key: RsaPublicKey,
}

impl PublicKeyHandle {
    fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Modulus size in bits.
    pub fn modulus_bits(&self) -> usize {
        self.key.size() * 8
    }

    /// Largest plaintext in bytes that can be encrypted to this key.
    ///
    /// RSA-OAEP with SHA-256 carries `k - 2 * 32 - 2` bytes for a `k`-byte
    /// modulus: 190 bytes for a 2048-bit key.
    pub fn max_plaintext_len(&self) -> usize {
        self.key.size().saturating_sub(2 * OAEP_HASH_LEN + 2)
    }

    /// Canonical text encoding: base64 of the SubjectPublicKeyInfo DER.
    pub fn to_base64(&self) -> Result<String, CryptoError> {
        let der = self
            .key
            .to_public_key_der()
            .map_err(|e| CryptoError::Encoding { reason: e.to_string() })?;
        Ok(STANDARD.encode(der.as_bytes()))
    }

    /// Parse the text produced by [`to_base64`](Self::to_base64).
    ///
    /// # Errors
    ///
    /// - `MalformedKey` if the text is not base64, the bytes are not a
    ///   SubjectPublicKeyInfo RSA key, or the modulus is below
    ///   [`MIN_MODULUS_BITS`]
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let der = STANDARD
            .decode(text.trim())
            .map_err(|e| CryptoError::MalformedKey { reason: format!("invalid base64: {e}") })?;

        let key = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| CryptoError::MalformedKey { reason: format!("invalid key encoding: {e}") })?;

        let handle = Self::new(key);
        if handle.modulus_bits() < MIN_MODULUS_BITS {
            return Err(CryptoError::MalformedKey {
                reason: format!(
                    "modulus of {} bits is below the minimum of {MIN_MODULUS_BITS}",
                    handle.modulus_bits()
                ),
            });
        }

        Ok(handle)
    }

    /// Short hex fingerprint (first 8 bytes of SHA-256 over the DER encoding).
    ///
    /// For logs and key comparison by humans; not a security identifier.
    pub fn fingerprint(&self) -> String {
        let Ok(der) = self.key.to_public_key_der() else {
            return String::from("unencodable");
        };
        Sha256::digest(der.as_bytes()).iter().take(8).map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for PublicKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyHandle")
            .field("bits", &self.modulus_bits())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Private half of a key pair.
///
/// Opaque: there is no method that yields key bytes, and `Debug` is
/// redacted. Clones share the same key within the process.
#[derive(Clone)]
pub struct PrivateKeyHandle {
    key: Arc<RsaPrivateKey>,
}

impl fmt::Debug for PrivateKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKeyHandle(..)")
    }
}

/// A public/private key pair.
///
/// Created by [`KeyLifecycleManager`](crate::KeyLifecycleManager). The public
/// half may be exported and shared; the private half never leaves the
/// process that generated it.
#[derive(Clone, Debug)]
pub struct KeyMaterial {
    public: PublicKeyHandle,
    private: PrivateKeyHandle,
}

impl KeyMaterial {
    pub(crate) fn from_private(key: RsaPrivateKey) -> Self {
        let public = PublicKeyHandle::new(key.to_public_key());
        Self { public, private: PrivateKeyHandle { key: Arc::new(key) } }
    }

    /// Public half.
    pub fn public_key(&self) -> &PublicKeyHandle {
        &self.public
    }

    /// Private half.
    pub fn private_key(&self) -> &PrivateKeyHandle {
        &self.private
    }
}

/// [`EncryptionStrategy`] encrypting to a peer and decrypting with our own
/// private key.
///
/// Outgoing messages are readable only by the peer. The sender cannot
/// decrypt its own messages from the log; callers keep their own plaintext.
#[derive(Debug)]
pub struct KeyPairCipher {
    own: KeyMaterial,
    peer: PublicKeyHandle,
}

impl KeyPairCipher {
    /// Create a cipher for a conversation with `peer`.
    pub fn new(own: KeyMaterial, peer: PublicKeyHandle) -> Self {
        Self { own, peer }
    }

    /// Encrypt `plaintext` so only the holder of `recipient`'s private key can
    /// read it.
    ///
    /// # Errors
    ///
    /// - `PayloadTooLarge` if `plaintext` exceeds
    ///   [`PublicKeyHandle::max_plaintext_len`]
    pub fn encrypt_for(recipient: &PublicKeyHandle, plaintext: &str) -> Result<String, CryptoError> {
        let max = recipient.max_plaintext_len();
        if plaintext.len() > max {
            return Err(CryptoError::PayloadTooLarge { len: plaintext.len(), max });
        }

        let ciphertext = recipient
            .key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext.as_bytes())
            .map_err(|e| match e {
                rsa::Error::MessageTooLong => {
                    CryptoError::PayloadTooLarge { len: plaintext.len(), max }
                },
                other => CryptoError::Encryption { reason: other.to_string() },
            })?;

        Ok(envelope::seal(Scheme::KeyPair, &ciphertext))
    }

    /// Decrypt a ciphertext addressed to `own`.
    pub fn decrypt_with(own: &PrivateKeyHandle, ciphertext: &str) -> Result<String, DecryptionFailed> {
        let bytes = envelope::open(Scheme::KeyPair, ciphertext)?;

        let plaintext = own
            .key
            .decrypt(Oaep::new::<Sha256>(), &bytes)
            .map_err(|_| DecryptionFailed::new("OAEP decoding failed"))?;

        String::from_utf8(plaintext).map_err(|_| DecryptionFailed::new("plaintext is not UTF-8"))
    }
}

impl EncryptionStrategy for KeyPairCipher {
    fn scheme(&self) -> Scheme {
        Scheme::KeyPair
    }

    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        Self::encrypt_for(&self.peer, plaintext)
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptionFailed> {
        Self::decrypt_with(self.own.private_key(), ciphertext)
    }

    fn max_plaintext_len(&self) -> Option<usize> {
        Some(self.peer.max_plaintext_len())
    }
}
