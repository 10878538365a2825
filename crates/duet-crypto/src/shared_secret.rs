//! Shared-secret message encryption using `XChaCha20-Poly1305`.
//!
//! Both participants hold the same 32-byte key, distributed out of band. This
//! is the baseline scheme: it authenticates and hides message content but
//! does not solve key distribution.

use std::fmt;

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use rand::{RngCore, rngs::OsRng};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{
    envelope,
    error::{CryptoError, DecryptionFailed},
    strategy::{EncryptionStrategy, Scheme},
};

/// Size of a shared secret key (32 bytes)
pub const KEY_SIZE: usize = 32;

/// Size of the `XChaCha20` nonce (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
const POLY1305_TAG_SIZE: usize = 16;

/// Label used for passphrase key derivation
const PASSPHRASE_LABEL: &[u8] = b"duetSharedSecretV1";

/// A 32-byte symmetric key.
///
/// Key bytes are zeroized on drop and never appear in `Debug` output.
#[derive(Clone)]
pub struct SharedSecret {
    key: [u8; KEY_SIZE],
}

impl SharedSecret {
    /// Wrap raw key bytes.
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Parse a key from a byte slice.
    ///
    /// # Errors
    ///
    /// - `MalformedKey` if the slice is not exactly [`KEY_SIZE`] bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::MalformedKey {
            reason: format!("shared secret must be {KEY_SIZE} bytes, got {}", bytes.len()),
        })?;
        Ok(Self { key })
    }

    /// Generate a fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Derive a key from a passphrase with HKDF-SHA256.
    ///
    /// Deterministic: both participants typing the same passphrase get the
    /// same key. HKDF does not stretch the input, so the passphrase must carry
    /// enough entropy on its own.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let hkdf = Hkdf::<Sha256>::new(Some(PASSPHRASE_LABEL), passphrase.as_bytes());

        let mut key = [0u8; KEY_SIZE];
        let Ok(()) = hkdf.expand(b"message key", &mut key) else {
            unreachable!("32 bytes is a valid HKDF-SHA256 output length");
        };

        Self { key }
    }

    fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// [`EncryptionStrategy`] over a [`SharedSecret`].
///
/// Every call to `encrypt` draws a fresh random nonce, so identical
/// plaintexts produce different ciphertexts. Compare decrypted text, never
/// raw ciphertext.
#[derive(Debug)]
pub struct SharedSecretCipher {
    key: SharedSecret,
}

impl SharedSecretCipher {
    /// Create a cipher over the given key.
    pub fn new(key: SharedSecret) -> Self {
        Self { key }
    }

    /// Encrypt with a caller-provided nonce.
    ///
    /// Deterministic counterpart of [`EncryptionStrategy::encrypt`] for tests.
    /// Callers MUST NOT reuse a nonce with the same key in production.
    pub fn encrypt_with_nonce(
        &self,
        plaintext: &str,
        nonce: [u8; NONCE_SIZE],
    ) -> Result<String, CryptoError> {
        let cipher = XChaCha20Poly1305::new(self.key.key().into());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CryptoError::Encryption { reason: "AEAD encryption failed".into() })?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(envelope::seal(Scheme::SharedSecret, &sealed))
    }
}

impl EncryptionStrategy for SharedSecretCipher {
    fn scheme(&self) -> Scheme {
        Scheme::SharedSecret
    }

    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        self.encrypt_with_nonce(plaintext, nonce)
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptionFailed> {
        let sealed = envelope::open(Scheme::SharedSecret, ciphertext)?;

        if sealed.len() < NONCE_SIZE + POLY1305_TAG_SIZE {
            return Err(DecryptionFailed::new(format!(
                "ciphertext too short: {} bytes",
                sealed.len()
            )));
        }

        let (nonce, body) = sealed.split_at(NONCE_SIZE);
        let cipher = XChaCha20Poly1305::new(self.key.key().into());
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), body)
            .map_err(|_| DecryptionFailed::new("authentication failed"))?;

        String::from_utf8(plaintext).map_err(|_| DecryptionFailed::new("plaintext is not UTF-8"))
    }

    fn max_plaintext_len(&self) -> Option<usize> {
        None
    }
}
