//! Key pair lifecycle: generation, public key export and import.

use rand::rngs::OsRng;
use rsa::RsaPrivateKey;

use crate::{
    error::CryptoError,
    key_pair::{KeyMaterial, MIN_MODULUS_BITS, PublicKeyHandle},
};

/// Generates key pairs and moves public keys in and out of text form.
///
/// Private key material is never exported: the manager has no operation that
/// yields private key bytes.
#[derive(Debug, Clone)]
pub struct KeyLifecycleManager {
    modulus_bits: usize,
}

impl KeyLifecycleManager {
    /// Manager producing keys with the default 2048-bit modulus.
    pub fn new() -> Self {
        Self { modulus_bits: MIN_MODULUS_BITS }
    }

    /// Manager producing keys with a custom modulus size.
    ///
    /// # Errors
    ///
    /// - `KeyTooSmall` if `modulus_bits` is below [`MIN_MODULUS_BITS`]
    pub fn with_modulus_bits(modulus_bits: usize) -> Result<Self, CryptoError> {
        if modulus_bits < MIN_MODULUS_BITS {
            return Err(CryptoError::KeyTooSmall { bits: modulus_bits, minimum: MIN_MODULUS_BITS });
        }
        Ok(Self { modulus_bits })
    }

    /// Modulus size of generated keys.
    pub fn modulus_bits(&self) -> usize {
        self.modulus_bits
    }

    /// Generate a fresh key pair on a blocking worker thread.
    ///
    /// Prime generation takes long enough to stall an async runtime, so the
    /// work runs under [`tokio::task::spawn_blocking`].
    pub async fn generate_key_pair(&self) -> Result<KeyMaterial, CryptoError> {
        let bits = self.modulus_bits;
        tokio::task::spawn_blocking(move || generate_blocking(bits))
            .await
            .map_err(|e| CryptoError::KeyGeneration { reason: e.to_string() })?
    }

    /// Generate a fresh key pair on the current thread.
    pub fn generate_key_pair_blocking(&self) -> Result<KeyMaterial, CryptoError> {
        generate_blocking(self.modulus_bits)
    }

    /// Export the public half of `keys` as transportable text.
    #[allow(clippy::unused_async, reason = "Key exchange is an async boundary for callers")]
    pub async fn export_public_key(&self, keys: &KeyMaterial) -> Result<String, CryptoError> {
        keys.public_key().to_base64()
    }

    /// Import a public key exported by [`export_public_key`](Self::export_public_key).
    ///
    /// # Errors
    ///
    /// - `MalformedKey` if the text is not a valid encoding
    #[allow(clippy::unused_async, reason = "Key exchange is an async boundary for callers")]
    pub async fn import_public_key(&self, text: &str) -> Result<PublicKeyHandle, CryptoError> {
        PublicKeyHandle::from_base64(text)
    }
}

impl Default for KeyLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_blocking(bits: usize) -> Result<KeyMaterial, CryptoError> {
    let key = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| CryptoError::KeyGeneration { reason: e.to_string() })?;

    let keys = KeyMaterial::from_private(key);
    tracing::debug!(bits, fingerprint = %keys.public_key().fingerprint(), "generated key pair");
    Ok(keys)
}
