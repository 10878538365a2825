//! Duet Cryptographic Strategies
//!
//! Message encryption for two-party conversations. A conversation picks one
//! [`EncryptionStrategy`] through [`CipherConfig`]; the rest of the system
//! only ever calls `encrypt` and `decrypt` on it.
//!
//! # Schemes
//!
//! ```text
//! SharedSecret                         KeyPair
//!   32-byte key (out of band,            RSA-2048 key pair per participant
//!   or HKDF from passphrase)             public key published in directory
//!        │                                      │
//!        ▼                                      ▼
//!   XChaCha20-Poly1305                   RSA-OAEP (SHA-256) to peer's key
//!   random 24-byte nonce                 ≤ 190 bytes plaintext
//!        │                                      │
//!        ▼                                      ▼
//!   "ss1:" + base64                      "kp1:" + base64
//! ```
//!
//! # Failure Handling
//!
//! - Decryption never raises: every failure becomes [`DecryptionFailed`], which
//!   callers render as [`DECRYPTION_FAILED_PLACEHOLDER`]
//! - The scheme tag makes a ciphertext from one strategy fail to decode under
//!   the other instead of being misread
//! - Oversized plaintext is rejected with [`CryptoError::PayloadTooLarge`],
//!   never truncated or chunked
//!
//! # Key Ownership
//!
//! - [`PublicKeyHandle`] is cloneable and exportable as base64 SPKI DER
//! - [`PrivateKeyHandle`] has no export path and a redacted `Debug`

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod envelope;
mod error;
mod key_pair;
mod keys;
mod shared_secret;
mod strategy;

pub use envelope::scheme_of;
pub use error::{CryptoError, DECRYPTION_FAILED_PLACEHOLDER, DecryptionFailed};
pub use key_pair::{KeyMaterial, KeyPairCipher, MIN_MODULUS_BITS, PrivateKeyHandle, PublicKeyHandle};
pub use keys::KeyLifecycleManager;
pub use shared_secret::{KEY_SIZE, NONCE_SIZE, SharedSecret, SharedSecretCipher};
pub use strategy::{CipherConfig, EncryptionStrategy, Scheme};
