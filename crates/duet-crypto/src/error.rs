//! Error types for encryption strategies and key handling.

use thiserror::Error;

/// Text rendered in place of a message that could not be decrypted.
pub const DECRYPTION_FAILED_PLACEHOLDER: &str = "[Decryption failed]";

/// Marker returned when a ciphertext cannot be read with the active key.
///
/// Decryption never raises a fault: every failure mode (wrong key, wrong scheme,
/// tampering, garbage input) collapses into this marker so callers can render
/// [`DECRYPTION_FAILED_PLACEHOLDER`] and keep the conversation usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("decryption failed: {reason}")]
pub struct DecryptionFailed {
    /// Reason for the failure, for diagnostics only.
    pub reason: String,
}

impl DecryptionFailed {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Errors from encryption and key lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Ciphertext could not be decrypted with the given key
    #[error(transparent)]
    DecryptionFailed(#[from] DecryptionFailed),

    /// Public key text is not a valid encoding
    #[error("malformed key: {reason}")]
    MalformedKey {
        /// Why the key was rejected
        reason: String,
    },

    /// Plaintext exceeds the scheme's payload bound
    #[error("payload too large: {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Plaintext length in bytes
        len: usize,
        /// Maximum plaintext length for the active key
        max: usize,
    },

    /// Requested key size is below the supported minimum
    #[error("key size {bits} bits is below the minimum of {minimum}")]
    KeyTooSmall {
        /// Requested modulus size
        bits: usize,
        /// Minimum modulus size
        minimum: usize,
    },

    /// Key pair generation failed
    #[error("key generation failed: {reason}")]
    KeyGeneration {
        /// Underlying failure
        reason: String,
    },

    /// Key could not be encoded for export
    #[error("key encoding failed: {reason}")]
    Encoding {
        /// Underlying failure
        reason: String,
    },

    /// Encryption failed for a reason other than payload size
    #[error("encryption failed: {reason}")]
    Encryption {
        /// Underlying failure
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decryption_failed_converts_transparently() {
        let err: CryptoError = DecryptionFailed::new("authentication failed").into();
        assert_eq!(err.to_string(), "decryption failed: authentication failed");
    }

    #[test]
    fn error_display() {
        let err = CryptoError::PayloadTooLarge { len: 300, max: 190 };
        assert_eq!(err.to_string(), "payload too large: 300 bytes exceeds maximum of 190");
    }
}
