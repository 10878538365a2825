//! Sync engine errors.

use std::time::Duration;

use duet_core::{DirectoryError, LogError, ParticipantId};
use duet_crypto::CryptoError;
use thiserror::Error;

/// Errors returned by [`SyncEngine`](crate::SyncEngine) operations and the
/// directory helpers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Message text is empty or whitespace only
    #[error("message is empty")]
    EmptyMessage,

    /// No conversation is live
    #[error("no active conversation")]
    NoActiveConversation,

    /// Conversation with oneself while the policy forbids it
    #[error("conversation with self ({participant}) is not allowed")]
    SelfConversation {
        /// The local participant
        participant: ParticipantId,
    },

    /// Plaintext exceeds what the active scheme can encrypt
    #[error("message of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Plaintext length in bytes
        len: usize,
        /// Largest accepted plaintext
        max: usize,
    },

    /// Encryption or key handling failed
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// Conversation log failed
    #[error(transparent)]
    Log(#[from] LogError),

    /// Directory failed
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// The session was closed while the operation was in flight
    #[error("session closed")]
    Closed,

    /// The first snapshot did not arrive in time
    #[error("no snapshot within {timeout:?}")]
    SnapshotTimeout {
        /// Configured limit
        timeout: Duration,
    },

    /// The subscription ended before the first snapshot
    #[error("subscription lost")]
    SubscriptionLost,

    /// The two participants share no encryption scheme
    #[error("no encryption scheme in common with {peer}")]
    NoCommonScheme {
        /// The other participant
        peer: ParticipantId,
    },

    /// The peer advertises the key-pair scheme but has no published key
    #[error("{peer} has not published a public key")]
    MissingPeerKey {
        /// The other participant
        peer: ParticipantId,
    },

    /// The key-pair scheme was requested without local key material
    #[error("key-pair scheme requires local key material")]
    MissingKeyMaterial,
}

impl SyncError {
    /// Returns true if retrying the same operation may succeed.
    ///
    /// Caller mistakes (empty text, oversized payloads, policy violations)
    /// are never recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Log(err) => err.is_transient(),
            Self::Directory(err) => matches!(err, DirectoryError::Unavailable { .. }),
            Self::SnapshotTimeout { .. } | Self::SubscriptionLost | Self::Closed => true,
            Self::EmptyMessage
            | Self::NoActiveConversation
            | Self::SelfConversation { .. }
            | Self::PayloadTooLarge { .. }
            | Self::Crypto(_)
            | Self::NoCommonScheme { .. }
            | Self::MissingPeerKey { .. }
            | Self::MissingKeyMaterial => false,
        }
    }
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::PayloadTooLarge { len, max } => Self::PayloadTooLarge { len, max },
            other => Self::Crypto(other),
        }
    }
}
