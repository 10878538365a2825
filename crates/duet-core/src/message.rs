//! Log records and their decrypted view.

use std::fmt;

use duet_crypto::DECRYPTION_FAILED_PLACEHOLDER;
use serde::{Deserialize, Serialize};

use crate::conversation::ParticipantId;

/// Opaque, comparable position of a record in a conversation log.
///
/// Assigned by the log on append; unique per conversation. Records are
/// displayed in ascending token order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct OrderingToken(u64);

impl OrderingToken {
    /// Token with the given position.
    pub const fn new(position: u64) -> Self {
        Self(position)
    }

    /// Underlying position.
    pub const fn position(self) -> u64 {
        self.0
    }

    /// The token immediately after this one.
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for OrderingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Record submitted to [`ConversationLog::append`](crate::ConversationLog::append).
///
/// The log assigns the [`OrderingToken`] and returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    /// Author of the record.
    pub sender_id: ParticipantId,
    /// Encrypted message envelope.
    pub ciphertext: String,
}

/// A persisted record. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the record.
    pub sender_id: ParticipantId,
    /// Encrypted message envelope.
    pub ciphertext: String,
    /// Position assigned by the log.
    pub sent_at: OrderingToken,
}

impl Message {
    /// Merge key: records with equal keys are the same record re-delivered.
    pub fn key(&self) -> (OrderingToken, &ParticipantId) {
        (self.sent_at, &self.sender_id)
    }
}

/// A decrypted [`Message`]. Lives only in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaintextMessage {
    /// Author of the message.
    pub sender_id: ParticipantId,
    /// Decrypted text, or [`DECRYPTION_FAILED_PLACEHOLDER`].
    pub text: String,
    /// Position assigned by the log.
    pub sent_at: OrderingToken,
    /// `text` is the placeholder because the ciphertext was unreadable.
    pub decryption_failed: bool,
}

impl PlaintextMessage {
    /// Successfully decrypted message.
    pub fn decrypted(sender_id: ParticipantId, text: String, sent_at: OrderingToken) -> Self {
        Self { sender_id, text, sent_at, decryption_failed: false }
    }

    /// Placeholder for a message that could not be decrypted.
    pub fn placeholder(sender_id: ParticipantId, sent_at: OrderingToken) -> Self {
        Self {
            sender_id,
            text: DECRYPTION_FAILED_PLACEHOLDER.to_owned(),
            sent_at,
            decryption_failed: true,
        }
    }
}
