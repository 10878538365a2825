//! Ordered plaintext view of a conversation.
//!
//! Records are keyed by `(sent_at, sender_id)`. Merging is idempotent: a
//! record already in the view is never decrypted or inserted twice, no
//! matter how often the log re-delivers it.

use std::collections::BTreeMap;

use duet_core::{Message, OrderingToken, ParticipantId, PlaintextMessage};
use duet_crypto::{DecryptionFailed, EncryptionStrategy};

type Key = (OrderingToken, ParticipantId);

/// Decrypted messages of one conversation in ascending token order.
#[derive(Debug, Default)]
pub struct ConversationView {
    messages: BTreeMap<Key, PlaintextMessage>,
}

impl ConversationView {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records from `batch` not yet in the view, first occurrence kept.
    pub fn unseen(&self, batch: Vec<Message>) -> Vec<Message> {
        let mut fresh: Vec<Message> = Vec::with_capacity(batch.len());
        for message in batch {
            let known = self.messages.contains_key(&(message.sent_at, message.sender_id.clone()))
                || fresh.iter().any(|m| m.key() == message.key());
            if !known {
                fresh.push(message);
            }
        }
        fresh
    }

    /// Insert a message. Returns true if the view changed.
    ///
    /// An existing entry is only replaced when it is a decryption placeholder
    /// and the new one carries real text.
    pub fn insert(&mut self, message: PlaintextMessage) -> bool {
        let key = (message.sent_at, message.sender_id.clone());
        match self.messages.get(&key) {
            Some(existing) if !existing.decryption_failed || message.decryption_failed => false,
            _ => {
                self.messages.insert(key, message);
                true
            },
        }
    }

    /// Snapshot of all messages in display order.
    pub fn messages(&self) -> Vec<PlaintextMessage> {
        self.messages.values().cloned().collect()
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the view holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Decrypt a record with the session's strategy, substituting the
/// placeholder on failure.
pub(crate) fn decrypt_record(strategy: &dyn EncryptionStrategy, message: Message) -> PlaintextMessage {
    open_with(message, |ciphertext| strategy.decrypt(ciphertext))
}

fn open_with(
    message: Message,
    decrypt: impl Fn(&str) -> Result<String, DecryptionFailed>,
) -> PlaintextMessage {
    match decrypt(&message.ciphertext) {
        Ok(text) => PlaintextMessage::decrypted(message.sender_id, text, message.sent_at),
        Err(err) => {
            tracing::warn!(
                sender = %message.sender_id,
                token = %message.sent_at,
                reason = %err.reason,
                "message could not be decrypted"
            );
            PlaintextMessage::placeholder(message.sender_id, message.sent_at)
        },
    }
}
