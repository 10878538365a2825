//! Participant and conversation identifiers.
//!
//! A conversation between two participants is keyed by
//! `min(a, b) + "_" + max(a, b)` under byte-lexicographic order. The separator
//! is rejected inside participant ids, so the key is injective over unordered
//! pairs and splits back into exactly the two participants.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Separator between the two participants in a [`ConversationId`].
pub const SEPARATOR: char = '_';

/// Stable unique identifier of a user, supplied by the identity provider.
///
/// # Invariants
///
/// - Non-empty
/// - Never contains [`SEPARATOR`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Validate and wrap an identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdentityError::Empty);
        }
        if id.contains(SEPARATOR) {
            return Err(IdentityError::ContainsSeparator { id, separator: SEPARATOR });
        }
        Ok(Self(id))
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical, order-independent key of a two-party conversation.
///
/// Derived on demand; never persisted on its own and never mutated. Only
/// [`ConversationId::derive`] constructs one, so there is no `Deserialize`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ConversationId(String);

impl ConversationId {
    /// Derive the conversation key for participants `a` and `b`.
    ///
    /// Pure, total and symmetric: `derive(a, b) == derive(b, a)`.
    /// `derive(a, a)` is a valid self-conversation key.
    pub fn derive(a: &ParticipantId, b: &ParticipantId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };

        let mut key = String::with_capacity(low.0.len() + 1 + high.0.len());
        key.push_str(&low.0);
        key.push(SEPARATOR);
        key.push_str(&high.0);

        Self(key)
    }

    /// Key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two participants, smaller first.
    pub fn participants(&self) -> (ParticipantId, ParticipantId) {
        // Participant ids never contain the separator, so the first one
        // found is the boundary.
        match self.0.split_once(SEPARATOR) {
            Some((low, high)) => (ParticipantId(low.to_owned()), ParticipantId(high.to_owned())),
            None => unreachable!("conversation ids are only built by derive"),
        }
    }

    /// Check if `participant` is one of the two members.
    pub fn involves(&self, participant: &ParticipantId) -> bool {
        let (low, high) = self.participants();
        low == *participant || high == *participant
    }

    /// The member other than `me`. `None` if `me` is not a member.
    pub fn peer_of(&self, me: &ParticipantId) -> Option<ParticipantId> {
        let (low, high) = self.participants();
        if low == *me {
            Some(high)
        } else if high == *me {
            Some(low)
        } else {
            None
        }
    }

    /// Check if both members are the same participant.
    pub fn is_self_conversation(&self) -> bool {
        let (low, high) = self.participants();
        low == high
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
