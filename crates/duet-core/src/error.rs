//! Error types for the Duet core.
//!
//! Strongly-typed errors for participant identifiers and the two external
//! collaborators (conversation log, user directory). Collaborator errors carry
//! strings because their backends are opaque to this crate.

use thiserror::Error;

/// Errors from constructing a [`ParticipantId`](crate::ParticipantId).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Identifier is empty
    #[error("participant id is empty")]
    Empty,

    /// Identifier contains the conversation separator
    #[error("participant id {id:?} contains the reserved separator {separator:?}")]
    ContainsSeparator {
        /// Offending identifier
        id: String,
        /// The reserved separator
        separator: char,
    },
}

/// Errors reported by a [`ConversationLog`](crate::ConversationLog).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// Backend unreachable or timed out
    #[error("log unavailable: {reason}")]
    Unavailable {
        /// Backend-specific reason
        reason: String,
    },

    /// Backend refused the operation (permissions, quota, validation)
    #[error("log rejected operation: {reason}")]
    Rejected {
        /// Backend-specific reason
        reason: String,
    },
}

impl LogError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Rejections are never transient - retrying the same request against
    /// the same backend gives the same answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Errors reported by a [`Directory`](crate::Directory).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Backend unreachable or timed out
    #[error("directory unavailable: {reason}")]
    Unavailable {
        /// Backend-specific reason
        reason: String,
    },

    /// Entry failed validation
    #[error("invalid directory entry: {reason}")]
    InvalidEntry {
        /// What was wrong with the entry
        reason: String,
    },
}
