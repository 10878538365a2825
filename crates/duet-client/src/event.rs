//! Session states and engine notifications.

use std::fmt;

use duet_core::{ConversationId, OrderingToken};

/// Lifecycle of the engine's conversation session.
///
/// ```text
/// Idle ──open──► Subscribing ──snapshot──► Live
///                     ▲                      │
///                     └──subscription lost───┘
/// any ──close──► Closed ──open──► Subscribing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No conversation open
    Idle,
    /// Waiting for a snapshot, initially or after losing the subscription
    Subscribing,
    /// Snapshot applied; sending allowed
    Live,
    /// Session ended by `close`
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Subscribing => "subscribing",
            Self::Live => "live",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Notifications broadcast by the engine.
///
/// Events for a session stop as soon as it is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The session moved to a new state.
    StateChanged(SessionState),

    /// The plaintext view of the conversation changed.
    MessagesUpdated {
        /// Conversation whose view changed
        conversation: ConversationId,
    },

    /// A message was appended by this engine.
    Sent {
        /// Conversation the message went to
        conversation: ConversationId,
        /// Token the log assigned
        token: OrderingToken,
    },

    /// The live subscription ended unexpectedly; resubscribing.
    SubscriptionLost {
        /// Affected conversation
        conversation: ConversationId,
    },

    /// A lost subscription was re-established.
    Resubscribed {
        /// Affected conversation
        conversation: ConversationId,
        /// Retries it took
        attempts: u32,
    },
}
