//! Duet Core
//!
//! Shared vocabulary for two-party encrypted conversations: participant and
//! conversation identifiers, log records, and the traits behind which the
//! external collaborators live.
//!
//! # Collaborators
//!
//! - [`ConversationLog`]: append-only per-conversation store with live
//!   subscriptions
//! - [`Directory`]: user listing and public key publication
//! - [`IdentityProvider`]: the locally signed-in user
//! - [`Environment`]: time source for backoff and timeouts
//!
//! Nothing in this crate performs I/O. Backends implement the traits; the
//! sync engine consumes them.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod conversation;
mod directory;
mod env;
mod error;
mod log;
mod message;

pub use conversation::{ConversationId, ParticipantId, SEPARATOR};
pub use directory::{Directory, DirectoryEntry, IdentityEvent, IdentityProvider, Profile};
pub use env::Environment;
pub use error::{DirectoryError, IdentityError, LogError};
pub use log::{ConversationLog, Subscription};
pub use message::{Message, NewRecord, OrderingToken, PlaintextMessage};
