//! Conversation log boundary.
//!
//! The log is an external, append-only store of [`Message`] records per
//! conversation. It assigns [`OrderingToken`]s and pushes batches of records to
//! live subscribers. Backends live outside this crate; the engine only sees
//! this trait.
//!
//! # Delivery contract
//!
//! - The first batch of a subscription is the snapshot: every record with
//!   `sent_at >= from` (possibly empty)
//! - Later batches are deltas or full re-sends; consumers must merge
//!   idempotently by `(sent_at, sender_id)`
//! - A subscription whose channel closes has been lost; consumers resubscribe

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    conversation::ConversationId,
    error::LogError,
    message::{Message, NewRecord, OrderingToken},
};

/// Live feed of record batches for one conversation.
///
/// Dropping the subscription releases it at the backend.
pub struct Subscription {
    batches: mpsc::Receiver<Vec<Message>>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wrap a batch channel.
    pub fn new(batches: mpsc::Receiver<Vec<Message>>) -> Self {
        Self { batches, release: None }
    }

    /// Wrap a batch channel with a hook run exactly once when the
    /// subscription is dropped or cancelled.
    pub fn with_release(
        batches: mpsc::Receiver<Vec<Message>>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self { batches, release: Some(Box::new(release)) }
    }

    /// Next batch, or `None` once the backend has dropped the subscription.
    ///
    /// Cancel safe.
    pub async fn next_batch(&mut self) -> Option<Vec<Message>> {
        self.batches.recv().await
    }

    /// Release the subscription now.
    pub fn cancel(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        self.batches.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("pending", &self.batches.len())
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Append-only, per-conversation record store with live delivery.
#[async_trait]
pub trait ConversationLog: Send + Sync + 'static {
    /// Append a record and return the token the log assigned to it.
    ///
    /// The assigned token is greater than every token already in the
    /// conversation.
    async fn append(
        &self,
        conversation: &ConversationId,
        record: NewRecord,
    ) -> Result<OrderingToken, LogError>;

    /// Subscribe to a conversation starting at `from` (inclusive).
    ///
    /// `from = None` replays the whole conversation.
    async fn subscribe(
        &self,
        conversation: &ConversationId,
        from: Option<OrderingToken>,
    ) -> Result<Subscription, LogError>;
}
