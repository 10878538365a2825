//! In-memory conversation log.
//!
//! Keeps every conversation as a `Vec<Message>` in token order and fans new
//! records out to live subscribers. Two delivery shapes are supported so the
//! engine can be exercised against both kinds of backend:
//!
//! - [`ReplayMode::Delta`]: after the snapshot, each append delivers only the
//!   new record
//! - [`ReplayMode::Full`]: every append re-sends the full snapshot from the
//!   subscriber's starting token, like a document-listener backend
//!
//! Fault injection covers the failure modes the engine must survive: severed
//! subscriptions, refused subscribes and failing appends.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use async_trait::async_trait;
use duet_core::{
    ConversationId, ConversationLog, LogError, Message, NewRecord, OrderingToken, Subscription,
};
use tokio::sync::mpsc;

/// Batches a subscriber may have queued before it is considered lagging and
/// dropped.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// How appends are pushed to live subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayMode {
    /// Only the new record.
    #[default]
    Delta,
    /// Every record from the subscriber's starting token.
    Full,
}

/// In-memory [`ConversationLog`].
///
/// Cloning shares the underlying store.
#[derive(Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    mode: ReplayMode,
    conversations: HashMap<ConversationId, Conversation>,
    next_subscriber: u64,
    failing_appends: usize,
    failing_subscribes: usize,
}

#[derive(Default)]
struct Conversation {
    records: Vec<Message>,
    subscribers: HashMap<u64, Subscriber>,
}

struct Subscriber {
    from: Option<OrderingToken>,
    batches: mpsc::Sender<Vec<Message>>,
}

impl Conversation {
    fn snapshot(&self, from: Option<OrderingToken>) -> Vec<Message> {
        self.records
            .iter()
            .filter(|message| from.is_none_or(|from| message.sent_at >= from))
            .cloned()
            .collect()
    }

    fn next_token(&self) -> OrderingToken {
        self.records.last().map_or(OrderingToken::new(0), |last| last.sent_at.next())
    }

    /// Push a batch to every subscriber, dropping those that are gone or
    /// lagging.
    fn fan_out(&mut self, batch_for: impl Fn(&Self, &Subscriber) -> Vec<Message>) {
        let this: &Self = self;
        let batches: Vec<(u64, Vec<Message>)> =
            this.subscribers.iter().map(|(id, sub)| (*id, batch_for(this, sub))).collect();

        for (id, batch) in batches {
            let delivered =
                self.subscribers.get(&id).is_some_and(|sub| sub.batches.try_send(batch).is_ok());
            if !delivered {
                tracing::debug!(subscriber = id, "dropping closed or lagging subscriber");
                self.subscribers.remove(&id);
            }
        }
    }
}

impl MemoryLog {
    /// Create an empty log in [`ReplayMode::Delta`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty log with the given replay mode.
    pub fn with_mode(mode: ReplayMode) -> Self {
        let log = Self::default();
        log.lock().mode = mode;
        log
    }

    /// All records of a conversation, in token order.
    pub fn records(&self, conversation: &ConversationId) -> Vec<Message> {
        self.lock().conversations.get(conversation).map(|c| c.records.clone()).unwrap_or_default()
    }

    /// Number of live subscriptions on a conversation.
    pub fn subscriber_count(&self, conversation: &ConversationId) -> usize {
        self.lock().conversations.get(conversation).map_or(0, |c| c.subscribers.len())
    }

    /// Drop every live subscription on a conversation. Subscribers observe the
    /// end of their feed.
    pub fn sever_subscriptions(&self, conversation: &ConversationId) {
        let mut inner = self.lock();
        if let Some(conv) = inner.conversations.get_mut(conversation) {
            tracing::debug!(%conversation, count = conv.subscribers.len(), "severing subscriptions");
            conv.subscribers.clear();
        }
    }

    /// Re-send each subscriber its full snapshot.
    pub fn redeliver(&self, conversation: &ConversationId) {
        let mut inner = self.lock();
        if let Some(conv) = inner.conversations.get_mut(conversation) {
            conv.fan_out(|conv, sub| conv.snapshot(sub.from));
        }
    }

    /// Fail the next `count` appends with [`LogError::Unavailable`].
    pub fn fail_next_appends(&self, count: usize) {
        self.lock().failing_appends = count;
    }

    /// Fail the next `count` subscribes with [`LogError::Unavailable`].
    pub fn fail_next_subscribes(&self, count: usize) {
        self.lock().failing_subscribes = count;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn release(inner: &Weak<Mutex<Inner>>, conversation: &ConversationId, subscriber: u64) {
    if let Some(inner) = inner.upgrade() {
        let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(conv) = inner.conversations.get_mut(conversation) {
            conv.subscribers.remove(&subscriber);
        }
    }
}

#[async_trait]
impl ConversationLog for MemoryLog {
    async fn append(
        &self,
        conversation: &ConversationId,
        record: NewRecord,
    ) -> Result<OrderingToken, LogError> {
        let mut inner = self.lock();
        if inner.failing_appends > 0 {
            inner.failing_appends -= 1;
            return Err(LogError::Unavailable { reason: "injected append failure".into() });
        }

        let mode = inner.mode;
        let conv = inner.conversations.entry(conversation.clone()).or_default();
        let sent_at = conv.next_token();
        let message = Message { sender_id: record.sender_id, ciphertext: record.ciphertext, sent_at };
        conv.records.push(message.clone());

        tracing::debug!(%conversation, token = %sent_at, "appended record");

        match mode {
            ReplayMode::Delta => conv.fan_out(|_, _| vec![message.clone()]),
            ReplayMode::Full => conv.fan_out(|conv, sub| conv.snapshot(sub.from)),
        }

        Ok(sent_at)
    }

    async fn subscribe(
        &self,
        conversation: &ConversationId,
        from: Option<OrderingToken>,
    ) -> Result<Subscription, LogError> {
        let mut inner = self.lock();
        if inner.failing_subscribes > 0 {
            inner.failing_subscribes -= 1;
            return Err(LogError::Unavailable { reason: "injected subscribe failure".into() });
        }

        let id = inner.next_subscriber;
        inner.next_subscriber += 1;

        let conv = inner.conversations.entry(conversation.clone()).or_default();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        tx.try_send(conv.snapshot(from))
            .map_err(|_| LogError::Unavailable { reason: "subscriber channel closed".into() })?;
        conv.subscribers.insert(id, Subscriber { from, batches: tx });

        tracing::debug!(%conversation, subscriber = id, ?from, "subscribed");

        let weak = Arc::downgrade(&self.inner);
        let conversation = conversation.clone();
        Ok(Subscription::with_release(rx, move || release(&weak, &conversation, id)))
    }
}
