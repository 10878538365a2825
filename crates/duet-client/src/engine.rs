//! Conversation sync engine.
//!
//! Owns at most one open conversation at a time. Opening a conversation
//! subscribes to its log, decrypts incoming records into an ordered
//! [`ConversationView`], and keeps the subscription alive across losses.
//! Sending encrypts locally and appends to the log.
//!
//! # Concurrency
//!
//! All session state lives behind one `std::sync::Mutex` that is never held
//! across an `.await`. Each open session has a generation number; every
//! asynchronous result (snapshot, append, delivered batch, resubscription)
//! re-checks it under the lock and is dropped if the session was closed or
//! replaced in the meantime. The subscription is drained by one spawned task
//! per session, aborted on close.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use duet_core::{
    ConversationId, ConversationLog, Environment, IdentityEvent, Message, NewRecord,
    OrderingToken, ParticipantId, PlaintextMessage, Subscription,
};
use duet_crypto::{CipherConfig, EncryptionStrategy, Scheme};
use tokio::{
    sync::{broadcast, watch},
    task::{AbortHandle, JoinHandle},
};

use crate::{
    config::EngineConfig,
    error::SyncError,
    event::{SessionState, SyncEvent},
    view::{ConversationView, decrypt_record},
};

/// Events buffered per receiver before it starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Handle to the sync engine. Cheap to clone; clones share one session.
pub struct SyncEngine<E: Environment> {
    inner: Arc<Inner<E>>,
}

impl<E: Environment> Clone for SyncEngine<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<E> {
    me: ParticipantId,
    log: Arc<dyn ConversationLog>,
    env: E,
    config: EngineConfig,
    events: broadcast::Sender<SyncEvent>,
    /// Mirrors `Shared::generation` so waiting `open` calls notice a close.
    generations: watch::Sender<u64>,
    shared: Mutex<Shared>,
}

struct Shared {
    generation: u64,
    state: SessionState,
    session: Option<Session>,
    draft: String,
}

struct Session {
    conversation: ConversationId,
    peer: ParticipantId,
    strategy: Arc<dyn EncryptionStrategy>,
    view: ConversationView,
    /// Highest token the log itself delivered. Local echoes never move it,
    /// so resubscribing from here cannot skip a record still in flight.
    last_delivered: Option<OrderingToken>,
    pump: Option<AbortHandle>,
}

impl Session {
    fn record_delivery(&mut self, batch: &[Message]) {
        let highest = batch.iter().map(|m| m.sent_at).max();
        self.last_delivered = self.last_delivered.max(highest);
    }
}

impl Shared {
    fn session_mut(&mut self, generation: u64) -> Option<&mut Session> {
        if self.generation == generation { self.session.as_mut() } else { None }
    }
}

impl<E: Environment> SyncEngine<E> {
    /// Create an idle engine acting as `me`.
    pub fn new(
        me: ParticipantId,
        log: Arc<dyn ConversationLog>,
        env: E,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (generations, _) = watch::channel(0);
        let shared =
            Shared { generation: 0, state: SessionState::Idle, session: None, draft: String::new() };

        Self {
            inner: Arc::new(Inner {
                me,
                log,
                env,
                config,
                events,
                generations,
                shared: Mutex::new(shared),
            }),
        }
    }

    /// The local participant.
    pub fn me(&self) -> &ParticipantId {
        &self.inner.me
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Open conversation, if any.
    pub fn conversation(&self) -> Option<ConversationId> {
        self.inner.lock().session.as_ref().map(|s| s.conversation.clone())
    }

    /// The other participant of the open conversation.
    pub fn peer(&self) -> Option<ParticipantId> {
        self.inner.lock().session.as_ref().map(|s| s.peer.clone())
    }

    /// Scheme of the open conversation.
    pub fn scheme(&self) -> Option<Scheme> {
        self.inner.lock().session.as_ref().map(|s| s.strategy.scheme())
    }

    /// Decrypted messages of the open conversation in display order.
    pub fn messages(&self) -> Vec<PlaintextMessage> {
        self.inner.lock().session.as_ref().map(|s| s.view.messages()).unwrap_or_default()
    }

    /// Subscribe to engine events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Open the conversation with `peer` using `cipher`.
    ///
    /// Closes any previous session first. Resolves once the first snapshot
    /// has been applied and the session is [`SessionState::Live`].
    ///
    /// # Errors
    ///
    /// - [`SyncError::SelfConversation`] if `peer` is the local user and the
    ///   policy forbids it
    /// - [`SyncError::Log`] if subscribing fails
    /// - [`SyncError::SnapshotTimeout`] if no snapshot arrives in time
    /// - [`SyncError::SubscriptionLost`] if the feed ends before the snapshot
    /// - [`SyncError::Closed`] if `close` ran while opening
    ///
    /// On error the engine is back in [`SessionState::Idle`], or
    /// [`SessionState::Closed`] if it was closed.
    pub async fn open(&self, peer: ParticipantId, cipher: CipherConfig) -> Result<(), SyncError> {
        let inner = &self.inner;
        let conversation = ConversationId::derive(&inner.me, &peer);
        let strategy = cipher.into_strategy();

        let (generation, mut generation_rx) = {
            let mut shared = inner.lock();
            if shared.session.is_some() {
                inner.close_locked(&mut shared);
            }
            if conversation.is_self_conversation() && !inner.config.allow_self_conversation {
                inner.transition(&mut shared, SessionState::Idle);
                return Err(SyncError::SelfConversation { participant: peer });
            }

            let generation = inner.bump_generation(&mut shared);
            shared.session = Some(Session {
                conversation: conversation.clone(),
                peer,
                strategy: Arc::clone(&strategy),
                view: ConversationView::new(),
                last_delivered: None,
                pump: None,
            });
            inner.transition(&mut shared, SessionState::Subscribing);
            (generation, inner.generations.subscribe())
        };

        tracing::info!(%conversation, scheme = %strategy.scheme(), "opening conversation");

        let (subscription, snapshot) =
            match inner.first_snapshot(&conversation, None, &mut generation_rx).await {
                Ok(first) => first,
                Err(err) => return Err(inner.abandon_open(generation, err)),
            };

        let fresh = {
            let mut shared = inner.lock();
            match shared.session_mut(generation) {
                Some(session) => {
                    session.record_delivery(&snapshot);
                    session.view.unseen(snapshot)
                },
                None => return Err(SyncError::Closed),
            }
        };
        let decrypted: Vec<PlaintextMessage> =
            fresh.into_iter().map(|m| decrypt_record(strategy.as_ref(), m)).collect();

        let mut shared = inner.lock();
        let Some(session) = shared.session_mut(generation) else {
            return Err(SyncError::Closed);
        };
        for message in decrypted {
            session.view.insert(message);
        }
        let count = session.view.len();

        let task = tokio::spawn(pump(
            Arc::downgrade(inner),
            generation,
            conversation.clone(),
            subscription,
            strategy,
        ));
        session.pump = Some(task.abort_handle());

        inner.transition(&mut shared, SessionState::Live);
        inner.emit(SyncEvent::MessagesUpdated { conversation: conversation.clone() });
        tracing::info!(%conversation, messages = count, "conversation live");

        Ok(())
    }

    /// Encrypt `text`, append it to the open conversation and return the
    /// token the log assigned.
    ///
    /// The message is added to the local view as sent, since a key-pair
    /// sender cannot decrypt its own ciphertext. Clears the draft on success.
    ///
    /// # Errors
    ///
    /// - [`SyncError::EmptyMessage`] if `text` is blank
    /// - [`SyncError::NoActiveConversation`] unless the session is live
    /// - [`SyncError::PayloadTooLarge`] if the scheme cannot carry `text`
    /// - [`SyncError::Log`] if the append fails
    ///
    /// Nothing is appended on any of these errors. If the session is closed
    /// while the append is in flight, the token is still returned but the
    /// closed session's view is left untouched.
    pub async fn send(&self, text: &str) -> Result<OrderingToken, SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }

        let inner = &self.inner;
        let (generation, conversation, strategy) = {
            let shared = inner.lock();
            match (&shared.session, shared.state) {
                (Some(session), SessionState::Live) => (
                    shared.generation,
                    session.conversation.clone(),
                    Arc::clone(&session.strategy),
                ),
                _ => return Err(SyncError::NoActiveConversation),
            }
        };

        let ciphertext = strategy.encrypt(text)?;
        let record = NewRecord { sender_id: inner.me.clone(), ciphertext };
        let token = inner.log.append(&conversation, record).await?;

        let mut shared = inner.lock();
        let Some(session) = shared.session_mut(generation) else {
            tracing::debug!(%conversation, %token, "append finished after session closed");
            return Ok(token);
        };
        session.view.insert(PlaintextMessage::decrypted(inner.me.clone(), text.to_owned(), token));
        shared.draft.clear();

        tracing::debug!(%conversation, %token, "message sent");
        inner.emit(SyncEvent::Sent { conversation: conversation.clone(), token });
        inner.emit(SyncEvent::MessagesUpdated { conversation });

        Ok(token)
    }

    /// Replace the compose buffer.
    pub fn set_draft(&self, text: impl Into<String>) {
        self.inner.lock().draft = text.into();
    }

    /// Current compose buffer.
    pub fn draft(&self) -> String {
        self.inner.lock().draft.clone()
    }

    /// [`send`](Self::send) the compose buffer. The buffer is kept on error.
    pub async fn send_draft(&self) -> Result<OrderingToken, SyncError> {
        let draft = self.draft();
        self.send(&draft).await
    }

    /// End the current session. Always safe, including when nothing is open.
    pub fn close(&self) {
        let mut shared = self.inner.lock();
        self.inner.close_locked(&mut shared);
    }

    /// React to a change of the signed-in user.
    ///
    /// Signing out, or another user signing in, closes the session.
    pub fn handle_identity_event(&self, event: &IdentityEvent) {
        match event {
            IdentityEvent::SignedOut => {
                tracing::info!(me = %self.inner.me, "signed out, closing session");
                self.close();
            },
            IdentityEvent::SignedIn(profile) if profile.id != self.inner.me => {
                tracing::info!(me = %self.inner.me, user = %profile.id, "user changed, closing session");
                self.close();
            },
            IdentityEvent::SignedIn(_) => {},
        }
    }

    /// Spawn a task applying every identity change to this engine until the
    /// feed closes.
    pub fn follow_identity(&self, mut changes: broadcast::Receiver<IdentityEvent>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => engine.handle_identity_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "identity feed lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl<E: Environment> Inner<E> {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn transition(&self, shared: &mut Shared, state: SessionState) {
        if shared.state != state {
            tracing::debug!(from = %shared.state, to = %state, "session state");
            shared.state = state;
            self.emit(SyncEvent::StateChanged(state));
        }
    }

    fn bump_generation(&self, shared: &mut Shared) -> u64 {
        shared.generation += 1;
        self.generations.send_replace(shared.generation);
        shared.generation
    }

    fn close_locked(&self, shared: &mut Shared) {
        self.bump_generation(shared);
        if let Some(session) = shared.session.take() {
            if let Some(pump) = session.pump {
                pump.abort();
            }
            tracing::info!(conversation = %session.conversation, "conversation closed");
        }
        self.transition(shared, SessionState::Closed);
    }

    /// Undo a failed `open`, unless a close already superseded it.
    fn abandon_open(&self, generation: u64, err: SyncError) -> SyncError {
        let mut shared = self.lock();
        if shared.generation != generation {
            return SyncError::Closed;
        }
        shared.session = None;
        self.transition(&mut shared, SessionState::Idle);
        tracing::warn!(%err, "open failed");
        err
    }

    /// Subscribe from `from` and wait for the snapshot, bounded by the
    /// snapshot timeout. Fails with `Closed` as soon as the generation moves.
    async fn first_snapshot(
        &self,
        conversation: &ConversationId,
        from: Option<OrderingToken>,
        generation_rx: &mut watch::Receiver<u64>,
    ) -> Result<(Subscription, Vec<Message>), SyncError> {
        let mut subscription = tokio::select! {
            biased;
            _ = generation_rx.changed() => return Err(SyncError::Closed),
            result = self.log.subscribe(conversation, from) => result?,
        };

        let timeout = self.config.snapshot_timeout;
        let batch = tokio::select! {
            biased;
            _ = generation_rx.changed() => return Err(SyncError::Closed),
            batch = subscription.next_batch() => batch,
            () = self.env.sleep(timeout) => return Err(SyncError::SnapshotTimeout { timeout }),
        };

        match batch {
            Some(snapshot) => Ok((subscription, snapshot)),
            None => Err(SyncError::SubscriptionLost),
        }
    }

    /// Merge a delivered batch. Returns false once the session is gone.
    fn apply_batch(
        &self,
        generation: u64,
        conversation: &ConversationId,
        strategy: &dyn EncryptionStrategy,
        batch: Vec<Message>,
    ) -> bool {
        let fresh = {
            let mut shared = self.lock();
            match shared.session_mut(generation) {
                Some(session) => {
                    session.record_delivery(&batch);
                    session.view.unseen(batch)
                },
                None => return false,
            }
        };
        if fresh.is_empty() {
            return true;
        }

        let decrypted: Vec<PlaintextMessage> =
            fresh.into_iter().map(|m| decrypt_record(strategy, m)).collect();

        let mut shared = self.lock();
        let Some(session) = shared.session_mut(generation) else {
            return false;
        };
        let mut changed = 0usize;
        for message in decrypted {
            if session.view.insert(message) {
                changed += 1;
            }
        }
        if changed > 0 {
            tracing::debug!(%conversation, changed, "merged batch");
            self.emit(SyncEvent::MessagesUpdated { conversation: conversation.clone() });
        }
        true
    }
}

impl<E> Drop for Inner<E> {
    fn drop(&mut self) {
        let shared = self.shared.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(pump) = shared.session.as_mut().and_then(|s| s.pump.take()) {
            pump.abort();
        }
    }
}

/// Drain one session's subscription until the session ends.
async fn pump<E: Environment>(
    engine: Weak<Inner<E>>,
    generation: u64,
    conversation: ConversationId,
    mut subscription: Subscription,
    strategy: Arc<dyn EncryptionStrategy>,
) {
    // Consecutive failed attempts. A feed that ends before delivering anything
    // past its snapshot counts as one, so a backend that accepts and then
    // drops every subscription is retried with growing delays.
    let mut failures = 0u32;
    loop {
        let mut delivered = false;
        while let Some(batch) = subscription.next_batch().await {
            let Some(inner) = engine.upgrade() else {
                return;
            };
            if !inner.apply_batch(generation, &conversation, strategy.as_ref(), batch) {
                return;
            }
            delivered = true;
        }
        drop(subscription);

        failures = if delivered { 0 } else { failures.saturating_add(1) };
        match recover(&engine, generation, &conversation, strategy.as_ref(), &mut failures).await {
            Some(resubscribed) => subscription = resubscribed,
            None => return,
        }
    }
}

/// Resubscribe after the feed ended and wait for the new snapshot, retrying
/// with capped exponential backoff. `None` once the session or the engine is
/// gone.
///
/// The session stays [`SessionState::Subscribing`] until the snapshot has been
/// merged. The engine is only upgraded for the duration of each attempt, so
/// dropping every handle stops the retries.
async fn recover<E: Environment>(
    engine: &Weak<Inner<E>>,
    generation: u64,
    conversation: &ConversationId,
    strategy: &dyn EncryptionStrategy,
    failures: &mut u32,
) -> Option<Subscription> {
    {
        let inner = engine.upgrade()?;
        let mut shared = inner.lock();
        if shared.generation != generation {
            return None;
        }
        tracing::warn!(%conversation, failures = *failures, "subscription lost, resubscribing");
        inner.emit(SyncEvent::SubscriptionLost { conversation: conversation.clone() });
        inner.transition(&mut shared, SessionState::Subscribing);
    }

    loop {
        if *failures > 0 {
            let inner = engine.upgrade()?;
            let delay = inner.config.backoff(*failures - 1);
            let env = inner.env.clone();
            drop(inner);

            tracing::debug!(%conversation, failures = *failures, ?delay, "backing off");
            env.sleep(delay).await;
        }

        let inner = engine.upgrade()?;
        let (from, mut generation_rx) = {
            let mut shared = inner.lock();
            let from = shared.session_mut(generation)?.last_delivered;
            (from, inner.generations.subscribe())
        };

        let (subscription, snapshot) =
            match inner.first_snapshot(conversation, from, &mut generation_rx).await {
                Ok(first) => first,
                Err(SyncError::Closed) => return None,
                Err(err) => {
                    tracing::warn!(%conversation, %err, failures = *failures, "resubscribe failed");
                    *failures = failures.saturating_add(1);
                    continue;
                },
            };

        if !inner.apply_batch(generation, conversation, strategy, snapshot) {
            return None;
        }

        let mut shared = inner.lock();
        if shared.generation != generation {
            return None;
        }
        inner.transition(&mut shared, SessionState::Live);
        inner.emit(SyncEvent::Resubscribed {
            conversation: conversation.clone(),
            attempts: *failures,
        });
        tracing::info!(%conversation, ?from, attempts = *failures, "resubscribed");
        return Some(subscription);
    }
}
