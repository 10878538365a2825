//! End-to-end sync engine tests over the in-memory collaborators.

use std::{
    sync::{
        Arc, LazyLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use duet_client::{
    EngineConfig, SessionState, SyncEngine, SyncError, SyncEvent, cipher_for_peer, publish_self,
};
use duet_core::{
    ConversationId, ConversationLog, Directory, IdentityProvider, LogError, Message, NewRecord,
    OrderingToken, ParticipantId, Profile, Subscription,
};
use duet_crypto::{
    CipherConfig, EncryptionStrategy, KeyLifecycleManager, KeyMaterial, KeyPairCipher, Scheme,
    SharedSecret, SharedSecretCipher,
};
use duet_harness::{
    MemoryDirectory, MemoryIdentity, MemoryLog, ReplayMode, SUBSCRIBER_BUFFER, SimEnv,
};
use tokio::sync::{Mutex, Notify, broadcast, mpsc};

static ALICE: LazyLock<KeyMaterial> = LazyLock::new(generate);
static BOB: LazyLock<KeyMaterial> = LazyLock::new(generate);
static CAROL: LazyLock<KeyMaterial> = LazyLock::new(generate);

const WAIT: Duration = Duration::from_secs(10);

fn generate() -> KeyMaterial {
    KeyLifecycleManager::new().generate_key_pair_blocking().unwrap()
}

fn participant(id: &str) -> ParticipantId {
    ParticipantId::new(id).unwrap()
}

fn profile(id: &str, name: &str) -> Profile {
    Profile { id: participant(id), display_name: name.into(), avatar_url: None }
}

fn engine(id: &str, log: Arc<dyn ConversationLog>, env: &SimEnv) -> SyncEngine<SimEnv> {
    SyncEngine::new(participant(id), log, env.clone(), EngineConfig::default())
}

fn key_pair(own: &KeyMaterial, peer: &KeyMaterial) -> CipherConfig {
    CipherConfig::KeyPair { own: own.clone(), peer: peer.public_key().clone() }
}

fn shared() -> CipherConfig {
    CipherConfig::SharedSecret { key: SharedSecret::from_passphrase("correct horse") }
}

fn conversation() -> ConversationId {
    ConversationId::derive(&participant("u1"), &participant("u2"))
}

fn texts<E: duet_core::Environment>(engine: &SyncEngine<E>) -> Vec<(String, String)> {
    engine.messages().into_iter().map(|m| (m.sender_id.to_string(), m.text)).collect()
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next_matching(
    events: &mut broadcast::Receiver<SyncEvent>,
    predicate: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not observed in time")
}

/// The two-participant scenario: keys come from the directory, messages are
/// encrypted to the peer's public key, each side reads the other's messages
/// and a third party cannot read any of them.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn alice_and_bob_exchange_key_pair_messages() {
    let log = MemoryLog::new();
    let env = SimEnv::new();
    let directory = MemoryDirectory::new();
    let keys = KeyLifecycleManager::new();
    let both = [Scheme::KeyPair, Scheme::SharedSecret];

    publish_self(&directory, profile("u1", "Alice"), Some(&*ALICE), &both).await.unwrap();
    publish_self(&directory, profile("u2", "Bob"), Some(&*BOB), &both).await.unwrap();

    let alice_peers = directory.list_other_users(&participant("u1")).await.unwrap();
    let bob_peers = directory.list_other_users(&participant("u2")).await.unwrap();
    assert_eq!(alice_peers.len(), 1);
    assert_eq!(bob_peers.len(), 1);

    let alice_cipher = cipher_for_peer(&keys, Some(&*ALICE), None, &alice_peers[0]).await.unwrap();
    let bob_cipher = cipher_for_peer(&keys, Some(&*BOB), None, &bob_peers[0]).await.unwrap();
    assert_eq!(alice_cipher.scheme(), Scheme::KeyPair);

    let alice = engine("u1", Arc::new(log.clone()), &env);
    let bob = engine("u2", Arc::new(log.clone()), &env);
    alice.open(participant("u2"), alice_cipher).await.unwrap();
    bob.open(participant("u1"), bob_cipher).await.unwrap();

    assert_eq!(alice.conversation(), Some(conversation()));
    assert_eq!(bob.conversation(), Some(conversation()));

    alice.send("hi bob").await.unwrap();
    eventually(|| texts(&bob) == [("u1".to_owned(), "hi bob".to_owned())]).await;

    bob.send("hi alice").await.unwrap();
    let expected = vec![
        ("u1".to_owned(), "hi bob".to_owned()),
        ("u2".to_owned(), "hi alice".to_owned()),
    ];
    eventually(|| texts(&alice) == expected && texts(&bob) == expected).await;

    let records = log.records(&conversation());
    assert_eq!(records.len(), 2);
    for record in &records {
        assert!(!record.ciphertext.contains("hi bob"));
        assert!(KeyPairCipher::decrypt_with(CAROL.private_key(), &record.ciphertext).is_err());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreadable_message_becomes_placeholder_and_conversation_continues() {
    let log = MemoryLog::new();
    let env = SimEnv::new();
    let alice = engine("u1", Arc::new(log.clone()), &env);
    let bob = engine("u2", Arc::new(log.clone()), &env);

    // Alice mistakenly encrypts to Carol's key
    alice.open(participant("u2"), key_pair(&ALICE, &CAROL)).await.unwrap();
    bob.open(participant("u1"), key_pair(&BOB, &ALICE)).await.unwrap();
    alice.send("for the wrong reader").await.unwrap();

    eventually(|| bob.messages().len() == 1).await;
    let received = bob.messages();
    assert_eq!(received[0].text, "[Decryption failed]");
    assert!(received[0].decryption_failed);

    alice.open(participant("u2"), key_pair(&ALICE, &BOB)).await.unwrap();
    alice.send("second try").await.unwrap();

    eventually(|| bob.messages().len() == 2).await;
    assert_eq!(bob.messages()[1].text, "second try");
    assert_eq!(bob.state(), SessionState::Live);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redelivered_batches_do_not_duplicate() {
    for mode in [ReplayMode::Delta, ReplayMode::Full] {
        let log = MemoryLog::with_mode(mode);
        let env = SimEnv::new();
        let alice = engine("u1", Arc::new(log.clone()), &env);
        let bob = engine("u2", Arc::new(log.clone()), &env);

        alice.open(participant("u2"), shared()).await.unwrap();
        bob.open(participant("u1"), shared()).await.unwrap();

        for text in ["one", "two", "three"] {
            alice.send(text).await.unwrap();
        }
        eventually(|| bob.messages().len() == 3).await;

        log.redeliver(&conversation());
        log.redeliver(&conversation());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let tokens: Vec<OrderingToken> = bob.messages().iter().map(|m| m.sent_at).collect();
        assert_eq!(tokens.len(), 3, "{mode:?}");
        assert!(tokens.windows(2).all(|pair| pair[0] < pair[1]), "{mode:?}");
        assert_eq!(texts(&bob), texts(&alice), "{mode:?}");
    }
}

#[tokio::test]
async fn blank_messages_are_rejected_without_append() {
    let log = MemoryLog::new();
    let alice = engine("u1", Arc::new(log.clone()), &SimEnv::new());
    alice.open(participant("u2"), shared()).await.unwrap();

    assert_eq!(alice.send("").await, Err(SyncError::EmptyMessage));
    assert_eq!(alice.send("   ").await, Err(SyncError::EmptyMessage));

    alice.set_draft("  ");
    assert_eq!(alice.send_draft().await, Err(SyncError::EmptyMessage));
    assert_eq!(alice.draft(), "  ");

    assert!(log.records(&conversation()).is_empty());
}

#[tokio::test]
async fn oversized_key_pair_message_is_rejected_without_append() {
    let log = MemoryLog::new();
    let alice = engine("u1", Arc::new(log.clone()), &SimEnv::new());
    alice.open(participant("u2"), key_pair(&ALICE, &BOB)).await.unwrap();

    let err = alice.send(&"x".repeat(191)).await.unwrap_err();
    assert_eq!(err, SyncError::PayloadTooLarge { len: 191, max: 190 });
    assert!(log.records(&conversation()).is_empty());

    alice.send(&"x".repeat(190)).await.unwrap();
    assert_eq!(log.records(&conversation()).len(), 1);
}

#[tokio::test]
async fn failed_append_keeps_draft_and_view() {
    let log = MemoryLog::new();
    let alice = engine("u1", Arc::new(log.clone()), &SimEnv::new());
    alice.open(participant("u2"), shared()).await.unwrap();

    alice.set_draft("hello");
    log.fail_next_appends(1);

    let err = alice.send_draft().await.unwrap_err();
    assert!(err.is_recoverable());
    assert_eq!(alice.draft(), "hello");
    assert!(alice.messages().is_empty());

    alice.send_draft().await.unwrap();
    assert_eq!(alice.draft(), "");
    assert_eq!(texts(&alice), [("u1".to_owned(), "hello".to_owned())]);
}

/// Append a record as Bob without a second engine competing for the
/// injected subscribe failures.
async fn append_as_bob(log: &MemoryLog, text: &str) {
    let cipher = SharedSecretCipher::new(SharedSecret::from_passphrase("correct horse"));
    let ciphertext = cipher.encrypt(text).unwrap();
    let record = NewRecord { sender_id: participant("u2"), ciphertext };
    log.append(&conversation(), record).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lost_subscription_is_recovered_with_backoff() {
    let log = MemoryLog::new();
    let env = SimEnv::new();
    let alice = engine("u1", Arc::new(log.clone()), &env);
    alice.open(participant("u2"), shared()).await.unwrap();

    append_as_bob(&log, "before").await;
    eventually(|| alice.messages().len() == 1).await;

    let mut events = alice.events();
    log.fail_next_subscribes(2);
    log.sever_subscriptions(&conversation());

    next_matching(&mut events, |e| matches!(e, SyncEvent::SubscriptionLost { .. })).await;
    let resubscribed =
        next_matching(&mut events, |e| matches!(e, SyncEvent::Resubscribed { .. })).await;

    assert_eq!(resubscribed, SyncEvent::Resubscribed { conversation: conversation(), attempts: 2 });
    assert_eq!(env.sleep_count(), 2);
    assert_eq!(env.elapsed(), Duration::from_millis(250 + 500));
    assert_eq!(alice.state(), SessionState::Live);
    assert_eq!(log.subscriber_count(&conversation()), 1);

    // The resubscription starts at the last seen token, which is merged idempotently
    append_as_bob(&log, "after").await;
    let expected = vec![
        ("u2".to_owned(), "before".to_owned()),
        ("u2".to_owned(), "after".to_owned()),
    ];
    eventually(|| texts(&alice) == expected).await;
}

/// A lagging subscriber is dropped by the log while a peer record is still
/// queued for it. Our own send lands above that record; resubscribing must
/// still fetch it.
#[tokio::test]
async fn record_in_flight_when_dropped_for_lagging_is_not_lost() {
    let log = MemoryLog::new();
    let alice = engine("u1", Arc::new(log.clone()), &SimEnv::new());
    alice.open(participant("u2"), shared()).await.unwrap();

    // Nothing yields in between, so the pump cannot drain and the last
    // append overflows the subscriber buffer
    for n in 0..=SUBSCRIBER_BUFFER {
        append_as_bob(&log, &format!("bob {n}")).await;
    }
    assert_eq!(log.subscriber_count(&conversation()), 0);
    alice.send("alice").await.unwrap();

    let records = log.records(&conversation());
    assert_eq!(records.len(), SUBSCRIBER_BUFFER + 2);
    eventually(|| alice.messages().len() == records.len()).await;

    let viewed: Vec<_> = alice.messages().into_iter().map(|m| m.sent_at).collect();
    let logged: Vec<_> = records.iter().map(|r| r.sent_at).collect();
    assert_eq!(viewed, logged);
    assert_eq!(alice.state(), SessionState::Live);
    assert!(alice.messages().iter().all(|m| !m.decryption_failed));
}

/// Log that answers every subscribe with an empty snapshot and then ends the
/// feed straight away.
#[derive(Default)]
struct EndingLog {
    subscribes: AtomicUsize,
}

#[async_trait]
impl ConversationLog for EndingLog {
    async fn append(
        &self,
        _conversation: &ConversationId,
        _record: NewRecord,
    ) -> Result<OrderingToken, LogError> {
        Err(LogError::Rejected { reason: "read only".into() })
    }

    async fn subscribe(
        &self,
        _conversation: &ConversationId,
        _from: Option<OrderingToken>,
    ) -> Result<Subscription, LogError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(1);
        tx.try_send(Vec::new()).unwrap();
        Ok(Subscription::new(rx))
    }
}

#[tokio::test]
async fn feeds_ending_right_after_snapshot_back_off() {
    let log = Arc::new(EndingLog::default());
    let env = SimEnv::new();
    let alice = engine("u1", Arc::clone(&log) as Arc<dyn ConversationLog>, &env);
    let mut events = alice.events();

    alice.open(participant("u2"), shared()).await.unwrap();

    let mut attempts = Vec::new();
    while attempts.len() < 3 {
        match next_matching(&mut events, |e| matches!(e, SyncEvent::Resubscribed { .. })).await {
            SyncEvent::Resubscribed { attempts: n, .. } => attempts.push(n),
            other => panic!("unexpected event {other:?}"),
        }
    }
    alice.close();

    // Failures accumulate across losses, each retry waiting longer
    assert_eq!(attempts, [1, 2, 3]);
    assert!(env.elapsed() >= Duration::from_millis(250 + 500 + 1000));
    let subscribes = log.subscribes.load(Ordering::SeqCst);
    assert!(subscribes < 10, "retried {subscribes} times");
}

/// Log whose first subscription comes from a [`MemoryLog`]; later ones wait
/// for the test to hand over a snapshot.
struct HeldSnapshotLog {
    inner: MemoryLog,
    held: Mutex<Vec<mpsc::Sender<Vec<Message>>>>,
    subscribes: AtomicUsize,
}

#[async_trait]
impl ConversationLog for HeldSnapshotLog {
    async fn append(
        &self,
        conversation: &ConversationId,
        record: NewRecord,
    ) -> Result<OrderingToken, LogError> {
        self.inner.append(conversation, record).await
    }

    async fn subscribe(
        &self,
        conversation: &ConversationId,
        from: Option<OrderingToken>,
    ) -> Result<Subscription, LogError> {
        if self.subscribes.fetch_add(1, Ordering::SeqCst) == 0 {
            return self.inner.subscribe(conversation, from).await;
        }
        let (tx, rx) = mpsc::channel(1);
        self.held.lock().await.push(tx);
        Ok(Subscription::new(rx))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resubscription_is_live_only_after_snapshot() {
    let memory = MemoryLog::new();
    let log = Arc::new(HeldSnapshotLog {
        inner: memory.clone(),
        held: Mutex::new(Vec::new()),
        subscribes: AtomicUsize::new(0),
    });
    let alice = SyncEngine::new(
        participant("u1"),
        Arc::clone(&log) as Arc<dyn ConversationLog>,
        duet_client::SystemEnv::new(),
        EngineConfig { snapshot_timeout: Duration::from_secs(60), ..EngineConfig::default() },
    );
    alice.open(participant("u2"), shared()).await.unwrap();
    append_as_bob(&memory, "before").await;
    eventually(|| alice.messages().len() == 1).await;

    let mut events = alice.events();
    memory.sever_subscriptions(&conversation());
    next_matching(&mut events, |e| matches!(e, SyncEvent::SubscriptionLost { .. })).await;
    eventually(|| log.held.try_lock().is_ok_and(|held| !held.is_empty())).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(alice.state(), SessionState::Subscribing);
    assert_eq!(alice.send("too early").await, Err(SyncError::NoActiveConversation));

    append_as_bob(&memory, "while away").await;
    let snapshot = memory.records(&conversation());
    log.held.lock().await[0].send(snapshot).await.unwrap();

    let resubscribed =
        next_matching(&mut events, |e| matches!(e, SyncEvent::Resubscribed { .. })).await;
    assert_eq!(resubscribed, SyncEvent::Resubscribed { conversation: conversation(), attempts: 0 });
    assert_eq!(alice.state(), SessionState::Live);
    assert_eq!(
        texts(&alice),
        [("u2".to_owned(), "before".to_owned()), ("u2".to_owned(), "while away".to_owned())]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_releases_subscription_and_blocks_sending() {
    let log = MemoryLog::new();
    let alice = engine("u1", Arc::new(log.clone()), &SimEnv::new());
    alice.open(participant("u2"), shared()).await.unwrap();
    assert_eq!(log.subscriber_count(&conversation()), 1);

    alice.close();

    assert_eq!(alice.state(), SessionState::Closed);
    assert_eq!(alice.send("late").await, Err(SyncError::NoActiveConversation));
    eventually(|| log.subscriber_count(&conversation()) == 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reopening_switches_conversation() {
    let log = MemoryLog::new();
    let alice = engine("u1", Arc::new(log.clone()), &SimEnv::new());
    let carol = ConversationId::derive(&participant("u1"), &participant("u3"));

    alice.open(participant("u2"), shared()).await.unwrap();
    alice.send("to bob").await.unwrap();
    alice.open(participant("u3"), shared()).await.unwrap();

    assert_eq!(alice.conversation(), Some(carol.clone()));
    assert!(alice.messages().is_empty());
    eventually(|| log.subscriber_count(&conversation()) == 0).await;
    assert_eq!(log.subscriber_count(&carol), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sign_out_closes_the_session() {
    let log = MemoryLog::new();
    let identity = MemoryIdentity::new();
    identity.sign_in(profile("u1", "Alice"));

    let alice = engine("u1", Arc::new(log.clone()), &SimEnv::new());
    let follower = alice.follow_identity(identity.changes());
    alice.open(participant("u2"), shared()).await.unwrap();

    identity.sign_out();
    eventually(|| alice.state() == SessionState::Closed).await;

    drop(identity);
    tokio::time::timeout(WAIT, follower).await.unwrap().unwrap();
}

/// Log whose subscriptions never deliver, or end immediately.
struct StubLog {
    end_immediately: bool,
    feeds: Mutex<Vec<mpsc::Sender<Vec<Message>>>>,
}

impl StubLog {
    fn new(end_immediately: bool) -> Self {
        Self { end_immediately, feeds: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl ConversationLog for StubLog {
    async fn append(
        &self,
        _conversation: &ConversationId,
        _record: NewRecord,
    ) -> Result<OrderingToken, LogError> {
        Err(LogError::Rejected { reason: "read only".into() })
    }

    async fn subscribe(
        &self,
        _conversation: &ConversationId,
        _from: Option<OrderingToken>,
    ) -> Result<Subscription, LogError> {
        let (tx, rx) = mpsc::channel(1);
        if !self.end_immediately {
            self.feeds.lock().await.push(tx);
        }
        Ok(Subscription::new(rx))
    }
}

#[tokio::test]
async fn silent_log_times_out_and_returns_to_idle() {
    let alice = engine("u1", Arc::new(StubLog::new(false)), &SimEnv::new());

    let err = alice.open(participant("u2"), shared()).await.unwrap_err();

    assert_eq!(err, SyncError::SnapshotTimeout { timeout: Duration::from_secs(10) });
    assert_eq!(alice.state(), SessionState::Idle);
    assert!(alice.conversation().is_none());
}

#[tokio::test]
async fn feed_ending_before_snapshot_fails_open() {
    let alice = engine("u1", Arc::new(StubLog::new(true)), &SimEnv::new());

    let err = alice.open(participant("u2"), shared()).await.unwrap_err();

    assert_eq!(err, SyncError::SubscriptionLost);
    assert_eq!(alice.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_during_open_fails_with_closed() {
    let log: Arc<dyn ConversationLog> = Arc::new(StubLog::new(false));
    let alice = SyncEngine::new(
        participant("u1"),
        log,
        duet_client::SystemEnv::new(),
        EngineConfig { snapshot_timeout: Duration::from_secs(60), ..EngineConfig::default() },
    );

    let opening = {
        let alice = alice.clone();
        tokio::spawn(async move { alice.open(participant("u2"), shared()).await })
    };
    tokio::time::timeout(WAIT, async {
        while alice.state() != SessionState::Subscribing {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    alice.close();

    let result = tokio::time::timeout(WAIT, opening).await.unwrap().unwrap();
    assert_eq!(result, Err(SyncError::Closed));
    assert_eq!(alice.state(), SessionState::Closed);
}

/// Log that parks every append until released.
struct GatedLog {
    inner: MemoryLog,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl ConversationLog for GatedLog {
    async fn append(
        &self,
        conversation: &ConversationId,
        record: NewRecord,
    ) -> Result<OrderingToken, LogError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.append(conversation, record).await
    }

    async fn subscribe(
        &self,
        conversation: &ConversationId,
        from: Option<OrderingToken>,
    ) -> Result<Subscription, LogError> {
        self.inner.subscribe(conversation, from).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_during_send_discards_late_result() {
    let memory = MemoryLog::new();
    let gated = Arc::new(GatedLog {
        inner: memory.clone(),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let alice = engine("u1", Arc::clone(&gated) as Arc<dyn ConversationLog>, &SimEnv::new());
    alice.open(participant("u2"), shared()).await.unwrap();
    alice.set_draft("in flight");

    let sending = {
        let alice = alice.clone();
        tokio::spawn(async move { alice.send_draft().await })
    };
    tokio::time::timeout(WAIT, gated.entered.notified()).await.unwrap();

    alice.close();
    let mut events = alice.events();
    gated.release.notify_one();

    let token = tokio::time::timeout(WAIT, sending).await.unwrap().unwrap().unwrap();

    // The append happened, but nothing reaches the closed session
    assert_eq!(memory.records(&conversation())[0].sent_at, token);
    assert!(alice.messages().is_empty());
    assert_eq!(alice.state(), SessionState::Closed);
    assert_eq!(alice.draft(), "in flight");
    assert!(matches!(events.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
}

#[tokio::test]
async fn self_conversation_follows_policy() {
    let log = MemoryLog::new();
    let env = SimEnv::new();

    let strict = engine("u1", Arc::new(log.clone()), &env);
    let err = strict.open(participant("u1"), shared()).await.unwrap_err();
    assert!(matches!(err, SyncError::SelfConversation { .. }));

    let relaxed = SyncEngine::new(
        participant("u1"),
        Arc::new(log.clone()),
        env,
        EngineConfig { allow_self_conversation: true, ..EngineConfig::default() },
    );
    relaxed.open(participant("u1"), shared()).await.unwrap();
    relaxed.send("note to self").await.unwrap();

    assert_eq!(relaxed.conversation().unwrap().as_str(), "u1_u1");
    assert_eq!(texts(&relaxed), [("u1".to_owned(), "note to self".to_owned())]);
}
