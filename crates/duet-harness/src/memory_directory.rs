//! In-memory directory and identity provider.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use duet_core::{
    Directory, DirectoryEntry, DirectoryError, IdentityEvent, IdentityProvider, ParticipantId,
    Profile,
};
use duet_crypto::{KeyLifecycleManager, Scheme};
use tokio::sync::broadcast;

/// In-memory [`Directory`] keyed by participant id.
///
/// Published public keys are validated on the way in, so every listed key
/// imports cleanly.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Mutex<DirectoryState>>,
}

#[derive(Default)]
struct DirectoryState {
    entries: BTreeMap<ParticipantId, DirectoryEntry>,
    unavailable: bool,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`DirectoryError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn available(&self) -> Result<MutexGuard<'_, DirectoryState>, DirectoryError> {
        let state = self.lock();
        if state.unavailable {
            return Err(DirectoryError::Unavailable { reason: "injected outage".into() });
        }
        Ok(state)
    }
}

async fn validate(entry: &DirectoryEntry) -> Result<(), DirectoryError> {
    match &entry.public_key {
        Some(key) => {
            KeyLifecycleManager::new()
                .import_public_key(key)
                .await
                .map_err(|err| DirectoryError::InvalidEntry { reason: err.to_string() })?;
        },
        None if entry.supports(Scheme::KeyPair) => {
            return Err(DirectoryError::InvalidEntry {
                reason: "key-pair scheme advertised without a public key".into(),
            });
        },
        None => {},
    }
    Ok(())
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn list_other_users(
        &self,
        exclude: &ParticipantId,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let state = self.available()?;
        Ok(state.entries.values().filter(|entry| entry.profile.id != *exclude).cloned().collect())
    }

    async fn publish(&self, entry: DirectoryEntry) -> Result<(), DirectoryError> {
        validate(&entry).await?;
        let mut state = self.available()?;
        tracing::debug!(user = %entry.profile.id, schemes = ?entry.schemes, "published profile");
        state.entries.insert(entry.profile.id.clone(), entry);
        Ok(())
    }

    async fn lookup(&self, id: &ParticipantId) -> Result<Option<DirectoryEntry>, DirectoryError> {
        let state = self.available()?;
        Ok(state.entries.get(id).cloned())
    }
}

/// In-memory [`IdentityProvider`] driven by explicit sign-in and sign-out
/// calls.
#[derive(Clone)]
pub struct MemoryIdentity {
    current: Arc<Mutex<Option<Profile>>>,
    events: broadcast::Sender<IdentityEvent>,
}

impl MemoryIdentity {
    /// Create a provider with nobody signed in.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self { current: Arc::new(Mutex::new(None)), events }
    }

    /// Sign `profile` in, replacing any current user.
    pub fn sign_in(&self, profile: Profile) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(profile.clone());
        // No receivers is fine
        let _ = self.events.send(IdentityEvent::SignedIn(profile));
    }

    /// Sign the current user out.
    pub fn sign_out(&self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
        let _ = self.events.send(IdentityEvent::SignedOut);
    }
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for MemoryIdentity {
    fn current_user(&self) -> Option<Profile> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn changes(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }
}
