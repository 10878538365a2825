//! Identity and user directory boundaries.

use async_trait::async_trait;
use duet_crypto::Scheme;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{conversation::ParticipantId, error::DirectoryError};

/// Public profile of a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Stable identifier.
    pub id: ParticipantId,
    /// Human-readable name.
    pub display_name: String,
    /// Optional avatar location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// A user as listed in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Public profile.
    pub profile: Profile,
    /// Exported public key, for users who support the key-pair scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Encryption schemes this user can read.
    #[serde(default)]
    pub schemes: Vec<Scheme>,
}

impl DirectoryEntry {
    /// Check if this user advertises `scheme`.
    pub fn supports(&self, scheme: Scheme) -> bool {
        self.schemes.contains(&scheme)
    }
}

/// Change in the locally signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    /// A user signed in.
    SignedIn(Profile),
    /// The current user signed out.
    SignedOut,
}

/// Source of the locally authenticated user.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Currently signed-in user, if any.
    fn current_user(&self) -> Option<Profile>;

    /// Feed of sign-in and sign-out events.
    fn changes(&self) -> broadcast::Receiver<IdentityEvent>;
}

/// Registry of users and their published keys.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Every listed user except `exclude`.
    async fn list_other_users(
        &self,
        exclude: &ParticipantId,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Insert or replace the entry for `entry.profile.id`.
    async fn publish(&self, entry: DirectoryEntry) -> Result<(), DirectoryError>;

    /// Entry for a single user.
    async fn lookup(&self, id: &ParticipantId) -> Result<Option<DirectoryEntry>, DirectoryError>;
}
