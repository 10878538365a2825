//! Scheme agreement and directory publication.
//!
//! Each directory entry advertises the schemes its owner can read and,
//! for the key-pair scheme, the owner's exported public key. Two participants
//! use the strongest scheme they have in common.

use duet_core::{Directory, DirectoryEntry, Profile};
use duet_crypto::{CipherConfig, KeyLifecycleManager, KeyMaterial, Scheme, SharedSecret};

use crate::error::SyncError;

/// Pick the scheme for a conversation with `peer`.
///
/// Key-pair wins when both sides advertise it and the peer published a key;
/// otherwise shared-secret when both advertise it.
pub fn negotiate_scheme(own: &[Scheme], peer: &DirectoryEntry) -> Result<Scheme, SyncError> {
    let both = |scheme| own.contains(&scheme) && peer.supports(scheme);

    if both(Scheme::KeyPair) && peer.public_key.is_some() {
        Ok(Scheme::KeyPair)
    } else if both(Scheme::SharedSecret) {
        Ok(Scheme::SharedSecret)
    } else {
        Err(SyncError::NoCommonScheme { peer: peer.profile.id.clone() })
    }
}

/// Key-pair cipher configuration for talking to `peer`.
///
/// Imports the peer's published key; nothing is retained if it is malformed.
pub async fn key_pair_config(
    keys: &KeyLifecycleManager,
    own: KeyMaterial,
    peer: &DirectoryEntry,
) -> Result<CipherConfig, SyncError> {
    let Some(published) = peer.public_key.as_deref() else {
        return Err(SyncError::MissingPeerKey { peer: peer.profile.id.clone() });
    };
    let peer_key = keys.import_public_key(published).await?;
    Ok(CipherConfig::KeyPair { own, peer: peer_key })
}

/// Negotiate a scheme with `peer` and build its cipher configuration from
/// whatever local key material is available.
pub async fn cipher_for_peer(
    keys: &KeyLifecycleManager,
    own_material: Option<&KeyMaterial>,
    shared_secret: Option<&SharedSecret>,
    peer: &DirectoryEntry,
) -> Result<CipherConfig, SyncError> {
    let mut own = Vec::with_capacity(2);
    if own_material.is_some() {
        own.push(Scheme::KeyPair);
    }
    if shared_secret.is_some() {
        own.push(Scheme::SharedSecret);
    }

    match (negotiate_scheme(&own, peer)?, own_material, shared_secret) {
        (Scheme::KeyPair, Some(material), _) => {
            key_pair_config(keys, material.clone(), peer).await
        },
        (Scheme::SharedSecret, _, Some(key)) => Ok(CipherConfig::SharedSecret { key: key.clone() }),
        _ => Err(SyncError::MissingKeyMaterial),
    }
}

/// Publish (upsert) the local user's directory entry.
///
/// Advertises `schemes`, attaching the exported public key of `keys` when
/// the key-pair scheme is among them.
pub async fn publish_self(
    directory: &dyn Directory,
    profile: Profile,
    material: Option<&KeyMaterial>,
    schemes: &[Scheme],
) -> Result<DirectoryEntry, SyncError> {
    let public_key = match (schemes.contains(&Scheme::KeyPair), material) {
        (true, Some(material)) => Some(KeyLifecycleManager::new().export_public_key(material).await?),
        (true, None) => return Err(SyncError::MissingKeyMaterial),
        (false, _) => None,
    };

    let entry = DirectoryEntry { profile, public_key, schemes: schemes.to_vec() };
    directory.publish(entry.clone()).await?;

    tracing::info!(user = %entry.profile.id, schemes = ?entry.schemes, "published directory entry");
    Ok(entry)
}
