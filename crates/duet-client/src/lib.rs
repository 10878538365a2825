//! Duet Client
//!
//! Sync engine for one-to-one encrypted conversations.
//!
//! # Architecture
//!
//! ```text
//! open(peer, cipher) ──► ConversationId::derive(me, peer)
//!                               │
//!                               ▼
//!                     ConversationLog::subscribe ──► pump task
//!                                                       │ batches
//!                                                       ▼
//!                                     decrypt ──► ConversationView (ordered, deduplicated)
//!
//! send(text) ──► encrypt ──► ConversationLog::append ──► local echo
//! ```
//!
//! # Components
//!
//! - [`SyncEngine`]: session state machine and subscription driver
//! - [`ConversationView`]: idempotent, ordered plaintext view
//! - [`negotiate_scheme`] and [`publish_self`]: directory-driven scheme
//!   agreement
//! - [`SyncEvent`]: notifications for presentation layers

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod engine;
mod error;
mod event;
mod negotiation;
mod system_env;
mod view;

pub use config::{
    DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF, DEFAULT_SNAPSHOT_TIMEOUT, EngineConfig,
};
pub use duet_core::Environment;
pub use engine::SyncEngine;
pub use error::SyncError;
pub use event::{SessionState, SyncEvent};
pub use negotiation::{cipher_for_peer, key_pair_config, negotiate_scheme, publish_self};
pub use system_env::SystemEnv;
pub use view::ConversationView;
