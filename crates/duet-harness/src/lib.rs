//! In-memory collaborators for Duet.
//!
//! Reference implementations of the [`duet_core`] collaborator traits, used by
//! the end-to-end tests and the `duet demo` command:
//!
//! - [`MemoryLog`]: conversation log with delta or full replay and fault
//!   injection
//! - [`MemoryDirectory`] and [`MemoryIdentity`]: user directory and signed-in
//!   user
//! - [`SimEnv`]: virtual clock that never really sleeps

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod memory_directory;
pub mod memory_log;
pub mod sim_env;

pub use memory_directory::{MemoryDirectory, MemoryIdentity};
pub use memory_log::{MemoryLog, ReplayMode, SUBSCRIBER_BUFFER};
pub use sim_env::{SimEnv, SimInstant};
