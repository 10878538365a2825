//! Sync engine configuration.

use std::time::Duration;

/// Default time to wait for the first snapshot after subscribing.
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay before the first resubscription retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Default ceiling for the resubscription delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Time `open` waits for the first snapshot
    pub snapshot_timeout: Duration,
    /// Delay after the first failed resubscription
    pub initial_backoff: Duration,
    /// Upper bound on the resubscription delay
    pub max_backoff: Duration,
    /// Permit a conversation whose two participants are the same user
    pub allow_self_conversation: bool,
}

impl EngineConfig {
    /// Delay before retry number `attempt` (zero-based): doubles each time,
    /// capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            allow_self_conversation: false,
        }
    }
}
