//! Environment abstraction for deterministic testing.
//!
//! Decouples the sync engine from wall-clock time so resubscription backoff can
//! run instantly in tests and on the tokio timer in production.

use std::time::Duration;

/// Abstract environment providing time and async sleeping.
///
/// Randomness is not part of the environment: ciphers draw nonces and OAEP
/// padding from the operating system directly.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - Subsequent calls return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}
