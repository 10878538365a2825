//! Simulated environment with a virtual clock.
//!
//! `sleep` advances the virtual clock and yields to the scheduler instead of
//! waiting, so backoff loops run instantly while still observing time passing.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use duet_core::Environment;

/// Point on the virtual timeline, measured from environment creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimInstant(Duration);

impl std::ops::Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

/// [`Environment`] whose clock only moves when someone sleeps.
///
/// Clones share the clock.
#[derive(Clone, Default)]
pub struct SimEnv {
    elapsed_nanos: Arc<AtomicU64>,
    sleeps: Arc<AtomicU64>,
}

impl SimEnv {
    /// Create an environment at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total virtual time slept so far.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }

    /// Number of completed `sleep` calls.
    pub fn sleep_count(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.elapsed())
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        let elapsed = Arc::clone(&self.elapsed_nanos);
        let sleeps = Arc::clone(&self.sleeps);
        async move {
            let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
            elapsed.fetch_add(nanos, Ordering::SeqCst);
            sleeps.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
        }
    }
}
