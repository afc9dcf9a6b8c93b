//! Time and randomness as a trait.
//!
//! The connection manager and the client never read the clock or the OS RNG
//! themselves. Production passes [`Environment`] backed by the system; tests
//! and the harness pass a virtual clock and a seeded generator, which makes
//! reconnect backoff, ack deadlines and temp ids reproducible.

use std::time::Duration;

/// Clock, sleep and random bytes for one session.
///
/// `now()` must be monotonic. `wall_clock_millis()` feeds `createdAt`
/// timestamps and placeholder room ids only; deadlines use `now()`.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant: `std::time::Instant` in production, a virtual
    /// instant in simulation.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug + std::ops::Sub<Output = Duration>;

    /// Current monotonic time. Never earlier than a previous call.
    fn now(&self) -> Self::Instant;

    /// Wait `duration`. Only runtimes await this; state machines are handed
    /// the time instead.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes, reproducibly for a seeded
    /// environment.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Milliseconds since the Unix epoch.
    fn wall_clock_millis(&self) -> i64;

    /// Random `u64` from [`Environment::random_bytes`].
    fn random_u64(&self) -> u64 {
        let mut raw = [0u8; 8];
        self.random_bytes(&mut raw);
        u64::from_be_bytes(raw)
    }
}

/// Deterministic environment for unit tests.
///
/// Time is a [`Duration`] since construction and only moves when the test
/// calls [`MockEnv::advance`]. Randomness is a counter.
pub mod test_utils {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    };

    use super::Environment;

    /// Wall clock at `MockEnv` construction: 2024-09-01T00:00:00Z.
    pub const MOCK_EPOCH_MILLIS: i64 = 1_725_148_800_000;

    /// Manually advanced clock with counter-based randomness.
    #[derive(Debug, Clone, Default)]
    pub struct MockEnv {
        elapsed_ms: Arc<AtomicU64>,
        counter: Arc<AtomicU64>,
    }

    impl MockEnv {
        /// Clock at zero.
        pub fn new() -> Self {
            Self::default()
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
            self.elapsed_ms.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Environment for MockEnv {
        type Instant = Duration;

        fn now(&self) -> Duration {
            Duration::from_millis(self.elapsed_ms.load(Ordering::SeqCst))
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            self.advance(duration);
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let seed = self.counter.fetch_add(1, Ordering::SeqCst);
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = (seed as u8).wrapping_add(i as u8);
            }
        }

        fn wall_clock_millis(&self) -> i64 {
            let elapsed = i64::try_from(self.elapsed_ms.load(Ordering::SeqCst)).unwrap_or(i64::MAX);
            MOCK_EPOCH_MILLIS.saturating_add(elapsed)
        }
    }
}
