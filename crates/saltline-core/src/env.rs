//! Environment abstraction for deterministic testing.
//!
//! Connection logic never calls `Instant::now()`, `tokio::time::sleep`, or
//! an RNG directly: every side effect goes through an [`Environment`]. The
//! trait is implemented twice: [`SystemEnv`] here (real clock, OS entropy)
//! and a seeded simulation environment in the harness crate. Given the same
//! seed, the simulated environment reproduces the same ephemeral keys and
//! therefore the same handshake transcript, which is what makes the
//! handshake testable byte for byte.
//!
//! # Invariants
//!
//! - `now()` never goes backwards within one execution context.
//! - Production `random_bytes()` draws from a cryptographically secure
//!   source; simulation draws from a seeded stream and logs the seed.

use std::{
    future::Future,
    ops::{Add, Sub},
    time::Duration,
};

use rand::RngCore;

/// Abstract provider of time and randomness for a connection.
pub trait Environment: Clone + Send + Sync + 'static {
    /// A point in time. Virtual under simulation, `std::time::Instant` in
    /// production.
    type Instant: Copy
        + Ord
        + Send
        + Sync
        + Add<Duration, Output = Self::Instant>
        + Sub<Self::Instant, Output = Duration>;

    /// The current time. Must never go backwards.
    fn now(&self) -> Self::Instant;

    /// Suspend for the given duration. Only driver code awaits this;
    /// protocol logic stays synchronous.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fill `dest` with random bytes. Cryptographically secure in
    /// production, seeded and reproducible under simulation.
    fn random_bytes(&self, dest: &mut [u8]);
}

/// Production environment: real clock, tokio timers, OS entropy pool.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create the production environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, dest: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(dest);
    }
}
