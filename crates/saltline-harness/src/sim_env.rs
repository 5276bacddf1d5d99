//! Turmoil-aware Environment implementation for deterministic testing.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use saltline_core::env::Environment;

/// Simulation environment: seeded RNG and turmoil's virtual clock.
///
/// Inside a turmoil simulation `tokio::time` is virtual, so `now()` and
/// `sleep()` advance deterministically with the simulated world. The RNG is
/// a ChaCha20 stream seeded up front, which makes every ephemeral key and
/// nonce tail reproducible: two runs with the same seed produce the same
/// handshake transcript.
///
/// Clones share the RNG stream, important when one test builds several
/// vaults from one environment and expects them to differ.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Environment with the default seed (0). Use when determinism matters
    /// but the specific seed does not.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with a specific seed, for exploring different random
    /// worlds reproducibly.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, dest: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(dest);
    }
}
