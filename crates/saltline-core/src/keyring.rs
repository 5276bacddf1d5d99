//! Rotating minute keys for cookie sealing.
//!
//! The server seals each cookie under a short-lived symmetric key and keeps
//! a small window of recently rotated keys so an Initiate can still return
//! a cookie minted just before a rotation. A cookie sealed under a key
//! older than the window is dead: the server stores nothing per half-open
//! connection, so the window is what bounds how long a cookie stays
//! redeemable.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use crate::env::Environment;

/// Source of the current and recently rotated cookie keys.
///
/// Implementations must be safe for concurrent read; the connection core
/// only ever reads.
pub trait CookieKeys: Send + Sync + 'static {
    /// The key new cookies are sealed under.
    fn current(&self) -> [u8; 32];

    /// All keys still accepted when opening a returned cookie, newest
    /// first. The head equals [`CookieKeys::current`].
    fn recent(&self) -> Vec<[u8; 32]>;
}

/// In-memory rotating key ring.
///
/// Holds up to `depth` keys; [`MinuteKeys::rotate`] pushes a fresh key and
/// drops the oldest. Production wires rotation to a timer; tests drive it
/// by hand.
pub struct MinuteKeys {
    keys: RwLock<VecDeque<[u8; 32]>>,
    depth: usize,
}

impl MinuteKeys {
    /// Create a ring holding at most `depth` keys (at least one), seeded
    /// with one fresh key.
    pub fn new<E: Environment>(env: &E, depth: usize) -> Self {
        let depth = depth.max(1);
        let mut keys = VecDeque::with_capacity(depth);
        keys.push_front(fresh_key(env));
        Self { keys: RwLock::new(keys), depth }
    }

    /// Install a fresh current key, retiring the oldest if the ring is
    /// full.
    pub fn rotate<E: Environment>(&self, env: &E) {
        let key = fresh_key(env);
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        keys.push_front(key);
        keys.truncate(self.depth);
    }
}

fn fresh_key<E: Environment>(env: &E) -> [u8; 32] {
    let mut key = [0u8; 32];
    env.random_bytes(&mut key);
    key
}

impl CookieKeys for MinuteKeys {
    fn current(&self) -> [u8; 32] {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        // The ring is never empty: new() seeds one key and rotate() only adds.
        keys.front().copied().unwrap_or([0u8; 32])
    }

    fn recent(&self) -> Vec<[u8; 32]> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.iter().copied().collect()
    }
}
