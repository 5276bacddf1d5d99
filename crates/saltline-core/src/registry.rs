//! Client identity admission.
//!
//! After the server opens an Initiate it knows, authenticated, which
//! long-term key the client presented. A [`PeerVerifier`] decides whether
//! that key may use the connection: a block-list, an allow-list, or any
//! other policy. Rejection aborts the handshake fatally.

use std::collections::HashSet;

/// Decides whether a presenting client key is acceptable on a connection.
///
/// Called from the handshake with the connection id and the client's
/// long-term public key; must not block.
pub trait PeerVerifier: Send + Sync + 'static {
    /// True if the key may complete the handshake on this connection.
    fn verify(&self, connection: u64, public_key: &[u8; 32]) -> bool;
}

/// Accepts every presented key.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PeerVerifier for AllowAll {
    fn verify(&self, _connection: u64, _public_key: &[u8; 32]) -> bool {
        true
    }
}

/// Accepts only keys registered up front.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    keys: HashSet<[u8; 32]>,
}

impl AllowList {
    /// Build an allow-list from an initial set of keys.
    pub fn new(keys: impl IntoIterator<Item = [u8; 32]>) -> Self {
        Self { keys: keys.into_iter().collect() }
    }

    /// Register another acceptable key.
    pub fn allow(&mut self, key: [u8; 32]) {
        self.keys.insert(key);
    }
}

impl PeerVerifier for AllowList {
    fn verify(&self, _connection: u64, public_key: &[u8; 32]) -> bool {
        self.keys.contains(public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_accepts_anything() {
        assert!(AllowAll.verify(1, &[0u8; 32]));
        assert!(AllowAll.verify(2, &[0xFF; 32]));
    }

    #[test]
    fn allow_list_accepts_only_registered_keys() {
        let mut list = AllowList::new([[1u8; 32]]);
        list.allow([2u8; 32]);

        assert!(list.verify(1, &[1u8; 32]));
        assert!(list.verify(1, &[2u8; 32]));
        assert!(!list.verify(1, &[3u8; 32]));
    }
}
