//! Ephemeral-key cryptography: handshake box helpers and the data plane.
//!
//! [`TransportCipher`] carries a connection through its data phase: one
//! precomputed box over the ephemeral pair, two strictly monotonic
//! counters. The send counter names the nonce for each outbound message;
//! the receive counter is the only counter the peer is allowed to use next,
//! so messages are accepted exactly in send order and a skipped or replayed
//! counter kills the connection.

use crypto_box::{aead::Aead, PublicKey, SalsaBox, SecretKey};
use crypto_secretbox::{aead::KeyInit, XSalsa20Poly1305};
use saltline_proto::nonce::{self, Side, NONCE_LEN};

use crate::env::Environment;
use crate::error::{ConnectionError, CryptoError};

/// Generate an ephemeral Curve25519 keypair from the environment's RNG.
/// Discarded when the connection ends.
pub(crate) fn generate_keypair<E: Environment>(env: &E) -> ([u8; 32], SecretKey) {
    let mut secret = [0u8; 32];
    env.random_bytes(&mut secret);
    let secret = SecretKey::from(secret);
    let public = *secret.public_key().as_bytes();
    (public, secret)
}

/// Seal with an ephemeral secret against a peer public key.
pub(crate) fn seal_with(
    plaintext: &[u8],
    nonce: &[u8; NONCE_LEN],
    peer: &[u8; 32],
    secret: &SecretKey,
) -> Result<Vec<u8>, CryptoError> {
    SalsaBox::new(&PublicKey::from(*peer), secret)
        .encrypt(&(*nonce).into(), plaintext)
        .map_err(|_| CryptoError::Seal)
}

/// Open with an ephemeral secret against a peer public key.
pub(crate) fn open_with(
    sealed: &[u8],
    nonce: &[u8; NONCE_LEN],
    peer: &[u8; 32],
    secret: &SecretKey,
) -> Result<Vec<u8>, CryptoError> {
    SalsaBox::new(&PublicKey::from(*peer), secret)
        .decrypt(&(*nonce).into(), sealed)
        .map_err(|_| CryptoError::Verify)
}

/// Symmetric seal under a minute key (cookie interior).
pub(crate) fn secretbox_seal(
    plaintext: &[u8],
    nonce: &[u8; NONCE_LEN],
    key: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    XSalsa20Poly1305::new(key.into())
        .encrypt(&(*nonce).into(), plaintext)
        .map_err(|_| CryptoError::Seal)
}

/// Symmetric open under a minute key.
pub(crate) fn secretbox_open(
    sealed: &[u8],
    nonce: &[u8; NONCE_LEN],
    key: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    XSalsa20Poly1305::new(key.into())
        .decrypt(&(*nonce).into(), sealed)
        .map_err(|_| CryptoError::Verify)
}

/// Post-handshake message encryption with monotonic counters.
pub struct TransportCipher {
    shared: SalsaBox,
    side: Side,
    send_counter: u64,
    recv_counter: u64,
}

impl TransportCipher {
    /// Build the data-plane cipher from the handshake outcome.
    pub fn new(
        side: Side,
        peer_ephemeral: &[u8; 32],
        secret: SecretKey,
        send_counter: u64,
        recv_counter: u64,
    ) -> Self {
        Self {
            shared: SalsaBox::new(&PublicKey::from(*peer_ephemeral), &secret),
            side,
            send_counter,
            recv_counter,
        }
    }

    /// Seal an outbound payload, returning the counter it was sealed under.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::CounterLimit`] once the send counter is
    /// exhausted, which is fatal to the connection.
    pub fn seal(&mut self, payload: &[u8]) -> Result<(u64, Vec<u8>), ConnectionError> {
        // Hot path: one comparison. u64::MAX itself is never used as a nonce.
        if self.send_counter == u64::MAX {
            return Err(ConnectionError::CounterLimit);
        }

        let counter = self.send_counter;
        let nonce = nonce::message(self.side, counter);
        let sealed = self.shared.encrypt(&nonce.into(), payload).map_err(|_| CryptoError::Seal)?;

        self.send_counter = counter + 1;
        Ok((counter, sealed))
    }

    /// Open an inbound payload carried under `counter`.
    ///
    /// # Errors
    ///
    /// All of these are fatal to the connection:
    /// [`ConnectionError::OutOfOrder`] if `counter` is not the next expected
    /// value, [`ConnectionError::CounterLimit`] on counter exhaustion, and a
    /// crypto error if the box fails verification.
    pub fn open(&mut self, counter: u64, sealed: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        if counter != self.recv_counter {
            return Err(ConnectionError::OutOfOrder { expected: self.recv_counter, actual: counter });
        }
        if self.recv_counter == u64::MAX {
            return Err(ConnectionError::CounterLimit);
        }

        let nonce = nonce::message(self.side.opposite(), counter);
        let plain =
            self.shared.decrypt(&nonce.into(), sealed).map_err(|_| CryptoError::Verify)?;

        self.recv_counter = counter + 1;
        Ok(plain)
    }

    /// Current (send, receive) counters.
    #[must_use]
    pub fn counters(&self) -> (u64, u64) {
        (self.send_counter, self.recv_counter)
    }
}
