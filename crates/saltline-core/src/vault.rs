//! Long-term identity as a capability.
//!
//! A [`Vault`] holds one side's long-term Curve25519 secret and performs
//! every operation that touches it: sealing and opening long-term boxes and
//! issuing non-repeating nonce tails. The secret never leaves the vault.
//! Connections receive a vault as a capability (`Arc<dyn Vault>`), not via
//! global state; tests hand each connection its own double.

use std::sync::atomic::{AtomicU64, Ordering};

use crypto_box::{aead::Aead, PublicKey, SalsaBox, SecretKey};
use saltline_proto::nonce::{NONCE_LEN, TAIL_LEN};

use crate::env::Environment;
use crate::error::CryptoError;

/// Holder of a long-term Curve25519 secret.
///
/// Implementations must be safe for concurrent use: many connections share
/// one vault, and `safe_nonce` must never repeat across them.
pub trait Vault: Send + Sync + 'static {
    /// Seal `plaintext` to `peer` under the vault's long-term secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Seal`] if the AEAD backend fails.
    fn seal(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_LEN],
        peer: &[u8; 32],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Open a box from `peer` addressed to the vault's long-term key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Verify`] if the box is forged, corrupted, or
    /// keyed wrong.
    fn open(
        &self,
        sealed: &[u8],
        nonce: &[u8; NONCE_LEN],
        peer: &[u8; 32],
    ) -> Result<Vec<u8>, CryptoError>;

    /// The long-term public key.
    fn public_key(&self) -> [u8; 32];

    /// A 16-byte nonce tail that never repeats within the vault's
    /// lifetime.
    fn safe_nonce(&self) -> [u8; TAIL_LEN];
}

/// In-process [`Vault`] backed by a Curve25519 secret held in memory.
///
/// # Nonce tails
///
/// `safe_nonce` yields `prefix (8 random bytes, fixed at construction) ‖
/// counter (u64 BE, atomically incremented)`. The counter guarantees
/// non-repetition within one vault lifetime; the random prefix makes a
/// collision between two lifetimes of the same identity a 2⁻⁶⁴ event.
pub struct SoftwareVault {
    secret: SecretKey,
    public: [u8; 32],
    nonce_prefix: [u8; 8],
    nonce_counter: AtomicU64,
}

impl SoftwareVault {
    /// Create a vault around an existing long-term secret.
    pub fn new<E: Environment>(env: &E, secret: [u8; 32]) -> Self {
        let secret = SecretKey::from(secret);
        let public = *secret.public_key().as_bytes();

        let mut nonce_prefix = [0u8; 8];
        env.random_bytes(&mut nonce_prefix);

        Self { secret, public, nonce_prefix, nonce_counter: AtomicU64::new(0) }
    }

    /// Create a vault with a freshly generated long-term identity.
    pub fn generate<E: Environment>(env: &E) -> Self {
        let mut secret = [0u8; 32];
        env.random_bytes(&mut secret);
        Self::new(env, secret)
    }
}

impl Vault for SoftwareVault {
    fn seal(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_LEN],
        peer: &[u8; 32],
    ) -> Result<Vec<u8>, CryptoError> {
        SalsaBox::new(&PublicKey::from(*peer), &self.secret)
            .encrypt(&(*nonce).into(), plaintext)
            .map_err(|_| CryptoError::Seal)
    }

    fn open(
        &self,
        sealed: &[u8],
        nonce: &[u8; NONCE_LEN],
        peer: &[u8; 32],
    ) -> Result<Vec<u8>, CryptoError> {
        SalsaBox::new(&PublicKey::from(*peer), &self.secret)
            .decrypt(&(*nonce).into(), sealed)
            .map_err(|_| CryptoError::Verify)
    }

    fn public_key(&self) -> [u8; 32] {
        self.public
    }

    fn safe_nonce(&self) -> [u8; TAIL_LEN] {
        let counter = self.nonce_counter.fetch_add(1, Ordering::Relaxed);

        let mut tail = [0u8; TAIL_LEN];
        tail[..8].copy_from_slice(&self.nonce_prefix);
        tail[8..].copy_from_slice(&counter.to_be_bytes());
        tail
    }
}
