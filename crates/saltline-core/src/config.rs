//! Per-connection configuration.

use std::sync::Arc;
use std::time::Duration;

use saltline_proto::{Metadata, Side};

use crate::controller::ControllerHandle;
use crate::keyring::CookieKeys;
use crate::registry::{AllowAll, PeerVerifier};
use crate::vault::Vault;

/// Everything a connection needs beyond its byte-stream.
///
/// Build with [`Config::client`] or [`Config::server`] and adjust the
/// optional knobs with the chained setters. The capability handles are
/// shared (`Arc`), so one vault or key ring can serve many connections.
#[derive(Clone)]
pub struct Config {
    /// Which end of the handshake to drive.
    pub mode: Side,
    /// Long-term identity of this side.
    pub vault: Arc<dyn Vault>,
    /// Owner of asynchronous deliveries and the liveness anchor.
    pub controller: ControllerHandle,
    /// Metadata offered to the peer during the handshake.
    pub metadata: Metadata,
    /// Server's long-term public key; required in client mode.
    pub peer_public_key: Option<[u8; 32]>,
    /// Cookie minute keys; required in server mode.
    pub cookie_keys: Option<Arc<dyn CookieKeys>>,
    /// Admission policy for presenting clients. Defaults to allow-all.
    pub verifier: Arc<dyn PeerVerifier>,
    /// Deadline for the whole handshake, `None` to wait forever.
    pub handshake_timeout: Option<Duration>,
}

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

impl Config {
    /// Configuration for dialing out to the server whose long-term public
    /// key is `peer_public_key`.
    pub fn client(
        vault: Arc<dyn Vault>,
        controller: ControllerHandle,
        peer_public_key: [u8; 32],
    ) -> Self {
        Self {
            mode: Side::Client,
            vault,
            controller,
            metadata: Metadata::new(),
            peer_public_key: Some(peer_public_key),
            cookie_keys: None,
            verifier: Arc::new(AllowAll),
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
        }
    }

    /// Configuration for accepting connections.
    pub fn server(
        vault: Arc<dyn Vault>,
        controller: ControllerHandle,
        cookie_keys: Arc<dyn CookieKeys>,
    ) -> Self {
        Self {
            mode: Side::Server,
            vault,
            controller,
            metadata: Metadata::new(),
            peer_public_key: None,
            cookie_keys: Some(cookie_keys),
            verifier: Arc::new(AllowAll),
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
        }
    }

    /// Offer this metadata to the peer.
    #[must_use]
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Replace the admission policy.
    #[must_use]
    pub fn verifier(mut self, verifier: Arc<dyn PeerVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Bound the handshake, or pass `None` to wait forever.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}
