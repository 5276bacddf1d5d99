//! Error types for the saltline connection core.
//!
//! Two layers: [`HandshakeError`] covers everything that can go wrong
//! before a connection is established, [`ConnectionError`] is the surface
//! callers see. Every handshake failure is fatal to its connection; in the
//! steady state only [`ConnectionError::Timeout`] leaves the connection
//! alive.

use std::io;

use saltline_proto::ProtocolError;
use thiserror::Error;

/// Failure of a NaCl primitive.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Authenticated decryption failed: forged, corrupted, or keyed wrong.
    #[error("box failed verification")]
    Verify,

    /// Sealing failed inside the AEAD backend.
    #[error("box could not be sealed")]
    Seal,
}

/// Fatal handshake failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// No recent minute key opens the returned cookie.
    #[error("cookie rejected")]
    BadCookie,

    /// A handshake box failed to seal or open.
    #[error("{stage}: {source}")]
    Crypto {
        /// Which handshake box was involved.
        stage: &'static str,
        /// The underlying primitive failure.
        source: CryptoError,
    },

    /// A box opened but its plaintext has the wrong shape.
    #[error("{0} plaintext has unexpected shape")]
    Malformed(&'static str),

    /// The registry refused the presented client identity.
    #[error("peer identity rejected")]
    PeerRejected,

    /// The vouched ephemeral key does not match the one in the cookie.
    #[error("vouched key does not match the cookie")]
    VouchMismatch,

    /// A packet arrived whose type does not fit the current state.
    #[error("unexpected {packet} packet in {state} state")]
    UnexpectedPacket {
        /// Packet type received.
        packet: &'static str,
        /// State the connection was in.
        state: &'static str,
    },

    /// A handshake packet carried the wrong nonce counter.
    #[error("{packet} carried counter {actual}, expected {expected}")]
    BadCounter {
        /// Packet type received.
        packet: &'static str,
        /// Counter the state machine required.
        expected: u64,
        /// Counter the packet carried.
        actual: u64,
    },

    /// Wire-level decode or encode failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors surfaced through the public connection API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The connection is closed (locally, by the peer, or the actor is
    /// gone).
    #[error("connection closed")]
    Closed,

    /// The underlying byte-stream failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A handshake deadline or a per-receive deadline expired.
    #[error("timed out")]
    Timeout,

    /// A nonce counter reached its limit; the connection is dead.
    #[error("nonce counter exhausted")]
    CounterLimit,

    /// An inbound message carried a counter other than the expected one.
    #[error("message carried counter {actual}, expected {expected}")]
    OutOfOrder {
        /// Counter the receiver required.
        expected: u64,
        /// Counter the message carried.
        actual: u64,
    },

    /// Refusing to send an empty message.
    #[error("cannot send an empty message")]
    SendZeroSize,

    /// The message does not fit a single frame.
    #[error("message of {0} bytes exceeds the frame limit")]
    SendTooLarge(usize),

    /// The caller is not the current controller.
    #[error("not the controlling owner")]
    NotOwner,

    /// The operation requires an established connection.
    #[error("handshake still in progress")]
    NotConnected,

    /// The supplied configuration is unusable for the requested mode.
    #[error("invalid configuration: {0}")]
    Config(&'static str),

    /// A data-plane box failed verification.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Wire-level decode or encode failure after the handshake.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ConnectionError {
    /// True if the error is transient and the connection remains usable.
    ///
    /// Only receive timeouts qualify; every protocol violation, transport
    /// failure, or crypto failure is terminal.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Boundary conversion for async I/O call sites. Internally the crate uses
/// [`ConnectionError`] throughout.
impl From<ConnectionError> for io::Error {
    fn from(err: ConnectionError) -> Self {
        let kind = match &err {
            ConnectionError::Timeout => io::ErrorKind::TimedOut,
            ConnectionError::Closed => io::ErrorKind::NotConnected,
            ConnectionError::Transport(_) => io::ErrorKind::Other,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err.to_string())
    }
}

/// Map a byte-stream failure onto the connection taxonomy: an orderly EOF
/// is `Closed`, anything else is a transport error.
pub(crate) fn transport_error(err: &io::Error) -> ConnectionError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => ConnectionError::Closed,
        _ => ConnectionError::Transport(err.to_string()),
    }
}
