//! The five wire frames, each tagged by an 8-byte magic prefix.
//!
//! Layout on the wire (inside the transport's length prefix):
//!
//! | Packet   | Magic                     | Body |
//! |----------|---------------------------|------|
//! | Hello    | `6C 09 AF B2 8A A9 FA FC` | `ephemeral(32) ‖ counter(u64 BE) ‖ box(80)` |
//! | Cookie   | `1C 45 DC B9 41 C0 E3 F6` | `tail(16) ‖ box(144)` |
//! | Initiate | `6C 09 AF B2 8A A9 FA FD` | `cookie(96) ‖ counter(u64 BE) ‖ box(≥112)` |
//! | Ready    | `6D 09 AF B2 8A A9 FA FD` | `counter(u64 BE) ‖ box(≥16)` |
//! | Message  | `6D 1B 39 CB F6 5A 11 B4` | `counter(u64 BE) ‖ box(≥16)` |
//!
//! Decoding validates structure only: magic, field sizes, and box length
//! bounds. It does NOT open any box; authentication happens in the
//! handshake and data-plane layers. A frame that fails to decode is fatal
//! to its connection in every state.

use bytes::{Buf, BufMut};

use crate::errors::{ProtocolError, Result};
use crate::nonce::TAIL_LEN;

/// Magic prefix length.
pub const MAGIC_LEN: usize = 8;

/// Hello magic prefix.
pub const HELLO_MAGIC: [u8; MAGIC_LEN] = [0x6C, 0x09, 0xAF, 0xB2, 0x8A, 0xA9, 0xFA, 0xFC];

/// Cookie magic prefix.
pub const COOKIE_MAGIC: [u8; MAGIC_LEN] = [0x1C, 0x45, 0xDC, 0xB9, 0x41, 0xC0, 0xE3, 0xF6];

/// Initiate magic prefix.
pub const INITIATE_MAGIC: [u8; MAGIC_LEN] = [0x6C, 0x09, 0xAF, 0xB2, 0x8A, 0xA9, 0xFA, 0xFD];

/// Ready magic prefix.
pub const READY_MAGIC: [u8; MAGIC_LEN] = [0x6D, 0x09, 0xAF, 0xB2, 0x8A, 0xA9, 0xFA, 0xFD];

/// Message magic prefix.
pub const MESSAGE_MAGIC: [u8; MAGIC_LEN] = [0x6D, 0x1B, 0x39, 0xCB, 0xF6, 0x5A, 0x11, 0xB4];

/// Poly1305 authenticator length; the smallest possible box.
pub const BOX_OVERHEAD: usize = 16;

/// Hello box: 64 zero bytes plus the authenticator.
pub const HELLO_BOX_LEN: usize = 64 + BOX_OVERHEAD;

/// Cookie box: server ephemeral (32) plus the cookie (96) plus the
/// authenticator.
pub const COOKIE_BOX_LEN: usize = 32 + COOKIE_LEN + BOX_OVERHEAD;

/// Cookie blob: minute-nonce tail (16) plus the sealed ephemeral pair
/// (64 + authenticator).
pub const COOKIE_LEN: usize = TAIL_LEN + 64 + BOX_OVERHEAD;

/// Minimum Initiate box: long-term identity (32), vouch-nonce tail (16),
/// vouch (48), and authenticator, plus any metadata.
pub const INITIATE_BOX_MIN: usize = 32 + TAIL_LEN + 48 + BOX_OVERHEAD;

/// Curve25519 public key length.
pub const KEY_LEN: usize = 32;

/// A decoded wire frame.
///
/// Box fields hold ciphertext as raw bytes; opening them is the caller's
/// concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Client's opening frame carrying its ephemeral public key.
    Hello {
        /// Client ephemeral public key.
        ephemeral: [u8; KEY_LEN],
        /// Short-term nonce counter (always 0 on the wire today).
        counter: u64,
        /// Box over 64 zero bytes, proving possession of the ephemeral.
        zeros_box: Vec<u8>,
    },
    /// Server's stateless reply carrying its ephemeral and the cookie.
    Cookie {
        /// Tail of the long-term nonce the box was sealed under.
        tail: [u8; TAIL_LEN],
        /// Box over `server_ephemeral ‖ cookie`.
        cookie_box: Vec<u8>,
    },
    /// Client's vouch frame returning the cookie.
    Initiate {
        /// The cookie exactly as received (96 bytes).
        cookie: Vec<u8>,
        /// Short-term nonce counter (always 1 on the wire today).
        counter: u64,
        /// Box over `identity ‖ vouch_tail ‖ vouch ‖ metadata`.
        initiate_box: Vec<u8>,
    },
    /// Server's metadata reply; omitted when the Initiate carried none.
    Ready {
        /// Short-term nonce counter (always 2 on the wire today).
        counter: u64,
        /// Box over the server's encoded metadata.
        metadata_box: Vec<u8>,
    },
    /// Data-plane application message.
    Message {
        /// Short-term nonce counter; must match the receiver's expectation.
        counter: u64,
        /// Box over the application payload.
        payload_box: Vec<u8>,
    },
}

impl Packet {
    /// Human-readable packet type, for errors and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Cookie { .. } => "cookie",
            Self::Initiate { .. } => "initiate",
            Self::Ready { .. } => "ready",
            Self::Message { .. } => "message",
        }
    }

    /// Encode into a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if a box field violates its length bound; encoding
    /// performs the same structural checks as decoding so a malformed
    /// packet can never reach the wire.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        match self {
            Self::Hello { ephemeral, counter, zeros_box } => {
                check_exact("hello", zeros_box, HELLO_BOX_LEN)?;
                dst.put_slice(&HELLO_MAGIC);
                dst.put_slice(ephemeral);
                dst.put_u64(*counter);
                dst.put_slice(zeros_box);
            }
            Self::Cookie { tail, cookie_box } => {
                check_exact("cookie", cookie_box, COOKIE_BOX_LEN)?;
                dst.put_slice(&COOKIE_MAGIC);
                dst.put_slice(tail);
                dst.put_slice(cookie_box);
            }
            Self::Initiate { cookie, counter, initiate_box } => {
                check_exact("initiate cookie", cookie, COOKIE_LEN)?;
                check_min("initiate", initiate_box, INITIATE_BOX_MIN)?;
                dst.put_slice(&INITIATE_MAGIC);
                dst.put_slice(cookie);
                dst.put_u64(*counter);
                dst.put_slice(initiate_box);
            }
            Self::Ready { counter, metadata_box } => {
                check_min("ready", metadata_box, BOX_OVERHEAD)?;
                dst.put_slice(&READY_MAGIC);
                dst.put_u64(*counter);
                dst.put_slice(metadata_box);
            }
            Self::Message { counter, payload_box } => {
                check_min("message", payload_box, BOX_OVERHEAD)?;
                dst.put_slice(&MESSAGE_MAGIC);
                dst.put_u64(*counter);
                dst.put_slice(payload_box);
            }
        }
        Ok(())
    }

    /// Encode into a fresh byte vector.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Packet::encode`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode a frame.
    ///
    /// # Errors
    ///
    /// Returns an error on unknown magic, short frames, or box length
    /// violations. Any error here is fatal to the connection.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAGIC_LEN {
            return Err(ProtocolError::PacketTooShort { expected: MAGIC_LEN, actual: bytes.len() });
        }

        let mut magic = [0u8; MAGIC_LEN];
        magic.copy_from_slice(&bytes[..MAGIC_LEN]);
        let mut body = &bytes[MAGIC_LEN..];

        match magic {
            HELLO_MAGIC => {
                let expected = KEY_LEN + 8 + HELLO_BOX_LEN;
                if body.len() != expected {
                    return Err(ProtocolError::PacketTooShort {
                        expected: MAGIC_LEN + expected,
                        actual: bytes.len(),
                    });
                }
                let mut ephemeral = [0u8; KEY_LEN];
                body.copy_to_slice(&mut ephemeral);
                let counter = body.get_u64();
                Ok(Self::Hello { ephemeral, counter, zeros_box: body.to_vec() })
            }
            COOKIE_MAGIC => {
                let expected = TAIL_LEN + COOKIE_BOX_LEN;
                if body.len() != expected {
                    return Err(ProtocolError::PacketTooShort {
                        expected: MAGIC_LEN + expected,
                        actual: bytes.len(),
                    });
                }
                let mut tail = [0u8; TAIL_LEN];
                body.copy_to_slice(&mut tail);
                Ok(Self::Cookie { tail, cookie_box: body.to_vec() })
            }
            INITIATE_MAGIC => {
                let expected = COOKIE_LEN + 8 + INITIATE_BOX_MIN;
                if body.len() < expected {
                    return Err(ProtocolError::PacketTooShort {
                        expected: MAGIC_LEN + expected,
                        actual: bytes.len(),
                    });
                }
                let cookie = body[..COOKIE_LEN].to_vec();
                body.advance(COOKIE_LEN);
                let counter = body.get_u64();
                Ok(Self::Initiate { cookie, counter, initiate_box: body.to_vec() })
            }
            READY_MAGIC => {
                let expected = 8 + BOX_OVERHEAD;
                if body.len() < expected {
                    return Err(ProtocolError::PacketTooShort {
                        expected: MAGIC_LEN + expected,
                        actual: bytes.len(),
                    });
                }
                let counter = body.get_u64();
                Ok(Self::Ready { counter, metadata_box: body.to_vec() })
            }
            MESSAGE_MAGIC => {
                let expected = 8 + BOX_OVERHEAD;
                if body.len() < expected {
                    return Err(ProtocolError::PacketTooShort {
                        expected: MAGIC_LEN + expected,
                        actual: bytes.len(),
                    });
                }
                let counter = body.get_u64();
                Ok(Self::Message { counter, payload_box: body.to_vec() })
            }
            _ => Err(ProtocolError::UnknownMagic(magic)),
        }
    }
}

fn check_exact(packet: &'static str, field: &[u8], expected: usize) -> Result<()> {
    if field.len() != expected {
        return Err(ProtocolError::BadBoxLength { packet, expected, actual: field.len() });
    }
    Ok(())
}

fn check_min(packet: &'static str, field: &[u8], expected: usize) -> Result<()> {
    if field.len() < expected {
        return Err(ProtocolError::BoxTooShort { packet, expected, actual: field.len() });
    }
    Ok(())
}
