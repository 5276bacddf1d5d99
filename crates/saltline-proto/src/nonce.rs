//! Nonce byte patterns for the handshake and data phases.
//!
//! Two families, both filling the full 24-byte XSalsa20 nonce:
//!
//! - **Short-term**: `prefix (16 bytes) ‖ counter (u64, Big Endian)`.
//!   The prefix names the packet type and the sealing side, so the client
//!   and server counter spaces can never collide even though both start
//!   from small integers.
//!
//! - **Long-term**: `prefix (8 bytes) ‖ tail (16 bytes)`. The tail is a
//!   non-repeating value drawn from the sealing side's vault.
//!
//! The exact byte sequences are wire contract. Peers derive each nonce
//! independently, so a single wrong byte surfaces as a box verification
//! failure rather than a parse error.

/// Full nonce length in bytes (XSalsa20).
pub const NONCE_LEN: usize = 24;

/// Length of the vault-supplied tail in long-term nonces.
pub const TAIL_LEN: usize = 16;

/// Which end of the connection we are.
///
/// Doubles as the connection mode: the side is fixed when the connection
/// starts and never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The initiating end.
    Client,
    /// The accepting end.
    Server,
}

impl Side {
    /// The peer's side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

const HELLO_CLIENT: &[u8; 16] = b"CurveCP-client-H";
const HELLO_SERVER: &[u8; 16] = b"CurveCP-server-H";
const INITIATE_CLIENT: &[u8; 16] = b"CurveCP-client-I";
const INITIATE_SERVER: &[u8; 16] = b"CurveCP-server-I";
const MESSAGE_CLIENT: &[u8; 16] = b"CurveCP-client-M";
const MESSAGE_SERVER: &[u8; 16] = b"CurveCP-server-M";
const READY_SERVER: &[u8; 16] = b"CurveCP-server-R";

const MINUTE: &[u8; 8] = b"minute-k";
const VOUCH: &[u8; 8] = b"CurveCPV";
const COOKIE: &[u8; 8] = b"CurveCPK";

fn short_term(prefix: &[u8; 16], counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..16].copy_from_slice(prefix);
    nonce[16..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

fn long_term(prefix: &[u8; 8], tail: &[u8; TAIL_LEN]) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..8].copy_from_slice(prefix);
    nonce[8..].copy_from_slice(tail);
    nonce
}

/// Nonce for a Hello box sealed by `side`.
#[must_use]
pub fn hello(side: Side, counter: u64) -> [u8; NONCE_LEN] {
    match side {
        Side::Client => short_term(HELLO_CLIENT, counter),
        Side::Server => short_term(HELLO_SERVER, counter),
    }
}

/// Nonce for an Initiate box sealed by `side`.
#[must_use]
pub fn initiate(side: Side, counter: u64) -> [u8; NONCE_LEN] {
    match side {
        Side::Client => short_term(INITIATE_CLIENT, counter),
        Side::Server => short_term(INITIATE_SERVER, counter),
    }
}

/// Nonce for a data-plane Message box sealed by `side`.
#[must_use]
pub fn message(side: Side, counter: u64) -> [u8; NONCE_LEN] {
    match side {
        Side::Client => short_term(MESSAGE_CLIENT, counter),
        Side::Server => short_term(MESSAGE_SERVER, counter),
    }
}

/// Nonce for the server's Ready box. Only the server seals in this space.
#[must_use]
pub fn ready(counter: u64) -> [u8; NONCE_LEN] {
    short_term(READY_SERVER, counter)
}

/// Nonce sealing the cookie interior under a minute key.
#[must_use]
pub fn minute(tail: &[u8; TAIL_LEN]) -> [u8; NONCE_LEN] {
    long_term(MINUTE, tail)
}

/// Nonce for the client's long-term vouch over its ephemeral key.
#[must_use]
pub fn vouch(tail: &[u8; TAIL_LEN]) -> [u8; NONCE_LEN] {
    long_term(VOUCH, tail)
}

/// Nonce for the server's long-term box around the cookie.
#[must_use]
pub fn cookie(tail: &[u8; TAIL_LEN]) -> [u8; NONCE_LEN] {
    long_term(COOKIE, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_opposite_is_involution() {
        assert_eq!(Side::Client.opposite(), Side::Server);
        assert_eq!(Side::Server.opposite(), Side::Client);
        assert_eq!(Side::Client.opposite().opposite(), Side::Client);
    }

    #[test]
    fn short_term_layout() {
        let nonce = message(Side::Client, 0x0102_0304_0506_0708);

        assert_eq!(&nonce[..16], b"CurveCP-client-M");
        assert_eq!(&nonce[16..], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn short_term_prefixes() {
        assert_eq!(&hello(Side::Client, 0)[..16], b"CurveCP-client-H");
        assert_eq!(&hello(Side::Server, 0)[..16], b"CurveCP-server-H");
        assert_eq!(&initiate(Side::Client, 1)[..16], b"CurveCP-client-I");
        assert_eq!(&initiate(Side::Server, 1)[..16], b"CurveCP-server-I");
        assert_eq!(&message(Side::Server, 3)[..16], b"CurveCP-server-M");
        assert_eq!(&ready(2)[..16], b"CurveCP-server-R");
    }

    #[test]
    fn counter_is_big_endian() {
        let nonce = hello(Side::Client, 1);

        let mut expected = [0u8; 8];
        expected[7] = 1;
        assert_eq!(&nonce[16..], &expected);
    }

    #[test]
    fn long_term_layout() {
        let tail: [u8; TAIL_LEN] = core::array::from_fn(|i| i as u8);

        let nonce = minute(&tail);
        assert_eq!(&nonce[..8], b"minute-k");
        assert_eq!(&nonce[8..], &tail);

        assert_eq!(&vouch(&tail)[..8], b"CurveCPV");
        assert_eq!(&cookie(&tail)[..8], b"CurveCPK");
    }

    #[test]
    fn sides_never_share_a_nonce() {
        // Same packet type, same counter, different side: distinct nonces.
        assert_ne!(message(Side::Client, 7), message(Side::Server, 7));
        assert_ne!(hello(Side::Client, 0), hello(Side::Server, 0));
    }
}
