//! Wire layer for the saltline secure transport.
//!
//! This crate contains the pure codec surface of the protocol: the five
//! magic-prefixed wire frames, the nonce byte patterns, and the handshake
//! metadata encoding. It performs no I/O and holds no keys; box fields
//! pass through as opaque ciphertext, and authentication lives in
//! `saltline-core`.
//!
//! Everything here is deterministic and total: decoding arbitrary bytes
//! returns a structured [`ProtocolError`] rather than panicking, and any
//! value that encodes successfully decodes back to itself.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod metadata;
pub mod nonce;
pub mod packet;

pub use errors::{ProtocolError, Result};
pub use metadata::Metadata;
pub use nonce::Side;
pub use packet::Packet;
