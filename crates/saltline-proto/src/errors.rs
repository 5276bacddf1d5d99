//! Error types for the saltline wire layer.
//!
//! All errors are structured, testable, and carry the sizes involved so a
//! peer debugging a malformed frame can see what the decoder expected.

use thiserror::Error;

/// Errors raised while encoding or decoding wire frames and metadata.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is shorter than its fixed layout allows
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort {
        /// Minimum size for the claimed packet type
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// The 8-byte magic prefix matches no known packet type
    #[error("unknown packet magic: {0:02X?}")]
    UnknownMagic([u8; 8]),

    /// A fixed-size box field has the wrong length
    #[error("{packet} box has wrong length: expected {expected} bytes, got {actual}")]
    BadBoxLength {
        /// Packet type the box belongs to
        packet: &'static str,
        /// Required length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// A variable-size box field is below its minimum length
    #[error("{packet} box too short: expected at least {expected} bytes, got {actual}")]
    BoxTooShort {
        /// Packet type the box belongs to
        packet: &'static str,
        /// Minimum length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Metadata list holds more entries than the count field can carry
    #[error("metadata holds too many entries: {0}")]
    TooManyEntries(usize),

    /// Metadata key exceeds the one-byte length field
    #[error("metadata key too long: {0} bytes")]
    KeyTooLong(usize),

    /// Metadata value exceeds the two-byte length field
    #[error("metadata value too long: {0} bytes")]
    ValueTooLong(usize),

    /// Metadata entries claim more bytes than the segment contains
    #[error("metadata truncated")]
    MetadataTruncated,

    /// Bytes remain after the counted metadata entries
    #[error("{0} trailing bytes after metadata entries")]
    TrailingBytes(usize),
}

/// Convenient Result type alias for wire operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
