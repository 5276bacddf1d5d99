//! Handshake metadata: an ordered list of (key, value) byte-string pairs.
//!
//! Metadata is exchanged exactly once, inside the handshake boxes. The
//! encoding is `count (u8) ‖ { key_len (u8) ‖ key ‖ value_len (u16 BE) ‖
//! value }*`, with one deliberate asymmetry: the **empty list encodes to
//! the empty byte string**, not to a lone zero count byte. The server
//! decides whether to answer with a Ready frame by testing the Initiate's
//! metadata segment for emptiness, so the zero-length encoding is load
//! bearing.

use bytes::{Buf, BufMut};

use crate::errors::{ProtocolError, Result};

/// Maximum number of entries (one-byte count field).
pub const MAX_ENTRIES: usize = 255;

/// Maximum key length in bytes (one-byte length field).
pub const MAX_KEY_LEN: usize = 255;

/// Maximum value length in bytes (two-byte length field).
pub const MAX_VALUE_LEN: usize = 65_535;

/// Ordered list of (key, value) byte-string pairs.
///
/// Entries keep their insertion order; duplicate keys are allowed and
/// round-trip unchanged. Limits are enforced on insertion so that
/// [`Metadata::encode`] cannot fail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Metadata {
    /// An empty metadata list.
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Append an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the list already holds [`MAX_ENTRIES`] entries,
    /// or if the key or value exceeds its length field.
    pub fn push(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        let key = key.into();
        let value = value.into();

        if self.entries.len() >= MAX_ENTRIES {
            return Err(ProtocolError::TooManyEntries(self.entries.len() + 1));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(ProtocolError::KeyTooLong(key.len()));
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(ProtocolError::ValueTooLong(value.len()));
        }

        self.entries.push((key, value));
        Ok(())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value of the first entry with the given key, if any.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_slice())
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Encode into a buffer. The empty list writes nothing.
    pub fn encode(&self, dst: &mut impl BufMut) {
        if self.entries.is_empty() {
            return;
        }

        // Lengths were validated in push, so the casts cannot truncate.
        dst.put_u8(self.entries.len() as u8);
        for (key, value) in &self.entries {
            dst.put_u8(key.len() as u8);
            dst.put_slice(key);
            dst.put_u16(value.len() as u16);
            dst.put_slice(value);
        }
    }

    /// Encode into a fresh byte vector.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    /// Decode a metadata segment. The empty byte string decodes to the
    /// empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry runs past the end of the segment, or if
    /// bytes remain after the counted entries.
    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }

        let count = bytes.get_u8() as usize;
        let mut entries = Vec::with_capacity(count);

        for _ in 0..count {
            if bytes.remaining() < 1 {
                return Err(ProtocolError::MetadataTruncated);
            }
            let key_len = bytes.get_u8() as usize;
            if bytes.remaining() < key_len {
                return Err(ProtocolError::MetadataTruncated);
            }
            let key = bytes[..key_len].to_vec();
            bytes.advance(key_len);

            if bytes.remaining() < 2 {
                return Err(ProtocolError::MetadataTruncated);
            }
            let value_len = bytes.get_u16() as usize;
            if bytes.remaining() < value_len {
                return Err(ProtocolError::MetadataTruncated);
            }
            let value = bytes[..value_len].to_vec();
            bytes.advance(value_len);

            entries.push((key, value));
        }

        if bytes.has_remaining() {
            return Err(ProtocolError::TrailingBytes(bytes.remaining()));
        }

        Ok(Self { entries })
    }
}

impl<K: Into<Vec<u8>>, V: Into<Vec<u8>>> FromIterator<(K, V)> for Metadata {
    /// Collect entries, silently dropping any past the encoding limits.
    /// Use [`Metadata::push`] when the caller needs the error.
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut md = Self::new();
        for (k, v) in iter {
            if md.push(k, v).is_err() {
                break;
            }
        }
        md
    }
}
