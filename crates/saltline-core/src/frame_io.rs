//! Length-delimited frame transport over a byte-stream.
//!
//! Every wire frame travels behind a 2-byte big-endian length prefix. The
//! reader is incremental and cancel-safe: partially read bytes persist in
//! an internal buffer across dropped futures, so the connection actor can
//! race a read against its other event sources without ever losing stream
//! position.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame the 2-byte length prefix can carry.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Largest application payload that still fits one Message frame after the
/// magic prefix, the counter, and the box authenticator.
pub const MAX_MESSAGE_LEN: usize = MAX_FRAME_LEN - 8 - 8 - 16;

/// Incremental reader yielding one decoded frame per call.
pub(crate) struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self { reader, buf: BytesMut::with_capacity(4096) }
    }

    /// Read the next frame.
    ///
    /// Cancel-safe: dropping the returned future between polls leaves all
    /// consumed bytes in the internal buffer.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` when the stream ends (mid-frame or between
    /// frames), `InvalidData` on a zero-length prefix, and any underlying
    /// I/O error as-is.
    pub(crate) async fn next(&mut self) -> io::Result<Bytes> {
        loop {
            if self.buf.len() >= 2 {
                let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
                if len == 0 {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "zero-length frame"));
                }
                if self.buf.len() >= 2 + len {
                    self.buf.advance(2);
                    return Ok(self.buf.split_to(len).freeze());
                }
            }

            let read = self.reader.read_buf(&mut self.buf).await?;
            if read == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }
    }
}

/// Write one frame behind its length prefix and flush.
///
/// # Errors
///
/// Returns `InvalidInput` if the frame exceeds [`MAX_FRAME_LEN`], plus any
/// underlying I/O error.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &[u8],
) -> io::Result<()> {
    if frame.is_empty() || frame.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "bad frame length"));
    }

    // One write for prefix and body; frames are small enough to copy.
    let mut buf = BytesMut::with_capacity(2 + frame.len());
    buf.put_u16(frame.len() as u16);
    buf.extend_from_slice(frame);

    writer.write_all(&buf).await?;
    writer.flush().await
}
