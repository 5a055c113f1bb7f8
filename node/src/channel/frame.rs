//! Wire frame codec.
//!
//! One logical message per frame:
//!
//! ```text
//! +---------+---+---+-----------------+
//! |  len(4) | T | C |   payload(len)  |
//! +---------+---+---+-----------------+
//! ```
//!
//! `len` is little-endian and counts only the payload bytes; `T` is the
//! message type and `C` the compression flag.

use crate::error::{Result, SyncError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Header size: 4-byte length + type + compression.
pub const HEADER_LEN: usize = 6;

/// Upper bound on a single payload. Anything larger is a framing violation.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    pub compression: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: u8, compression: u8, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            compression,
            payload,
        }
    }
}

/// Encode a frame into its wire bytes.
pub fn encode_frame(msg_type: u8, compression: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.push(msg_type);
    buf.push(compression);
    buf.extend_from_slice(payload);
    buf
}

/// Incremental frame decoder.
///
/// Bytes arrive from the socket in arbitrary chunks; the decoder buffers
/// them and yields a frame as soon as one is complete, so payloads may
/// straddle any number of reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes received from the transport.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if any.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(SyncError::protocol(format!(
                "frame payload of {} bytes exceeds limit",
                len
            )));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let msg_type = self.buf[4];
        let compression = self.buf[5];
        let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buf.drain(..HEADER_LEN + len);
        Ok(Some(Frame::new(msg_type, compression, payload)))
    }

    /// Bytes buffered but not yet consumed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Read one complete frame from an async reader.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(SyncError::protocol(format!(
            "frame payload of {} bytes exceeds limit",
            len
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Frame::new(header[4], header[5], payload))
}

/// Write one frame to an async writer.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg_type: u8,
    compression: u8,
    payload: &[u8],
) -> Result<()> {
    let bytes = encode_frame(msg_type, compression, payload);
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
