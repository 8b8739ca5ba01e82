//! Length-prefixed framing of envelopes over a byte stream.
//!
//! ```text
//! +-------------------+---------------------------+
//! | length (4 bytes)  |   envelope JSON text      |
//! | u32 little-endian |   (length bytes)          |
//! +-------------------+---------------------------+
//! ```
//!
//! The length does not include the prefix. A frame whose text fails to decode
//! surfaces as [`FrameError::Protocol`]; the stream itself stays usable since
//! the full frame was consumed.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::envelope::{self, Envelope};
use crate::error::ProtocolError;

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest accepted payload in bytes. Default: 1 MiB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// Errors that can occur while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The announced or actual payload size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The peer closed the stream before a complete frame arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The frame arrived intact but its contents were not a valid envelope.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the stream can still be read after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Protocol(_))
    }
}

fn eof_as_closed(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Read one raw frame payload.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(eof_as_closed)?;

    let payload_len = u32::from_le_bytes(len_buf);
    if payload_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: config.max_payload_size,
        });
    }

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        reader.read_exact(&mut payload).await.map_err(eof_as_closed)?;
    }
    Ok(payload)
}

/// Write one raw frame payload and flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    if len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        });
    }

    writer.write_all(&len.to_le_bytes()).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Read and decode one envelope.
pub async fn read_envelope<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Envelope, FrameError> {
    let payload = read_frame(reader, config).await?;
    Ok(envelope::decode(&payload)?)
}

/// Encode and write one envelope.
pub async fn write_envelope<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    env: &Envelope,
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let payload = envelope::encode(env)?;
    write_frame(writer, &payload, config).await
}
