// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame encoding and the rolling-buffer decoder.
//!
//! Wire format per frame: `type(1 byte) | length(4 bytes, unsigned
//! big-endian) | payload(length bytes)`. The decoder buffers partial input
//! until a full frame arrives; the length bound is enforced from the header,
//! before any payload is buffered.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Default cap on a decoded payload (10 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Frame header: tag byte + u32 length.
const HEADER_LEN: usize = 5;

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Unknown frame type: 0x{0:02x}")]
    UnknownFrameKind(u8),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Frame type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Request = 0x01,
    Response = 0x02,
    Notification = 0x03,
    Binary = 0x04,
    Heartbeat = 0x05,
    AuthChallenge = 0x06,
    AuthResponse = 0x07,
}

impl FrameKind {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(FrameKind::Request),
            0x02 => Some(FrameKind::Response),
            0x03 => Some(FrameKind::Notification),
            0x04 => Some(FrameKind::Binary),
            0x05 => Some(FrameKind::Heartbeat),
            0x06 => Some(FrameKind::AuthChallenge),
            0x07 => Some(FrameKind::AuthResponse),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    pub fn heartbeat() -> Self {
        Self::new(FrameKind::Heartbeat, Vec::new())
    }
}

/// Encode a frame to its wire form.
pub fn encode_frame(frame: &Frame, max_message_size: usize) -> Result<Vec<u8>, TransportError> {
    if frame.payload.len() > max_message_size {
        return Err(TransportError::MessageTooLarge {
            size: frame.payload.len(),
            max: max_message_size,
        });
    }
    let mut out = BytesMut::with_capacity(HEADER_LEN + frame.payload.len());
    out.put_u8(frame.kind.as_u8());
    out.put_u32(frame.payload.len() as u32);
    out.put_slice(&frame.payload);
    Ok(out.to_vec())
}

/// Rolling-buffer frame decoder.
pub struct FrameDecoder {
    buf: BytesMut,
    max_message_size: usize,
}

impl FrameDecoder {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_message_size,
        }
    }

    /// Append raw bytes to the buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Drain the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let kind = FrameKind::from_u8(self.buf[0])
            .ok_or(TransportError::UnknownFrameKind(self.buf[0]))?;
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        if len > self.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: len,
                max: self.max_message_size,
            });
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(len).to_vec();
        Ok(Some(Frame { kind, payload }))
    }

    /// Append bytes and drain every complete frame.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>, TransportError> {
        self.extend(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Bytes currently buffered without forming a complete frame.
    pub fn residual_len(&self) -> usize {
        self.buf.len()
    }
}

/// Read one frame from an async reader, buffering through `decoder`.
pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
) -> Result<Frame, TransportError> {
    loop {
        if let Some(frame) = decoder.next_frame()? {
            return Ok(frame);
        }
        let mut chunk = [0u8; 8 * 1024];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        decoder.extend(&chunk[..n]);
    }
}

/// Write one frame to an async writer.
pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
    max_message_size: usize,
) -> Result<(), TransportError> {
    let data = encode_frame(frame, max_message_size)?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
