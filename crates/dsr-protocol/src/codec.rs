use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{DsMessage, MAX_MESSAGE_SIZE};

/// Length prefix plus type tag.
const HEADER_SIZE: usize = 5;

/// Codec for encoding/decoding dsrpc protocol messages.
pub struct DsCodec;

impl DsCodec {
    /// Encode a message with framing: [4 bytes len][1 byte tag][payload]
    ///
    /// `len` is big-endian and counts the tag byte plus the payload.
    pub fn encode(msg: &DsMessage) -> ProtocolResult<Vec<u8>> {
        let payload =
            bincode::serialize(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let len = (payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(msg.type_tag());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode one framed message. Returns (message, bytes_consumed).
    pub fn decode(data: &[u8]) -> ProtocolResult<(DsMessage, usize)> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::FramingError("too short".into()));
        }
        let len = frame_len(data)?;
        let total = 4 + len;
        if data.len() < total {
            return Err(ProtocolError::FramingError(format!(
                "incomplete: have {}, need {}",
                data.len(),
                total
            )));
        }

        let tag = data[4];
        if !DsMessage::is_known_tag(tag) {
            return Err(ProtocolError::InvalidMessageType(tag));
        }
        let msg: DsMessage = bincode::deserialize(&data[HEADER_SIZE..total])
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if msg.type_tag() != tag {
            return Err(ProtocolError::TagMismatch {
                tag,
                payload: msg.type_name(),
            });
        }
        Ok((msg, total))
    }

    /// Decode a buffer that must hold exactly one frame.
    pub fn decode_exact(data: &[u8]) -> ProtocolResult<DsMessage> {
        let (msg, consumed) = Self::decode(data)?;
        if consumed != data.len() {
            return Err(ProtocolError::FramingError(format!(
                "{} trailing bytes after frame",
                data.len() - consumed
            )));
        }
        Ok(msg)
    }
}

/// Validated length field of the frame starting at `data[0]`.
fn frame_len(data: &[u8]) -> ProtocolResult<usize> {
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if len < 1 {
        return Err(ProtocolError::FramingError("zero-length frame".into()));
    }
    if len - 1 > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len - 1,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(len)
}

/// Incremental decoder for a byte stream carrying consecutive frames.
///
/// Chunks may split frames anywhere; [`FrameDecoder::next_frame`] yields a
/// message only once all of its bytes have arrived.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Take the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> ProtocolResult<Option<DsMessage>> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let total = 4 + frame_len(&self.buf)?;
        if self.buf.len() < total {
            return Ok(None);
        }
        let frame = self.buf.split_to(total);
        let (msg, _) = DsCodec::decode(&frame)?;
        trace!(tag = msg.type_tag(), len = total, "frame decoded");
        Ok(Some(msg))
    }

    /// Bytes received but not yet consumed as frames.
    pub fn buffered(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
