//! Generic AMQP frame envelope.
//!
//! Frame layout (7 bytes header + payload + 1 byte frame-end):
//!
//! ```text
//! +--------+---------+-------------+-------------------+-----------+
//! |  type  | channel | payload_len |      payload      | frame-end |
//! | 1 byte | 2 bytes |   4 bytes   | payload_len bytes |  1 byte   |
//! +--------+---------+-------------+-------------------+-----------+
//! ```
//!
//! All integers are big-endian and the frame-end marker is always `0xCE`.

use crate::error::ProtocolError;
use crate::{FRAME_END, FRAME_HEADER_SIZE, FRAME_OVERHEAD};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Method,
    ContentHeader,
    ContentBody,
    Heartbeat,
    /// Any type byte outside the known set. Always a fatal connection error.
    Malformed,
}

impl FrameType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => FrameType::Method,
            2 => FrameType::ContentHeader,
            3 => FrameType::ContentBody,
            8 => FrameType::Heartbeat,
            _ => FrameType::Malformed,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            FrameType::Method => 1,
            FrameType::ContentHeader => 2,
            FrameType::ContentBody => 3,
            FrameType::Heartbeat => 8,
            FrameType::Malformed => 0,
        }
    }
}

/// The fixed 7-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub channel: u16,
    pub size: u32,
}

impl FrameHeader {
    pub fn new(frame_type: FrameType, channel: u16, size: u32) -> Self {
        Self {
            frame_type,
            channel,
            size,
        }
    }

    /// Encodes the header into its 7-byte wire form.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];
        self.write_to(&mut out);
        out
    }

    /// Writes the header into the first 7 bytes of `dst`.
    ///
    /// Used to patch a reserved header once the payload length is known.
    pub fn write_to(&self, dst: &mut [u8]) {
        dst[0] = self.frame_type.as_byte();
        dst[1..3].copy_from_slice(&self.channel.to_be_bytes());
        dst[3..7].copy_from_slice(&self.size.to_be_bytes());
    }

    /// Decodes a header.
    ///
    /// An unknown type byte does not fail: it yields
    /// [`FrameType::Malformed`] with channel and size zeroed, and the caller
    /// must treat it as a fatal connection error.
    pub fn decode(bytes: &[u8; FRAME_HEADER_SIZE]) -> Self {
        let frame_type = FrameType::from_byte(bytes[0]);
        if frame_type == FrameType::Malformed {
            return Self::new(FrameType::Malformed, 0, 0);
        }

        Self {
            frame_type,
            channel: u16::from_be_bytes([bytes[1], bytes[2]]),
            size: u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]),
        }
    }
}

/// A complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub channel: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, channel: u16, payload: Bytes) -> Self {
        Self {
            frame_type,
            channel,
            payload,
        }
    }

    /// A zero-length heartbeat frame on the control channel.
    pub fn heartbeat() -> Self {
        Self::new(FrameType::Heartbeat, crate::CONTROL_CHANNEL, Bytes::new())
    }

    /// Total size on the wire.
    pub fn wire_size(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Encodes the frame into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.frame_type == FrameType::Malformed {
            return Err(ProtocolError::MalformedFrame(0));
        }
        let size = u32::try_from(self.payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
            size: self.payload.len(),
            max: u32::MAX as usize,
        })?;

        buf.reserve(self.wire_size());
        buf.put_slice(&FrameHeader::new(self.frame_type, self.channel, size).encode());
        buf.put_slice(&self.payload);
        buf.put_u8(FRAME_END);
        Ok(())
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    pub fn decode(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut raw = [0u8; FRAME_HEADER_SIZE];
        raw.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
        let header = FrameHeader::decode(&raw);
        if header.frame_type == FrameType::Malformed {
            return Err(ProtocolError::MalformedFrame(raw[0]));
        }

        let total_len = FRAME_OVERHEAD + header.size as usize;
        if total_len > max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: total_len,
                max: max_frame_size,
            });
        }
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(header.size as usize).freeze();
        let end = buf.get_u8();
        if end != FRAME_END {
            return Err(ProtocolError::InvalidFrameEnd(end));
        }

        Ok(Some(Self {
            frame_type: header.frame_type,
            channel: header.channel,
            payload,
        }))
    }
}
