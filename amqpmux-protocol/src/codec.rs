//! Frame encoder and streaming frame decoder.
//!
//! The encoder writes complete frames straight into a caller-provided
//! buffer: the 7-byte header is reserved first and patched once the payload
//! length is known, so no intermediate payload buffer is needed.

use crate::error::ProtocolError;
use crate::frame::{Frame, FrameHeader, FrameType};
use crate::method::Method;
use crate::properties::ContentHeader;
use crate::registry::MethodRegistry;
use crate::{CONTROL_CHANNEL, FRAME_END, FRAME_HEADER_SIZE, FRAME_OVERHEAD};
use bytes::{BufMut, BytesMut};

/// Writes frames into a `BytesMut`.
pub struct FrameEncoder;

impl FrameEncoder {
    /// Writes a method frame, formatting through `registry` so that only
    /// sendable methods go out.
    pub fn method_frame(
        buf: &mut BytesMut,
        channel: u16,
        registry: &MethodRegistry,
        method: &Method,
    ) -> Result<(), ProtocolError> {
        Self::framed(buf, FrameType::Method, channel, |buf| {
            registry.format(method, buf)
        })
    }

    /// Writes a method frame without consulting a registry.
    pub fn raw_method_frame(
        buf: &mut BytesMut,
        channel: u16,
        method: &Method,
    ) -> Result<(), ProtocolError> {
        Self::framed(buf, FrameType::Method, channel, |buf| method.encode(buf))
    }

    pub fn content_header_frame(
        buf: &mut BytesMut,
        channel: u16,
        header: &ContentHeader,
    ) -> Result<(), ProtocolError> {
        Self::framed(buf, FrameType::ContentHeader, channel, |buf| {
            header.write(buf)
        })
    }

    pub fn body_frame(buf: &mut BytesMut, channel: u16, chunk: &[u8]) -> Result<(), ProtocolError> {
        buf.reserve(FRAME_OVERHEAD + chunk.len());
        Self::framed(buf, FrameType::ContentBody, channel, |buf| {
            buf.put_slice(chunk);
            Ok(())
        })
    }

    pub fn heartbeat(buf: &mut BytesMut) {
        buf.put_slice(&FrameHeader::new(FrameType::Heartbeat, CONTROL_CHANNEL, 0).encode());
        buf.put_u8(FRAME_END);
    }

    fn framed<F>(
        buf: &mut BytesMut,
        frame_type: FrameType,
        channel: u16,
        write_payload: F,
    ) -> Result<(), ProtocolError>
    where
        F: FnOnce(&mut BytesMut) -> Result<(), ProtocolError>,
    {
        let start = buf.len();
        buf.put_bytes(0, FRAME_HEADER_SIZE);

        if let Err(e) = write_payload(buf) {
            buf.truncate(start);
            return Err(e);
        }

        let payload_len = buf.len() - start - FRAME_HEADER_SIZE;
        let size = match u32::try_from(payload_len) {
            Ok(size) => size,
            Err(_) => {
                buf.truncate(start);
                return Err(ProtocolError::FrameTooLarge {
                    size: payload_len,
                    max: u32::MAX as usize,
                });
            }
        };
        FrameHeader::new(frame_type, channel, size).write_to(&mut buf[start..]);
        buf.put_u8(FRAME_END);
        Ok(())
    }
}

/// Accumulates bytes from a stream and yields complete frames.
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(usize::MAX)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer, self.max_frame_size)
    }

    /// Returns the number of buffered bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
