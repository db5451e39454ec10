//! Channel class (20).

use super::connection::close_method;
use super::{MethodArgs, MethodId};
use crate::error::ProtocolError;
use crate::wire;
use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelOpen;

impl MethodArgs for ChannelOpen {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let _out_of_band = wire::read_short_str(buf)?;
        Ok(Self)
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        wire::write_short_str(buf, "")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelOpenOk;

impl MethodArgs for ChannelOpenOk {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let _channel_id = wire::read_long_str(buf)?;
        Ok(Self)
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        wire::write_long_str(buf, b"")
    }
}

/// Asks the peer to pause (`active = false`) or resume content delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFlow {
    pub active: bool,
}

impl MethodArgs for ChannelFlow {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            active: wire::bit(wire::read_u8(buf)?, 0),
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u8(wire::pack_bits(&[self.active]));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFlowOk {
    pub active: bool,
}

impl MethodArgs for ChannelFlowOk {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            active: wire::bit(wire::read_u8(buf)?, 0),
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u8(wire::pack_bits(&[self.active]));
        Ok(())
    }
}

close_method!(
    /// Channel-level close, sent by either peer.
    ChannelClose
);

empty_method!(ChannelCloseOk);
