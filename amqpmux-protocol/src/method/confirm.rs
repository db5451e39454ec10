//! Confirm class (85): publisher confirms.

use super::MethodArgs;
use crate::error::ProtocolError;
use crate::wire;
use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfirmSelect {
    pub no_wait: bool,
}

impl MethodArgs for ConfirmSelect {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            no_wait: wire::bit(wire::read_u8(buf)?, 0),
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u8(wire::pack_bits(&[self.no_wait]));
        Ok(())
    }
}

empty_method!(ConfirmSelectOk);
