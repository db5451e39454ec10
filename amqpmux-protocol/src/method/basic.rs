//! Basic class (60): qos, consumers, publishing and acknowledgements.

use super::MethodArgs;
use crate::error::ProtocolError;
use crate::field::{self, FieldTable};
use crate::wire;
use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicQos {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
    pub global: bool,
}

impl BasicQos {
    pub fn new(prefetch_count: u16) -> Self {
        Self {
            prefetch_size: 0,
            prefetch_count,
            global: false,
        }
    }
}

impl MethodArgs for BasicQos {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            prefetch_size: wire::read_u32(buf)?,
            prefetch_count: wire::read_u16(buf)?,
            global: wire::bit(wire::read_u8(buf)?, 0),
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u32(self.prefetch_size);
        buf.put_u16(self.prefetch_count);
        buf.put_u8(wire::pack_bits(&[self.global]));
        Ok(())
    }
}

empty_method!(BasicQosOk);

#[derive(Debug, Clone, PartialEq)]
pub struct BasicConsume {
    pub queue: String,
    /// Empty to let the broker generate a tag.
    pub consumer_tag: String,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl BasicConsume {
    pub fn new(queue: impl Into<String>, consumer_tag: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            consumer_tag: consumer_tag.into(),
            no_local: false,
            no_ack: false,
            exclusive: false,
            no_wait: false,
            arguments: FieldTable::new(),
        }
    }

    pub fn no_ack(mut self, no_ack: bool) -> Self {
        self.no_ack = no_ack;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }
}

impl MethodArgs for BasicConsume {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let _ticket = wire::read_u16(buf)?;
        let queue = wire::read_short_str(buf)?;
        let consumer_tag = wire::read_short_str(buf)?;
        let bits = wire::read_u8(buf)?;
        Ok(Self {
            queue,
            consumer_tag,
            no_local: wire::bit(bits, 0),
            no_ack: wire::bit(bits, 1),
            exclusive: wire::bit(bits, 2),
            no_wait: wire::bit(bits, 3),
            arguments: field::read_table(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(0);
        wire::write_short_str(buf, &self.queue)?;
        wire::write_short_str(buf, &self.consumer_tag)?;
        buf.put_u8(wire::pack_bits(&[
            self.no_local,
            self.no_ack,
            self.exclusive,
            self.no_wait,
        ]));
        field::write_table(buf, &self.arguments)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicConsumeOk {
    pub consumer_tag: String,
}

impl MethodArgs for BasicConsumeOk {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            consumer_tag: wire::read_short_str(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        wire::write_short_str(buf, &self.consumer_tag)
    }
}

/// Ends a consumer. The broker sends it too when the queue goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCancel {
    pub consumer_tag: String,
    pub no_wait: bool,
}

impl MethodArgs for BasicCancel {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            consumer_tag: wire::read_short_str(buf)?,
            no_wait: wire::bit(wire::read_u8(buf)?, 0),
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        wire::write_short_str(buf, &self.consumer_tag)?;
        buf.put_u8(wire::pack_bits(&[self.no_wait]));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCancelOk {
    pub consumer_tag: String,
}

impl MethodArgs for BasicCancelOk {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            consumer_tag: wire::read_short_str(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        wire::write_short_str(buf, &self.consumer_tag)
    }
}

/// Publishes a message; a content header and body follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicPublish {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
}

impl BasicPublish {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            mandatory: false,
            immediate: false,
        }
    }

    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }
}

impl MethodArgs for BasicPublish {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let _ticket = wire::read_u16(buf)?;
        let exchange = wire::read_short_str(buf)?;
        let routing_key = wire::read_short_str(buf)?;
        let bits = wire::read_u8(buf)?;
        Ok(Self {
            exchange,
            routing_key,
            mandatory: wire::bit(bits, 0),
            immediate: wire::bit(bits, 1),
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(0);
        wire::write_short_str(buf, &self.exchange)?;
        wire::write_short_str(buf, &self.routing_key)?;
        buf.put_u8(wire::pack_bits(&[self.mandatory, self.immediate]));
        Ok(())
    }
}

/// An unroutable mandatory message handed back; content follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicReturn {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
}

impl MethodArgs for BasicReturn {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            reply_code: wire::read_u16(buf)?,
            reply_text: wire::read_short_str(buf)?,
            exchange: wire::read_short_str(buf)?,
            routing_key: wire::read_short_str(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(self.reply_code);
        wire::write_short_str(buf, &self.reply_text)?;
        wire::write_short_str(buf, &self.exchange)?;
        wire::write_short_str(buf, &self.routing_key)
    }
}

/// A message pushed to a consumer; content follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicDeliver {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
}

impl MethodArgs for BasicDeliver {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            consumer_tag: wire::read_short_str(buf)?,
            delivery_tag: wire::read_u64(buf)?,
            redelivered: wire::bit(wire::read_u8(buf)?, 0),
            exchange: wire::read_short_str(buf)?,
            routing_key: wire::read_short_str(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        wire::write_short_str(buf, &self.consumer_tag)?;
        buf.put_u64(self.delivery_tag);
        buf.put_u8(wire::pack_bits(&[self.redelivered]));
        wire::write_short_str(buf, &self.exchange)?;
        wire::write_short_str(buf, &self.routing_key)
    }
}

/// Acknowledgement: consumer to broker, or a publisher confirm from the
/// broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicAck {
    pub delivery_tag: u64,
    pub multiple: bool,
}

impl MethodArgs for BasicAck {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            delivery_tag: wire::read_u64(buf)?,
            multiple: wire::bit(wire::read_u8(buf)?, 0),
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u64(self.delivery_tag);
        buf.put_u8(wire::pack_bits(&[self.multiple]));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicReject {
    pub delivery_tag: u64,
    pub requeue: bool,
}

impl MethodArgs for BasicReject {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            delivery_tag: wire::read_u64(buf)?,
            requeue: wire::bit(wire::read_u8(buf)?, 0),
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u64(self.delivery_tag);
        buf.put_u8(wire::pack_bits(&[self.requeue]));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicNack {
    pub delivery_tag: u64,
    pub multiple: bool,
    pub requeue: bool,
}

impl MethodArgs for BasicNack {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let delivery_tag = wire::read_u64(buf)?;
        let bits = wire::read_u8(buf)?;
        Ok(Self {
            delivery_tag,
            multiple: wire::bit(bits, 0),
            requeue: wire::bit(bits, 1),
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u64(self.delivery_tag);
        buf.put_u8(wire::pack_bits(&[self.multiple, self.requeue]));
        Ok(())
    }
}
