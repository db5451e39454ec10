//! Queue class (50).

use super::MethodArgs;
use crate::error::ProtocolError;
use crate::field::{self, FieldTable};
use crate::wire;
use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, PartialEq)]
pub struct QueueDeclare {
    /// Empty to let the broker generate a name.
    pub queue: String,
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl QueueDeclare {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            passive: false,
            durable: false,
            exclusive: false,
            auto_delete: false,
            no_wait: false,
            arguments: FieldTable::new(),
        }
    }

    pub fn passive(mut self, passive: bool) -> Self {
        self.passive = passive;
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<crate::FieldValue>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }
}

impl MethodArgs for QueueDeclare {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let _ticket = wire::read_u16(buf)?;
        let queue = wire::read_short_str(buf)?;
        let bits = wire::read_u8(buf)?;
        Ok(Self {
            queue,
            passive: wire::bit(bits, 0),
            durable: wire::bit(bits, 1),
            exclusive: wire::bit(bits, 2),
            auto_delete: wire::bit(bits, 3),
            no_wait: wire::bit(bits, 4),
            arguments: field::read_table(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(0);
        wire::write_short_str(buf, &self.queue)?;
        buf.put_u8(wire::pack_bits(&[
            self.passive,
            self.durable,
            self.exclusive,
            self.auto_delete,
            self.no_wait,
        ]));
        field::write_table(buf, &self.arguments)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclareOk {
    pub queue: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

impl MethodArgs for QueueDeclareOk {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            queue: wire::read_short_str(buf)?,
            message_count: wire::read_u32(buf)?,
            consumer_count: wire::read_u32(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        wire::write_short_str(buf, &self.queue)?;
        buf.put_u32(self.message_count);
        buf.put_u32(self.consumer_count);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueBind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl QueueBind {
    pub fn new(queue: impl Into<String>, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            no_wait: false,
            arguments: FieldTable::new(),
        }
    }
}

impl MethodArgs for QueueBind {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let _ticket = wire::read_u16(buf)?;
        Ok(Self {
            queue: wire::read_short_str(buf)?,
            exchange: wire::read_short_str(buf)?,
            routing_key: wire::read_short_str(buf)?,
            no_wait: wire::bit(wire::read_u8(buf)?, 0),
            arguments: field::read_table(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(0);
        wire::write_short_str(buf, &self.queue)?;
        wire::write_short_str(buf, &self.exchange)?;
        wire::write_short_str(buf, &self.routing_key)?;
        buf.put_u8(wire::pack_bits(&[self.no_wait]));
        field::write_table(buf, &self.arguments)
    }
}

empty_method!(QueueBindOk);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePurge {
    pub queue: String,
    pub no_wait: bool,
}

impl QueuePurge {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            no_wait: false,
        }
    }
}

impl MethodArgs for QueuePurge {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let _ticket = wire::read_u16(buf)?;
        Ok(Self {
            queue: wire::read_short_str(buf)?,
            no_wait: wire::bit(wire::read_u8(buf)?, 0),
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(0);
        wire::write_short_str(buf, &self.queue)?;
        buf.put_u8(wire::pack_bits(&[self.no_wait]));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePurgeOk {
    pub message_count: u32,
}

impl MethodArgs for QueuePurgeOk {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            message_count: wire::read_u32(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u32(self.message_count);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDelete {
    pub queue: String,
    pub if_unused: bool,
    pub if_empty: bool,
    pub no_wait: bool,
}

impl QueueDelete {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            if_unused: false,
            if_empty: false,
            no_wait: false,
        }
    }

    pub fn if_unused(mut self, if_unused: bool) -> Self {
        self.if_unused = if_unused;
        self
    }

    pub fn if_empty(mut self, if_empty: bool) -> Self {
        self.if_empty = if_empty;
        self
    }
}

impl MethodArgs for QueueDelete {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let _ticket = wire::read_u16(buf)?;
        let queue = wire::read_short_str(buf)?;
        let bits = wire::read_u8(buf)?;
        Ok(Self {
            queue,
            if_unused: wire::bit(bits, 0),
            if_empty: wire::bit(bits, 1),
            no_wait: wire::bit(bits, 2),
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(0);
        wire::write_short_str(buf, &self.queue)?;
        buf.put_u8(wire::pack_bits(&[self.if_unused, self.if_empty, self.no_wait]));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDeleteOk {
    pub message_count: u32,
}

impl MethodArgs for QueueDeleteOk {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            message_count: wire::read_u32(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u32(self.message_count);
        Ok(())
    }
}

/// Removes a binding. Unlike bind there is no no-wait bit.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueUnbind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: FieldTable,
}

impl QueueUnbind {
    pub fn new(queue: impl Into<String>, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            arguments: FieldTable::new(),
        }
    }
}

impl MethodArgs for QueueUnbind {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let _ticket = wire::read_u16(buf)?;
        Ok(Self {
            queue: wire::read_short_str(buf)?,
            exchange: wire::read_short_str(buf)?,
            routing_key: wire::read_short_str(buf)?,
            arguments: field::read_table(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(0);
        wire::write_short_str(buf, &self.queue)?;
        wire::write_short_str(buf, &self.exchange)?;
        wire::write_short_str(buf, &self.routing_key)?;
        field::write_table(buf, &self.arguments)
    }
}

empty_method!(QueueUnbindOk);
