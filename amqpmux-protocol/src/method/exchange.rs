//! Exchange class (40).

use super::MethodArgs;
use crate::error::ProtocolError;
use crate::field::{self, FieldTable};
use crate::wire;
use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeDeclare {
    pub exchange: String,
    pub kind: String,
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl ExchangeDeclare {
    pub fn new(exchange: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            kind: kind.into(),
            passive: false,
            durable: false,
            auto_delete: false,
            internal: false,
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

    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }
}

impl MethodArgs for ExchangeDeclare {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let _ticket = wire::read_u16(buf)?;
        let exchange = wire::read_short_str(buf)?;
        let kind = wire::read_short_str(buf)?;
        let bits = wire::read_u8(buf)?;
        Ok(Self {
            exchange,
            kind,
            passive: wire::bit(bits, 0),
            durable: wire::bit(bits, 1),
            auto_delete: wire::bit(bits, 2),
            internal: wire::bit(bits, 3),
            no_wait: wire::bit(bits, 4),
            arguments: field::read_table(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(0);
        wire::write_short_str(buf, &self.exchange)?;
        wire::write_short_str(buf, &self.kind)?;
        buf.put_u8(wire::pack_bits(&[
            self.passive,
            self.durable,
            self.auto_delete,
            self.internal,
            self.no_wait,
        ]));
        field::write_table(buf, &self.arguments)
    }
}

empty_method!(ExchangeDeclareOk);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDelete {
    pub exchange: String,
    pub if_unused: bool,
    pub no_wait: bool,
}

impl ExchangeDelete {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            if_unused: false,
            no_wait: false,
        }
    }

    pub fn if_unused(mut self, if_unused: bool) -> Self {
        self.if_unused = if_unused;
        self
    }
}

impl MethodArgs for ExchangeDelete {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let _ticket = wire::read_u16(buf)?;
        let exchange = wire::read_short_str(buf)?;
        let bits = wire::read_u8(buf)?;
        Ok(Self {
            exchange,
            if_unused: wire::bit(bits, 0),
            no_wait: wire::bit(bits, 1),
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(0);
        wire::write_short_str(buf, &self.exchange)?;
        buf.put_u8(wire::pack_bits(&[self.if_unused, self.no_wait]));
        Ok(())
    }
}

empty_method!(ExchangeDeleteOk);

/// Declares an exchange-to-exchange binding method; bind and unbind share
/// one layout.
macro_rules! exchange_binding {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            pub destination: String,
            pub source: String,
            pub routing_key: String,
            pub no_wait: bool,
            pub arguments: FieldTable,
        }

        impl $name {
            pub fn new(
                destination: impl Into<String>,
                source: impl Into<String>,
                routing_key: impl Into<String>,
            ) -> Self {
                Self {
                    destination: destination.into(),
                    source: source.into(),
                    routing_key: routing_key.into(),
                    no_wait: false,
                    arguments: FieldTable::new(),
                }
            }
        }

        impl MethodArgs for $name {
            fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
                let _ticket = wire::read_u16(buf)?;
                Ok(Self {
                    destination: wire::read_short_str(buf)?,
                    source: wire::read_short_str(buf)?,
                    routing_key: wire::read_short_str(buf)?,
                    no_wait: wire::bit(wire::read_u8(buf)?, 0),
                    arguments: field::read_table(buf)?,
                })
            }

            fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
                buf.put_u16(0);
                wire::write_short_str(buf, &self.destination)?;
                wire::write_short_str(buf, &self.source)?;
                wire::write_short_str(buf, &self.routing_key)?;
                buf.put_u8(wire::pack_bits(&[self.no_wait]));
                field::write_table(buf, &self.arguments)
            }
        }
    };
}

exchange_binding!(ExchangeBind);
empty_method!(ExchangeBindOk);
exchange_binding!(ExchangeUnbind);
empty_method!(ExchangeUnbindOk);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_wire_format() {
        let mut buf = BytesMut::new();
        ExchangeDeclare::new("x", "direct")
            .durable(true)
            .internal(true)
            .write(&mut buf)
            .unwrap();
        let mut expected = vec![0, 0, 1, b'x', 6];
        expected.extend_from_slice(b"direct");
        expected.extend_from_slice(&[0b0000_1010, 0, 0, 0, 0]);
        assert_eq!(&buf[..], &expected[..]);
    }

    #[test]
    fn test_delete_bits() {
        let mut buf = BytesMut::new();
        ExchangeDelete::new("x").if_unused(true).write(&mut buf).unwrap();
        let decoded = ExchangeDelete::read(&mut buf.freeze()).unwrap();
        assert!(decoded.if_unused);
        assert!(!decoded.no_wait);
    }
}
