//! Connection class (10): negotiation, tuning and connection-level close.

use super::{MethodArgs, MethodId};
use crate::error::ProtocolError;
use crate::field::{self, FieldTable};
use crate::wire;
use bytes::{BufMut, Bytes, BytesMut};

/// Broker greeting carrying its properties and supported mechanisms.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStart {
    pub version_major: u8,
    pub version_minor: u8,
    pub server_properties: FieldTable,
    /// Space separated SASL mechanism names.
    pub mechanisms: String,
    /// Space separated locales.
    pub locales: String,
}

impl ConnectionStart {
    pub fn mechanisms(&self) -> impl Iterator<Item = &str> {
        self.mechanisms.split_whitespace()
    }

    pub fn supports_mechanism(&self, name: &str) -> bool {
        self.mechanisms().any(|m| m == name)
    }

    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.locales.split_whitespace()
    }
}

impl MethodArgs for ConnectionStart {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            version_major: wire::read_u8(buf)?,
            version_minor: wire::read_u8(buf)?,
            server_properties: field::read_table(buf)?,
            mechanisms: wire::read_long_text(buf)?,
            locales: wire::read_long_text(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u8(self.version_major);
        buf.put_u8(self.version_minor);
        field::write_table(buf, &self.server_properties)?;
        wire::write_long_str(buf, self.mechanisms.as_bytes())?;
        wire::write_long_str(buf, self.locales.as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStartOk {
    pub client_properties: FieldTable,
    pub mechanism: String,
    pub response: Bytes,
    pub locale: String,
}

impl MethodArgs for ConnectionStartOk {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            client_properties: field::read_table(buf)?,
            mechanism: wire::read_short_str(buf)?,
            response: wire::read_long_str(buf)?,
            locale: wire::read_short_str(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        field::write_table(buf, &self.client_properties)?;
        wire::write_short_str(buf, &self.mechanism)?;
        wire::write_long_str(buf, &self.response)?;
        wire::write_short_str(buf, &self.locale)
    }
}

/// SASL challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecure {
    pub challenge: Bytes,
}

impl MethodArgs for ConnectionSecure {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            challenge: wire::read_long_str(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        wire::write_long_str(buf, &self.challenge)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecureOk {
    pub response: Bytes,
}

impl MethodArgs for ConnectionSecureOk {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            response: wire::read_long_str(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        wire::write_long_str(buf, &self.response)
    }
}

/// Broker proposal for channel-max, frame-max and heartbeat.
///
/// Zero means "no limit" for channel-max and frame-max and "disabled" for
/// heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTune {
    pub channel_max: u16,
    pub frame_max: u32,
    /// Seconds.
    pub heartbeat: u16,
}

fn read_tune(buf: &mut Bytes) -> Result<(u16, u32, u16), ProtocolError> {
    Ok((
        wire::read_u16(buf)?,
        wire::read_u32(buf)?,
        wire::read_u16(buf)?,
    ))
}

impl MethodArgs for ConnectionTune {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let (channel_max, frame_max, heartbeat) = read_tune(buf)?;
        Ok(Self {
            channel_max,
            frame_max,
            heartbeat,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(self.channel_max);
        buf.put_u32(self.frame_max);
        buf.put_u16(self.heartbeat);
        Ok(())
    }
}

/// The values the client settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTuneOk {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

impl MethodArgs for ConnectionTuneOk {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let (channel_max, frame_max, heartbeat) = read_tune(buf)?;
        Ok(Self {
            channel_max,
            frame_max,
            heartbeat,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(self.channel_max);
        buf.put_u32(self.frame_max);
        buf.put_u16(self.heartbeat);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOpen {
    pub virtual_host: String,
}

impl ConnectionOpen {
    pub fn new(virtual_host: impl Into<String>) -> Self {
        Self {
            virtual_host: virtual_host.into(),
        }
    }
}

impl MethodArgs for ConnectionOpen {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let virtual_host = wire::read_short_str(buf)?;
        let _capabilities = wire::read_short_str(buf)?;
        let _insist = wire::read_u8(buf)?;
        Ok(Self { virtual_host })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        wire::write_short_str(buf, &self.virtual_host)?;
        // reserved capabilities and insist bit
        wire::write_short_str(buf, "")?;
        buf.put_u8(0);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOpenOk;

impl MethodArgs for ConnectionOpenOk {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let _known_hosts = wire::read_short_str(buf)?;
        Ok(Self)
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        wire::write_short_str(buf, "")
    }
}

/// Declares a close method: reply code, reply text and the id of the
/// method that caused the close (zero when none).
macro_rules! close_method {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub reply_code: u16,
            pub reply_text: String,
            pub class_id: u16,
            pub method_index: u16,
        }

        impl $name {
            pub fn new(reply_code: u16, reply_text: impl Into<String>, failed: Option<MethodId>) -> Self {
                let failed = failed.unwrap_or(MethodId::new(0, 0));
                Self {
                    reply_code,
                    reply_text: reply_text.into(),
                    class_id: failed.class_id(),
                    method_index: failed.method_index(),
                }
            }

            /// The method that triggered the close, if the peer named one.
            pub fn failed_method(&self) -> Option<MethodId> {
                if self.class_id == 0 && self.method_index == 0 {
                    None
                } else {
                    Some(MethodId::new(self.class_id, self.method_index))
                }
            }
        }

        impl MethodArgs for $name {
            fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
                Ok(Self {
                    reply_code: wire::read_u16(buf)?,
                    reply_text: wire::read_short_str(buf)?,
                    class_id: wire::read_u16(buf)?,
                    method_index: wire::read_u16(buf)?,
                })
            }

            fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
                buf.put_u16(self.reply_code);
                wire::write_short_str(buf, &self.reply_text)?;
                buf.put_u16(self.class_id);
                buf.put_u16(self.method_index);
                Ok(())
            }
        }
    };
}

pub(crate) use close_method;

close_method!(
    /// Connection-level close, sent by either peer.
    ConnectionClose
);

empty_method!(ConnectionCloseOk);

/// Broker stopped reading from the connection (resource alarm).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionBlocked {
    pub reason: String,
}

impl MethodArgs for ConnectionBlocked {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            reason: wire::read_short_str(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        wire::write_short_str(buf, &self.reason)
    }
}

empty_method!(ConnectionUnblocked);
