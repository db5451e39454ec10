//! Message properties and the content header payload.
//!
//! Content header layout:
//!
//! ```text
//! +----------+--------+-----------+----------------+---------------------+
//! | class_id | weight | body_size | property_flags | present properties  |
//! | 2 bytes  | 2 bytes|  8 bytes  |    2 bytes     | in declaration order|
//! +----------+--------+-----------+----------------+---------------------+
//! ```
//!
//! Bit 15 of `property_flags` marks the first property (content-type), bit
//! 14 the second and so on. Absent properties contribute no bytes.

use crate::error::ProtocolError;
use crate::field::{self, FieldTable};
use crate::wire;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed prefix preceding the property flags.
pub const CONTENT_HEADER_PREFIX: usize = 12;

const FLAG_CONTENT_TYPE: u16 = 1 << 15;
const FLAG_CONTENT_ENCODING: u16 = 1 << 14;
const FLAG_HEADERS: u16 = 1 << 13;
const FLAG_DELIVERY_MODE: u16 = 1 << 12;
const FLAG_PRIORITY: u16 = 1 << 11;
const FLAG_CORRELATION_ID: u16 = 1 << 10;
const FLAG_REPLY_TO: u16 = 1 << 9;
const FLAG_EXPIRATION: u16 = 1 << 8;
const FLAG_MESSAGE_ID: u16 = 1 << 7;
const FLAG_TIMESTAMP: u16 = 1 << 6;
const FLAG_TYPE: u16 = 1 << 5;
const FLAG_USER_ID: u16 = 1 << 4;
const FLAG_APP_ID: u16 = 1 << 3;
const FLAG_CLUSTER_ID: u16 = 1 << 2;
const FLAG_CONTINUATION: u16 = 1;

/// Delivery mode value marking a message as persistent.
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Delivery mode value marking a message as transient.
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;

/// Basic-class message properties. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: Option<FieldTable>,
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    /// Deprecated; decoded for completeness.
    pub cluster_id: Option<String>,
}

impl MessageProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    pub fn with_content_encoding(mut self, value: impl Into<String>) -> Self {
        self.content_encoding = Some(value.into());
        self
    }

    pub fn with_headers(mut self, headers: FieldTable) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_persistent(mut self) -> Self {
        self.delivery_mode = Some(DELIVERY_MODE_PERSISTENT);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_correlation_id(mut self, value: impl Into<String>) -> Self {
        self.correlation_id = Some(value.into());
        self
    }

    pub fn with_reply_to(mut self, value: impl Into<String>) -> Self {
        self.reply_to = Some(value.into());
        self
    }

    pub fn with_expiration(mut self, value: impl Into<String>) -> Self {
        self.expiration = Some(value.into());
        self
    }

    pub fn with_message_id(mut self, value: impl Into<String>) -> Self {
        self.message_id = Some(value.into());
        self
    }

    pub fn with_timestamp(mut self, seconds: u64) -> Self {
        self.timestamp = Some(seconds);
        self
    }

    pub fn with_kind(mut self, value: impl Into<String>) -> Self {
        self.kind = Some(value.into());
        self
    }

    pub fn with_user_id(mut self, value: impl Into<String>) -> Self {
        self.user_id = Some(value.into());
        self
    }

    pub fn with_app_id(mut self, value: impl Into<String>) -> Self {
        self.app_id = Some(value.into());
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.delivery_mode == Some(DELIVERY_MODE_PERSISTENT)
    }

    /// Presence bitmask for the set fields.
    pub fn flags(&self) -> u16 {
        let mut flags = 0;
        let mut mark = |present: bool, flag: u16| {
            if present {
                flags |= flag;
            }
        };
        mark(self.content_type.is_some(), FLAG_CONTENT_TYPE);
        mark(self.content_encoding.is_some(), FLAG_CONTENT_ENCODING);
        mark(self.headers.is_some(), FLAG_HEADERS);
        mark(self.delivery_mode.is_some(), FLAG_DELIVERY_MODE);
        mark(self.priority.is_some(), FLAG_PRIORITY);
        mark(self.correlation_id.is_some(), FLAG_CORRELATION_ID);
        mark(self.reply_to.is_some(), FLAG_REPLY_TO);
        mark(self.expiration.is_some(), FLAG_EXPIRATION);
        mark(self.message_id.is_some(), FLAG_MESSAGE_ID);
        mark(self.timestamp.is_some(), FLAG_TIMESTAMP);
        mark(self.kind.is_some(), FLAG_TYPE);
        mark(self.user_id.is_some(), FLAG_USER_ID);
        mark(self.app_id.is_some(), FLAG_APP_ID);
        mark(self.cluster_id.is_some(), FLAG_CLUSTER_ID);
        flags
    }

    /// Writes the flags word followed by every present property.
    pub fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(self.flags());

        let short = |buf: &mut BytesMut, value: &Option<String>| match value {
            Some(value) => wire::write_short_str(buf, value),
            None => Ok(()),
        };

        short(buf, &self.content_type)?;
        short(buf, &self.content_encoding)?;
        if let Some(headers) = &self.headers {
            field::write_table(buf, headers)?;
        }
        if let Some(mode) = self.delivery_mode {
            buf.put_u8(mode);
        }
        if let Some(priority) = self.priority {
            buf.put_u8(priority);
        }
        short(buf, &self.correlation_id)?;
        short(buf, &self.reply_to)?;
        short(buf, &self.expiration)?;
        short(buf, &self.message_id)?;
        if let Some(timestamp) = self.timestamp {
            buf.put_u64(timestamp);
        }
        short(buf, &self.kind)?;
        short(buf, &self.user_id)?;
        short(buf, &self.app_id)?;
        short(buf, &self.cluster_id)?;
        Ok(())
    }

    /// Reads the flags word and the properties it announces.
    pub fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let flags = wire::read_u16(buf)?;
        if flags & FLAG_CONTINUATION != 0 {
            return Err(ProtocolError::InvalidPropertyFlags(flags));
        }

        let short = |buf: &mut Bytes, flag: u16| -> Result<Option<String>, ProtocolError> {
            if flags & flag != 0 {
                wire::read_short_str(buf).map(Some)
            } else {
                Ok(None)
            }
        };

        let content_type = short(buf, FLAG_CONTENT_TYPE)?;
        let content_encoding = short(buf, FLAG_CONTENT_ENCODING)?;
        let headers = if flags & FLAG_HEADERS != 0 {
            Some(field::read_table(buf)?)
        } else {
            None
        };
        let delivery_mode = if flags & FLAG_DELIVERY_MODE != 0 {
            Some(wire::read_u8(buf)?)
        } else {
            None
        };
        let priority = if flags & FLAG_PRIORITY != 0 {
            Some(wire::read_u8(buf)?)
        } else {
            None
        };
        let correlation_id = short(buf, FLAG_CORRELATION_ID)?;
        let reply_to = short(buf, FLAG_REPLY_TO)?;
        let expiration = short(buf, FLAG_EXPIRATION)?;
        let message_id = short(buf, FLAG_MESSAGE_ID)?;
        let timestamp = if flags & FLAG_TIMESTAMP != 0 {
            Some(wire::read_u64(buf)?)
        } else {
            None
        };
        let kind = short(buf, FLAG_TYPE)?;
        let user_id = short(buf, FLAG_USER_ID)?;
        let app_id = short(buf, FLAG_APP_ID)?;
        let cluster_id = short(buf, FLAG_CLUSTER_ID)?;

        Ok(Self {
            content_type,
            content_encoding,
            headers,
            delivery_mode,
            priority,
            correlation_id,
            reply_to,
            expiration,
            message_id,
            timestamp,
            kind,
            user_id,
            app_id,
            cluster_id,
        })
    }
}

/// A decoded content header.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentHeader {
    pub class_id: u16,
    pub body_size: u64,
    pub properties: MessageProperties,
}

impl ContentHeader {
    pub fn new(body_size: u64, properties: MessageProperties) -> Self {
        Self {
            class_id: crate::BASIC_CLASS_ID,
            body_size,
            properties,
        }
    }

    /// Encodes the full content header payload.
    pub fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u16(self.class_id);
        // weight, unused
        buf.put_u16(0);
        buf.put_u64(self.body_size);
        self.properties.write(buf)
    }

    /// Decodes a full content header payload. Class and weight are not
    /// validated.
    pub fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let class_id = wire::read_u16(buf)?;
        let _weight = wire::read_u16(buf)?;
        let body_size = wire::read_u64(buf)?;
        let properties = MessageProperties::read(buf)?;
        Ok(Self {
            class_id,
            body_size,
            properties,
        })
    }

    /// Extracts the declared body size from the fixed prefix of a content
    /// header payload without decoding the properties.
    pub fn peek_body_size(payload: &[u8]) -> Result<u64, ProtocolError> {
        if payload.len() < CONTENT_HEADER_PREFIX {
            return Err(ProtocolError::UnexpectedEof {
                needed: CONTENT_HEADER_PREFIX - payload.len(),
            });
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&payload[4..CONTENT_HEADER_PREFIX]);
        Ok(u64::from_be_bytes(raw))
    }
}
