//! AMQP field tables and field values.
//!
//! Type tags follow the RabbitMQ interpretation of the 0-9-1 grammar.

use crate::error::ProtocolError;
use crate::wire::{self, ensure};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// A field table: short-string keys mapped to typed values.
pub type FieldTable = BTreeMap<String, FieldValue>;

/// A typed value inside a field table or field array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal { scale: u8, value: u32 },
    #[serde(serialize_with = "serialize_text")]
    LongString(Bytes),
    Array(Vec<FieldValue>),
    Timestamp(u64),
    Table(FieldTable),
    ByteArray(Bytes),
    Void,
}

fn serialize_text<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(value))
}

impl FieldValue {
    pub fn tag(&self) -> u8 {
        match self {
            FieldValue::Bool(_) => b't',
            FieldValue::I8(_) => b'b',
            FieldValue::U8(_) => b'B',
            FieldValue::I16(_) => b's',
            FieldValue::U16(_) => b'u',
            FieldValue::I32(_) => b'I',
            FieldValue::U32(_) => b'i',
            FieldValue::I64(_) => b'l',
            FieldValue::F32(_) => b'f',
            FieldValue::F64(_) => b'd',
            FieldValue::Decimal { .. } => b'D',
            FieldValue::LongString(_) => b'S',
            FieldValue::Array(_) => b'A',
            FieldValue::Timestamp(_) => b'T',
            FieldValue::Table(_) => b'F',
            FieldValue::ByteArray(_) => b'x',
            FieldValue::Void => b'V',
        }
    }

    /// Returns the value as text when it is a UTF-8 long string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::LongString(raw) => std::str::from_utf8(raw).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&FieldTable> {
        match self {
            FieldValue::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u8(self.tag());
        match self {
            FieldValue::Bool(v) => buf.put_u8(u8::from(*v)),
            FieldValue::I8(v) => buf.put_i8(*v),
            FieldValue::U8(v) => buf.put_u8(*v),
            FieldValue::I16(v) => buf.put_i16(*v),
            FieldValue::U16(v) => buf.put_u16(*v),
            FieldValue::I32(v) => buf.put_i32(*v),
            FieldValue::U32(v) => buf.put_u32(*v),
            FieldValue::I64(v) => buf.put_i64(*v),
            FieldValue::F32(v) => buf.put_f32(*v),
            FieldValue::F64(v) => buf.put_f64(*v),
            FieldValue::Decimal { scale, value } => {
                buf.put_u8(*scale);
                buf.put_u32(*value);
            }
            FieldValue::LongString(v) | FieldValue::ByteArray(v) => wire::write_long_str(buf, v)?,
            FieldValue::Array(values) => {
                let mut inner = BytesMut::new();
                for value in values {
                    value.write(&mut inner)?;
                }
                wire::write_long_str(buf, &inner)?;
            }
            FieldValue::Timestamp(v) => buf.put_u64(*v),
            FieldValue::Table(table) => write_table(buf, table)?,
            FieldValue::Void => {}
        }
        Ok(())
    }

    pub fn read(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let tag = wire::read_u8(buf)?;
        let value = match tag {
            b't' => FieldValue::Bool(wire::read_u8(buf)? != 0),
            b'b' => FieldValue::I8(wire::read_u8(buf)? as i8),
            b'B' => FieldValue::U8(wire::read_u8(buf)?),
            b's' => FieldValue::I16(wire::read_u16(buf)? as i16),
            b'u' => FieldValue::U16(wire::read_u16(buf)?),
            b'I' => FieldValue::I32(wire::read_u32(buf)? as i32),
            b'i' => FieldValue::U32(wire::read_u32(buf)?),
            b'l' => FieldValue::I64(wire::read_u64(buf)? as i64),
            b'f' => {
                ensure(buf, 4)?;
                FieldValue::F32(buf.get_f32())
            }
            b'd' => {
                ensure(buf, 8)?;
                FieldValue::F64(buf.get_f64())
            }
            b'D' => FieldValue::Decimal {
                scale: wire::read_u8(buf)?,
                value: wire::read_u32(buf)?,
            },
            b'S' => FieldValue::LongString(wire::read_long_str(buf)?),
            b'A' => {
                let mut inner = wire::read_long_str(buf)?;
                let mut values = Vec::new();
                while inner.has_remaining() {
                    values.push(FieldValue::read(&mut inner)?);
                }
                FieldValue::Array(values)
            }
            b'T' => FieldValue::Timestamp(wire::read_u64(buf)?),
            b'F' => FieldValue::Table(read_table(buf)?),
            b'x' => FieldValue::ByteArray(wire::read_long_str(buf)?),
            b'V' => FieldValue::Void,
            other => return Err(ProtocolError::UnknownFieldType(other)),
        };
        Ok(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::LongString(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::LongString(Bytes::from(value))
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::I32(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::I64(value)
    }
}

impl From<FieldTable> for FieldValue {
    fn from(value: FieldTable) -> Self {
        FieldValue::Table(value)
    }
}

/// Writes a table as a u32 byte length followed by name/value pairs.
pub fn write_table(buf: &mut BytesMut, table: &FieldTable) -> Result<(), ProtocolError> {
    let mut inner = BytesMut::new();
    for (name, value) in table {
        wire::write_short_str(&mut inner, name)?;
        value.write(&mut inner)?;
    }
    wire::write_long_str(buf, &inner)
}

pub fn read_table(buf: &mut Bytes) -> Result<FieldTable, ProtocolError> {
    let mut inner = wire::read_long_str(buf)?;
    let mut table = FieldTable::new();
    while inner.has_remaining() {
        let name = wire::read_short_str(&mut inner)?;
        let value = FieldValue::read(&mut inner)?;
        table.insert(name, value);
    }
    Ok(table)
}
