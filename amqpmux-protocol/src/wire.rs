//! Primitive AMQP data types: integers, short/long strings, bit packing.
//!
//! Readers take `&mut Bytes` and check the remaining length before every
//! read so that truncated payloads surface as
//! [`ProtocolError::UnexpectedEof`] instead of panicking. Writers append to
//! a `BytesMut`.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum length of a short string.
pub const SHORT_STRING_MAX: usize = u8::MAX as usize;

#[inline]
pub fn ensure(buf: &Bytes, len: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < len {
        return Err(ProtocolError::UnexpectedEof {
            needed: len - buf.remaining(),
        });
    }
    Ok(())
}

pub fn read_u8(buf: &mut Bytes) -> Result<u8, ProtocolError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut Bytes) -> Result<u16, ProtocolError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn read_u32(buf: &mut Bytes) -> Result<u32, ProtocolError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn read_u64(buf: &mut Bytes) -> Result<u64, ProtocolError> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

/// Reads `len` raw bytes without copying.
pub fn read_bytes(buf: &mut Bytes, len: usize) -> Result<Bytes, ProtocolError> {
    ensure(buf, len)?;
    Ok(buf.split_to(len))
}

/// Reads a length-prefixed (u8) UTF-8 string.
pub fn read_short_str(buf: &mut Bytes) -> Result<String, ProtocolError> {
    let len = read_u8(buf)? as usize;
    let raw = read_bytes(buf, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Reads a length-prefixed (u32) binary string.
pub fn read_long_str(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = read_u32(buf)? as usize;
    read_bytes(buf, len)
}

/// Reads a long string that must hold UTF-8 text.
pub fn read_long_text(buf: &mut Bytes) -> Result<String, ProtocolError> {
    let raw = read_long_str(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

pub fn write_short_str(buf: &mut BytesMut, value: &str) -> Result<(), ProtocolError> {
    if value.len() > SHORT_STRING_MAX {
        return Err(ProtocolError::ShortStringTooLong(value.len()));
    }
    buf.put_u8(value.len() as u8);
    buf.put_slice(value.as_bytes());
    Ok(())
}

pub fn write_long_str(buf: &mut BytesMut, value: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(value.len()).map_err(|_| ProtocolError::FrameTooLarge {
        size: value.len(),
        max: u32::MAX as usize,
    })?;
    buf.put_u32(len);
    buf.put_slice(value);
    Ok(())
}

/// Packs consecutive bit fields into one octet, first flag in bit 0.
pub fn pack_bits(flags: &[bool]) -> u8 {
    debug_assert!(flags.len() <= 8);
    flags
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, &set)| if set { acc | (1 << i) } else { acc })
}

/// Returns bit `index` of a packed octet.
#[inline]
pub fn bit(octet: u8, index: u8) -> bool {
    octet & (1 << index) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_str_roundtrip() {
        let mut buf = BytesMut::new();
        write_short_str(&mut buf, "amq.direct").unwrap();
        assert_eq!(buf[0], 10);

        let mut bytes = buf.freeze();
        assert_eq!(read_short_str(&mut bytes).unwrap(), "amq.direct");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_short_str_too_long() {
        let mut buf = BytesMut::new();
        let result = write_short_str(&mut buf, &"x".repeat(256));
        assert!(matches!(result, Err(ProtocolError::ShortStringTooLong(256))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_long_str_is_zero_copy() {
        let mut buf = BytesMut::new();
        write_long_str(&mut buf, b"\x00guest\x00guest").unwrap();
        let mut bytes = buf.freeze();
        let base = bytes.as_ptr() as usize;

        let value = read_long_str(&mut bytes).unwrap();
        assert_eq!(&value[..], b"\x00guest\x00guest");
        assert_eq!(value.as_ptr() as usize, base + 4);
    }

    #[test]
    fn test_truncated_reads() {
        let mut bytes = Bytes::from_static(&[0, 1]);
        assert!(matches!(
            read_u32(&mut bytes),
            Err(ProtocolError::UnexpectedEof { needed: 2 })
        ));

        let mut bytes = Bytes::from_static(&[5, b'a', b'b']);
        assert!(matches!(
            read_short_str(&mut bytes),
            Err(ProtocolError::UnexpectedEof { needed: 3 })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut bytes = Bytes::from_static(&[2, 0xFF, 0xFE]);
        assert!(matches!(
            read_short_str(&mut bytes),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_bit_packing() {
        let octet = pack_bits(&[true, false, true, true, false]);
        assert_eq!(octet, 0b0000_1101);
        assert!(bit(octet, 0));
        assert!(!bit(octet, 1));
        assert!(bit(octet, 2));
        assert!(bit(octet, 3));
        assert!(!bit(octet, 4));
    }
}
