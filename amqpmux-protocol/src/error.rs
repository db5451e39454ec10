//! Protocol error types.

use crate::method::MethodId;
use thiserror::Error;

/// Errors raised while encoding or decoding AMQP frames, content headers
/// and methods.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame type: {0}")]
    MalformedFrame(u8),

    #[error("invalid frame end marker: expected 0xce, got {0:#04x}")]
    InvalidFrameEnd(u8),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("unexpected end of payload: need {needed} more bytes")]
    UnexpectedEof { needed: usize },

    #[error("short string too long: {0} bytes (max 255)")]
    ShortStringTooLong(usize),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("unknown field value type: {0:#04x}")]
    UnknownFieldType(u8),

    #[error("unsupported property flags: {0:#06x}")]
    InvalidPropertyFlags(u16),

    #[error("method {0} is not registered")]
    UnknownMethod(MethodId),

    #[error("method {0} cannot be received")]
    NotIncoming(MethodId),

    #[error("method {0} cannot be sent")]
    NotOutgoing(MethodId),

    #[error("method mismatch: expected {expected}, got {actual}")]
    MethodMismatch {
        expected: MethodId,
        actual: MethodId,
    },

    #[error("{0} trailing bytes after method {1}")]
    TrailingBytes(usize, MethodId),

    #[error("method registry is empty")]
    EmptyRegistry,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::MalformedFrame(11);
        assert!(err.to_string().contains("11"));

        let err = ProtocolError::InvalidFrameEnd(0xAB);
        assert!(err.to_string().contains("0xab"));

        let err = ProtocolError::FrameTooLarge {
            size: 100,
            max: 50,
        };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::UnknownMethod(MethodId::new(60, 60));
        assert!(err.to_string().contains("60.60"));

        let err = ProtocolError::MethodMismatch {
            expected: MethodId::new(20, 11),
            actual: MethodId::new(20, 40),
        };
        let msg = err.to_string();
        assert!(msg.contains("20.11") && msg.contains("20.40"));

        let err = ProtocolError::ShortStringTooLong(300);
        assert!(err.to_string().contains("300"));

        let err = ProtocolError::InvalidUtf8;
        assert!(err.to_string().contains("UTF-8"));
    }
}
