//! Client error types.

use crate::config::ConfigError;
use amqpmux_protocol::{reply, MethodId};
use std::sync::Arc;
use thiserror::Error;

/// Why a channel or connection reached its terminal state.
///
/// Cloned into every waiter of the failed scope, so all of them observe the
/// same underlying error.
#[derive(Debug, Clone, Error)]
pub enum CloseReason {
    #[error("closed by client")]
    Local,

    #[error("channel closed by broker: {code} {text}")]
    ChannelClosed {
        code: u16,
        text: String,
        failed_method: Option<MethodId>,
    },

    #[error("connection closed by broker: {code} {text}")]
    ConnectionClosed {
        code: u16,
        text: String,
        failed_method: Option<MethodId>,
    },

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("protocol violation ({code}): {message}")]
    Protocol { code: u16, message: String },

    #[error("method {0} not processed by any handler")]
    Unhandled(MethodId),

    #[error("missed heartbeats from broker")]
    HeartbeatTimeout,

    #[error("connection dropped")]
    ConnectionDropped,
}

impl CloseReason {
    pub(crate) fn protocol(code: u16, message: impl Into<String>) -> Self {
        CloseReason::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Reply code to report to the broker when this reason closes a scope
    /// locally.
    pub fn reply_code(&self) -> u16 {
        match self {
            CloseReason::Local => reply::SUCCESS,
            CloseReason::ChannelClosed { code, .. } | CloseReason::ConnectionClosed { code, .. } => {
                *code
            }
            CloseReason::Protocol { code, .. } => *code,
            CloseReason::Unhandled(_) => reply::NOT_IMPLEMENTED,
            CloseReason::Io(_) | CloseReason::HeartbeatTimeout | CloseReason::ConnectionDropped => {
                reply::INTERNAL_ERROR
            }
        }
    }

    /// The method the close refers to, if any.
    pub fn failed_method(&self) -> Option<MethodId> {
        match self {
            CloseReason::ChannelClosed { failed_method, .. }
            | CloseReason::ConnectionClosed { failed_method, .. } => *failed_method,
            CloseReason::Unhandled(id) => Some(*id),
            _ => None,
        }
    }

    /// Whether the broker initiated the close.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            CloseReason::ChannelClosed { .. } | CloseReason::ConnectionClosed { .. }
        )
    }
}

impl From<std::io::Error> for CloseReason {
    fn from(e: std::io::Error) -> Self {
        CloseReason::Io(Arc::new(e))
    }
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] amqpmux_protocol::ProtocolError),

    #[error("{0}")]
    Closed(#[from] CloseReason),

    #[error("operation timed out")]
    Timeout,

    #[error("channel {0} already has a pending correlated wait")]
    WaitInProgress(u16),

    #[error("channel {0} is not open")]
    ChannelNotOpen(u16),

    #[error("channel {0} is already registered")]
    ChannelInUse(u16),

    #[error("no free channel number (channel-max {0})")]
    ChannelLimitReached(u16),

    #[error("method {0} {1} content")]
    ContentMismatch(MethodId, &'static str),

    #[error("unexpected method {actual}, expected {expected}")]
    UnexpectedMethod { expected: MethodId, actual: MethodId },

    #[error("auth mechanism {mechanism} not offered by broker (offered: {offered})")]
    AuthMechanismUnsupported { mechanism: String, offered: String },

    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("could not connect to any endpoint: {0}")]
    ConnectFailed(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Returns whether retrying the operation (on a new connection or
    /// channel) may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectFailed(_) => true,
            ClientError::Closed(reason) => matches!(
                reason,
                CloseReason::Io(_)
                    | CloseReason::HeartbeatTimeout
                    | CloseReason::ConnectionClosed {
                        code: reply::CONNECTION_FORCED,
                        ..
                    }
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_codes() {
        assert_eq!(CloseReason::Local.reply_code(), 200);
        assert_eq!(
            CloseReason::Unhandled(MethodId::new(60, 60)).reply_code(),
            reply::NOT_IMPLEMENTED
        );
        assert_eq!(
            CloseReason::protocol(reply::UNEXPECTED_FRAME, "body before header").reply_code(),
            505
        );
        let remote = CloseReason::ChannelClosed {
            code: 404,
            text: "NOT_FOUND".into(),
            failed_method: Some(MethodId::new(50, 10)),
        };
        assert_eq!(remote.reply_code(), 404);
        assert_eq!(remote.failed_method(), Some(MethodId::new(50, 10)));
        assert!(remote.is_remote());
        assert!(!CloseReason::HeartbeatTimeout.is_remote());
    }

    #[test]
    fn test_close_reason_display() {
        let reason = CloseReason::Unhandled(MethodId::new(60, 60));
        assert!(reason.to_string().contains("60.60"));

        let err = ClientError::from(CloseReason::ConnectionClosed {
            code: 320,
            text: "CONNECTION_FORCED - shutdown".into(),
            failed_method: None,
        });
        assert!(err.to_string().contains("320"));
    }

    #[test]
    fn test_retryable() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::Closed(CloseReason::HeartbeatTimeout).is_retryable());
        assert!(ClientError::Closed(CloseReason::ConnectionClosed {
            code: 320,
            text: String::new(),
            failed_method: None,
        })
        .is_retryable());
        assert!(!ClientError::Closed(CloseReason::ChannelClosed {
            code: 406,
            text: String::new(),
            failed_method: None,
        })
        .is_retryable());
        assert!(!ClientError::WaitInProgress(1).is_retryable());
    }
}
