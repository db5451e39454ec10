//! SASL authentication mechanisms used during negotiation.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// An authentication mechanism: a SASL name plus a response for each
/// broker challenge. The first response is sent in start-ok with an empty
/// challenge; later ones answer `connection.secure`.
pub trait AuthMechanism: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn response(&self, challenge: &[u8]) -> Bytes;
}

/// `PLAIN`: `\0username\0password`.
#[derive(Clone)]
pub struct PlainAuth {
    username: String,
    password: String,
}

impl PlainAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for PlainAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl AuthMechanism for PlainAuth {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn response(&self, _challenge: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.username.len() + self.password.len());
        buf.put_u8(0);
        buf.put_slice(self.username.as_bytes());
        buf.put_u8(0);
        buf.put_slice(self.password.as_bytes());
        buf.freeze()
    }
}

/// `EXTERNAL`: identity comes from the transport (e.g. a client
/// certificate); the response is empty.
#[derive(Debug, Clone, Default)]
pub struct ExternalAuth;

impl AuthMechanism for ExternalAuth {
    fn name(&self) -> &str {
        "EXTERNAL"
    }

    fn response(&self, _challenge: &[u8]) -> Bytes {
        Bytes::new()
    }
}
