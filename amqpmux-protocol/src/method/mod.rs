//! AMQP method identifiers, argument codecs and the `Method` variant type.
//!
//! A method payload starts with a 4-byte id (class id in the high half,
//! method index in the low half) followed by the method arguments. Each
//! method struct implements [`MethodArgs`] for its arguments and
//! [`MethodKind`] for its static metadata: id, whether content follows and
//! in which direction it may travel.

use crate::error::ProtocolError;
use crate::registry::MethodRegistryBuilder;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Declares a method without arguments.
macro_rules! empty_method {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl $crate::method::MethodArgs for $name {
            fn read(_: &mut ::bytes::Bytes) -> Result<Self, $crate::error::ProtocolError> {
                Ok($name)
            }

            fn write(&self, _: &mut ::bytes::BytesMut) -> Result<(), $crate::error::ProtocolError> {
                Ok(())
            }
        }
    };
}

mod basic;
mod channel;
mod confirm;
mod connection;
mod exchange;
mod queue;

pub use basic::*;
pub use channel::*;
pub use confirm::*;
pub use connection::*;
pub use exchange::*;
pub use queue::*;

/// Numeric method identifier: `class_id << 16 | method_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u32);

impl MethodId {
    pub const fn new(class_id: u16, method_index: u16) -> Self {
        Self(((class_id as u32) << 16) | method_index as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn class_id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn method_index(self) -> u16 {
        self.0 as u16
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_id(), self.method_index())
    }
}

/// Which way a method may travel, seen from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to broker only.
    Send,
    /// Broker to client only.
    Receive,
    Both,
}

impl Direction {
    pub fn can_send(self) -> bool {
        matches!(self, Direction::Send | Direction::Both)
    }

    pub fn can_receive(self) -> bool {
        matches!(self, Direction::Receive | Direction::Both)
    }

    /// The same direction seen from the other peer.
    pub fn reversed(self) -> Self {
        match self {
            Direction::Send => Direction::Receive,
            Direction::Receive => Direction::Send,
            Direction::Both => Direction::Both,
        }
    }
}

/// Wire codec for a method's arguments (the payload after the method id).
pub trait MethodArgs: Sized {
    fn read(buf: &mut Bytes) -> Result<Self, ProtocolError>;
    fn write(&self, buf: &mut BytesMut) -> Result<(), ProtocolError>;
}

/// Static metadata tying a method struct to its [`Method`] variant.
pub trait MethodKind: MethodArgs + Into<Method> + Send + Sync + 'static {
    const ID: MethodId;
    const NAME: &'static str;
    const HAS_CONTENT: bool;
    const DIRECTION: Direction;

    /// Borrows the struct out of a [`Method`] of the same kind.
    fn from_method(method: &Method) -> Option<&Self>;

    /// Unwraps a [`Method`] of the same kind, handing it back otherwise.
    fn try_from_method(method: Method) -> Result<Self, Method>;
}

/// Marker for methods the client may send.
pub trait OutgoingMethod: MethodKind {}

/// Marker for methods the client may receive.
pub trait IncomingMethod: MethodKind {}

macro_rules! direction {
    (send) => {
        Direction::Send
    };
    (recv) => {
        Direction::Receive
    };
    (both) => {
        Direction::Both
    };
}

macro_rules! direction_marker {
    (send, $ty:ident) => {
        impl OutgoingMethod for $ty {}
    };
    (recv, $ty:ident) => {
        impl IncomingMethod for $ty {}
    };
    (both, $ty:ident) => {
        impl OutgoingMethod for $ty {}
        impl IncomingMethod for $ty {}
    };
}

macro_rules! methods {
    ($( $variant:ident($ty:ident) = ($class:literal, $index:literal), $name:literal, $dir:ident, content: $content:literal; )*) => {
        /// Any AMQP method known to this crate.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Method {
            $( $variant($ty), )*
        }

        impl Method {
            pub fn id(&self) -> MethodId {
                match self {
                    $( Method::$variant(_) => <$ty as MethodKind>::ID, )*
                }
            }

            /// Protocol name, e.g. `basic.publish`.
            pub fn name(&self) -> &'static str {
                match self {
                    $( Method::$variant(_) => <$ty as MethodKind>::NAME, )*
                }
            }

            /// Whether a content header and body follow this method.
            pub fn has_content(&self) -> bool {
                match self {
                    $( Method::$variant(_) => <$ty as MethodKind>::HAS_CONTENT, )*
                }
            }

            pub fn direction(&self) -> Direction {
                match self {
                    $( Method::$variant(_) => <$ty as MethodKind>::DIRECTION, )*
                }
            }

            /// Writes the arguments only, without the method id.
            pub fn write_args(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
                match self {
                    $( Method::$variant(args) => args.write(buf), )*
                }
            }
        }

        $(
            impl From<$ty> for Method {
                fn from(args: $ty) -> Self {
                    Method::$variant(args)
                }
            }

            impl MethodKind for $ty {
                const ID: MethodId = MethodId::new($class, $index);
                const NAME: &'static str = $name;
                const HAS_CONTENT: bool = $content;
                const DIRECTION: Direction = direction!($dir);

                fn from_method(method: &Method) -> Option<&Self> {
                    match method {
                        Method::$variant(args) => Some(args),
                        _ => None,
                    }
                }

                fn try_from_method(method: Method) -> Result<Self, Method> {
                    match method {
                        Method::$variant(args) => Ok(args),
                        other => Err(other),
                    }
                }
            }

            direction_marker!($dir, $ty);
        )*

        /// Registers every method declared above.
        pub(crate) fn register_all(builder: MethodRegistryBuilder) -> MethodRegistryBuilder {
            builder $( .register::<$ty>() )*
        }
    };
}

methods! {
    ConnectionStart(ConnectionStart) = (10, 10), "connection.start", recv, content: false;
    ConnectionStartOk(ConnectionStartOk) = (10, 11), "connection.start-ok", send, content: false;
    ConnectionSecure(ConnectionSecure) = (10, 20), "connection.secure", recv, content: false;
    ConnectionSecureOk(ConnectionSecureOk) = (10, 21), "connection.secure-ok", send, content: false;
    ConnectionTune(ConnectionTune) = (10, 30), "connection.tune", recv, content: false;
    ConnectionTuneOk(ConnectionTuneOk) = (10, 31), "connection.tune-ok", send, content: false;
    ConnectionOpen(ConnectionOpen) = (10, 40), "connection.open", send, content: false;
    ConnectionOpenOk(ConnectionOpenOk) = (10, 41), "connection.open-ok", recv, content: false;
    ConnectionClose(ConnectionClose) = (10, 50), "connection.close", both, content: false;
    ConnectionCloseOk(ConnectionCloseOk) = (10, 51), "connection.close-ok", both, content: false;
    ConnectionBlocked(ConnectionBlocked) = (10, 60), "connection.blocked", recv, content: false;
    ConnectionUnblocked(ConnectionUnblocked) = (10, 61), "connection.unblocked", recv, content: false;

    ChannelOpen(ChannelOpen) = (20, 10), "channel.open", send, content: false;
    ChannelOpenOk(ChannelOpenOk) = (20, 11), "channel.open-ok", recv, content: false;
    ChannelFlow(ChannelFlow) = (20, 20), "channel.flow", both, content: false;
    ChannelFlowOk(ChannelFlowOk) = (20, 21), "channel.flow-ok", both, content: false;
    ChannelClose(ChannelClose) = (20, 40), "channel.close", both, content: false;
    ChannelCloseOk(ChannelCloseOk) = (20, 41), "channel.close-ok", both, content: false;

    ExchangeDeclare(ExchangeDeclare) = (40, 10), "exchange.declare", send, content: false;
    ExchangeDeclareOk(ExchangeDeclareOk) = (40, 11), "exchange.declare-ok", recv, content: false;
    ExchangeDelete(ExchangeDelete) = (40, 20), "exchange.delete", send, content: false;
    ExchangeDeleteOk(ExchangeDeleteOk) = (40, 21), "exchange.delete-ok", recv, content: false;
    ExchangeBind(ExchangeBind) = (40, 30), "exchange.bind", send, content: false;
    ExchangeBindOk(ExchangeBindOk) = (40, 31), "exchange.bind-ok", recv, content: false;
    ExchangeUnbind(ExchangeUnbind) = (40, 40), "exchange.unbind", send, content: false;
    ExchangeUnbindOk(ExchangeUnbindOk) = (40, 51), "exchange.unbind-ok", recv, content: false;

    QueueDeclare(QueueDeclare) = (50, 10), "queue.declare", send, content: false;
    QueueDeclareOk(QueueDeclareOk) = (50, 11), "queue.declare-ok", recv, content: false;
    QueueBind(QueueBind) = (50, 20), "queue.bind", send, content: false;
    QueueBindOk(QueueBindOk) = (50, 21), "queue.bind-ok", recv, content: false;
    QueuePurge(QueuePurge) = (50, 30), "queue.purge", send, content: false;
    QueuePurgeOk(QueuePurgeOk) = (50, 31), "queue.purge-ok", recv, content: false;
    QueueDelete(QueueDelete) = (50, 40), "queue.delete", send, content: false;
    QueueDeleteOk(QueueDeleteOk) = (50, 41), "queue.delete-ok", recv, content: false;
    QueueUnbind(QueueUnbind) = (50, 50), "queue.unbind", send, content: false;
    QueueUnbindOk(QueueUnbindOk) = (50, 51), "queue.unbind-ok", recv, content: false;

    BasicQos(BasicQos) = (60, 10), "basic.qos", send, content: false;
    BasicQosOk(BasicQosOk) = (60, 11), "basic.qos-ok", recv, content: false;
    BasicConsume(BasicConsume) = (60, 20), "basic.consume", send, content: false;
    BasicConsumeOk(BasicConsumeOk) = (60, 21), "basic.consume-ok", recv, content: false;
    BasicCancel(BasicCancel) = (60, 30), "basic.cancel", both, content: false;
    BasicCancelOk(BasicCancelOk) = (60, 31), "basic.cancel-ok", both, content: false;
    BasicPublish(BasicPublish) = (60, 40), "basic.publish", send, content: true;
    BasicReturn(BasicReturn) = (60, 50), "basic.return", recv, content: true;
    BasicDeliver(BasicDeliver) = (60, 60), "basic.deliver", recv, content: true;
    BasicAck(BasicAck) = (60, 80), "basic.ack", both, content: false;
    BasicReject(BasicReject) = (60, 90), "basic.reject", send, content: false;
    BasicNack(BasicNack) = (60, 120), "basic.nack", both, content: false;

    ConfirmSelect(ConfirmSelect) = (85, 10), "confirm.select", send, content: false;
    ConfirmSelectOk(ConfirmSelectOk) = (85, 11), "confirm.select-ok", recv, content: false;
}

impl Method {
    /// Encodes the method id followed by the arguments, ignoring direction.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u32(self.id().raw());
        self.write_args(buf)
    }

    /// Reply code, text and failed method when this is a close method.
    pub fn as_close(&self) -> Option<(u16, &str, Option<MethodId>)> {
        match self {
            Method::ConnectionClose(close) => Some((
                close.reply_code,
                close.reply_text.as_str(),
                close.failed_method(),
            )),
            Method::ChannelClose(close) => Some((
                close.reply_code,
                close.reply_text.as_str(),
                close.failed_method(),
            )),
            _ => None,
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Method::ConnectionClose(_) | Method::ChannelClose(_))
    }

    pub fn is_close_ok(&self) -> bool {
        matches!(self, Method::ConnectionCloseOk(_) | Method::ChannelCloseOk(_))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: MethodKind + fmt::Debug + PartialEq>(args: T) {
        let mut buf = BytesMut::new();
        args.write(&mut buf).unwrap();
        let mut bytes = buf.freeze();
        let decoded = T::read(&mut bytes).unwrap();
        assert!(bytes.is_empty(), "{} left {} bytes", T::NAME, bytes.len());
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_method_id_parts() {
        let id = MethodId::new(60, 120);
        assert_eq!(id.class_id(), 60);
        assert_eq!(id.method_index(), 120);
        assert_eq!(id.raw(), 0x003C_0078);
        assert_eq!(id.to_string(), "60.120");
        assert_eq!(MethodId::from_raw(id.raw()), id);
    }

    #[test]
    fn test_method_metadata() {
        let publish: Method = BasicPublish::new("amq.direct", "jobs").into();
        assert_eq!(publish.id(), MethodId::new(60, 40));
        assert_eq!(publish.name(), "basic.publish");
        assert!(publish.has_content());
        assert_eq!(publish.direction(), Direction::Send);

        assert!(<BasicDeliver as MethodKind>::HAS_CONTENT);
        assert!(<BasicReturn as MethodKind>::HAS_CONTENT);
        assert!(!<BasicAck as MethodKind>::HAS_CONTENT);
        assert_eq!(<ChannelClose as MethodKind>::DIRECTION, Direction::Both);
        assert_eq!(<ExchangeUnbindOk as MethodKind>::ID, MethodId::new(40, 51));
    }

    #[test]
    fn test_direction_helpers() {
        assert!(Direction::Send.can_send());
        assert!(!Direction::Send.can_receive());
        assert!(Direction::Both.can_send() && Direction::Both.can_receive());
        assert_eq!(Direction::Receive.reversed(), Direction::Send);
    }

    #[test]
    fn test_try_from_method() {
        let method: Method = ChannelOpenOk::default().into();
        assert!(ChannelOpenOk::from_method(&method).is_some());
        assert!(ChannelCloseOk::from_method(&method).is_none());

        let back = ChannelCloseOk::try_from_method(method.clone()).unwrap_err();
        assert_eq!(back, method);
    }

    #[test]
    fn test_encode_includes_id() {
        let mut buf = BytesMut::new();
        Method::from(ChannelOpen::default()).encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 20, 0, 10, 0]);
    }

    #[test]
    fn test_close_accessors() {
        let method: Method =
            ChannelClose::new(404, "NOT_FOUND - no queue 'q'", Some(QueueDeclare::ID)).into();
        let (code, text, failed) = method.as_close().unwrap();
        assert_eq!(code, 404);
        assert!(text.starts_with("NOT_FOUND"));
        assert_eq!(failed, Some(MethodId::new(50, 10)));
        assert!(method.is_close());
        assert!(!method.is_close_ok());

        let method: Method = ConnectionClose::new(320, "CONNECTION_FORCED", None).into();
        assert_eq!(method.as_close().unwrap().2, None);
    }

    #[test]
    fn test_argument_roundtrips() {
        let mut props = crate::FieldTable::new();
        props.insert("product".into(), "RabbitMQ".into());

        roundtrip(ConnectionStart {
            version_major: 0,
            version_minor: 9,
            server_properties: props.clone(),
            mechanisms: "PLAIN AMQPLAIN".into(),
            locales: "en_US".into(),
        });
        roundtrip(ConnectionStartOk {
            client_properties: props.clone(),
            mechanism: "PLAIN".into(),
            response: Bytes::from_static(b"\0guest\0guest"),
            locale: "en_US".into(),
        });
        roundtrip(ConnectionTune {
            channel_max: 2047,
            frame_max: 131072,
            heartbeat: 60,
        });
        roundtrip(ConnectionOpen::new("/"));
        roundtrip(ConnectionClose::new(200, "bye", None));
        roundtrip(ConnectionBlocked {
            reason: "low on memory".into(),
        });
        roundtrip(ChannelFlow { active: false });
        roundtrip(ChannelOpenOk::default());
        roundtrip(ExchangeDeclare::new("logs", "fanout").durable(true));
        roundtrip(ExchangeBind::new("dst", "src", "#"));
        roundtrip(QueueDeclare::new("jobs").durable(true).exclusive(true));
        roundtrip(QueueDeclareOk {
            queue: "jobs".into(),
            message_count: 3,
            consumer_count: 1,
        });
        roundtrip(QueueBind::new("jobs", "amq.topic", "jobs.*"));
        roundtrip(QueueUnbind::new("jobs", "amq.topic", "jobs.*"));
        roundtrip(QueueDelete::new("jobs").if_empty(true));
        roundtrip(BasicQos::new(10));
        roundtrip(BasicConsume::new("jobs", "ctag-1").no_ack(true));
        roundtrip(BasicPublish::new("", "jobs").mandatory(true));
        roundtrip(BasicReturn {
            reply_code: 312,
            reply_text: "NO_ROUTE".into(),
            exchange: "amq.direct".into(),
            routing_key: "nowhere".into(),
        });
        roundtrip(BasicDeliver {
            consumer_tag: "ctag-1".into(),
            delivery_tag: u64::MAX,
            redelivered: true,
            exchange: "".into(),
            routing_key: "jobs".into(),
        });
        roundtrip(BasicNack {
            delivery_tag: 7,
            multiple: true,
            requeue: false,
        });
        roundtrip(ConfirmSelect { no_wait: false });
    }

    #[test]
    fn test_bit_fields_share_one_octet() {
        let mut buf = BytesMut::new();
        QueueDeclare::new("q")
            .durable(true)
            .auto_delete(true)
            .write(&mut buf)
            .unwrap();
        // ticket, "q", bits, empty arguments table
        assert_eq!(&buf[..], &[0, 0, 1, b'q', 0b0000_1010, 0, 0, 0, 0]);
    }
}
