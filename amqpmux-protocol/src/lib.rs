//! # amqpmux-protocol
//!
//! AMQP 0-9-1 wire protocol implementation for amqpmux.
//!
//! This crate provides:
//! - The generic frame envelope (type, channel, length, payload, frame-end)
//! - Content headers with presence-bitmask encoded message properties
//! - Primitive and field-table codecs
//! - Method types and an immutable method registry mapping ids to
//!   parsers and formatters

pub mod codec;
pub mod error;
pub mod field;
pub mod frame;
pub mod method;
pub mod properties;
pub mod registry;
pub mod wire;

pub use codec::{FrameDecoder, FrameEncoder};
pub use error::ProtocolError;
pub use field::{FieldTable, FieldValue};
pub use frame::{Frame, FrameHeader, FrameType};
pub use method::{Direction, IncomingMethod, Method, MethodArgs, MethodId, MethodKind, OutgoingMethod};
pub use properties::{ContentHeader, MessageProperties};
pub use registry::{MethodRegistration, MethodRegistry, MethodRegistryBuilder, Role};

/// Bytes sent by the client before any framed traffic.
pub const PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x00\x09\x01";

/// Marker byte terminating every frame.
pub const FRAME_END: u8 = 0xCE;

/// Size of the frame header (type + channel + payload length).
pub const FRAME_HEADER_SIZE: usize = 7;

/// Bytes each frame adds on top of its payload (header + frame-end).
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + 1;

/// Smallest frame size a peer may negotiate; also used before tuning.
pub const FRAME_MIN_SIZE: u32 = 4096;

/// Frame size proposed by default (128 KiB).
pub const DEFAULT_FRAME_MAX: u32 = 128 * 1024;

/// Default broker port.
pub const DEFAULT_PORT: u16 = 5672;

/// Channel number reserved for connection-control methods.
pub const CONTROL_CHANNEL: u16 = 0;

/// Class id carried in content headers (basic class).
pub const BASIC_CLASS_ID: u16 = 60;

/// Reply codes used in close methods.
pub mod reply {
    pub const SUCCESS: u16 = 200;
    pub const CONTENT_TOO_LARGE: u16 = 311;
    pub const NO_ROUTE: u16 = 312;
    pub const NO_CONSUMERS: u16 = 313;
    pub const CONNECTION_FORCED: u16 = 320;
    pub const INVALID_PATH: u16 = 402;
    pub const ACCESS_REFUSED: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const RESOURCE_LOCKED: u16 = 405;
    pub const PRECONDITION_FAILED: u16 = 406;
    pub const FRAME_ERROR: u16 = 501;
    pub const SYNTAX_ERROR: u16 = 502;
    pub const COMMAND_INVALID: u16 = 503;
    pub const CHANNEL_ERROR: u16 = 504;
    pub const UNEXPECTED_FRAME: u16 = 505;
    pub const RESOURCE_ERROR: u16 = 506;
    pub const NOT_ALLOWED: u16 = 530;
    pub const NOT_IMPLEMENTED: u16 = 540;
    pub const INTERNAL_ERROR: u16 = 541;
}
