//! # amqpmux-client
//!
//! AMQP 0-9-1 client core for amqpmux.
//!
//! This crate provides:
//! - One socket multiplexed into independent logical channels
//! - Per-channel content reassembly and ordered handler dispatch
//! - Correlated request/response over a channel
//! - Connection negotiation, heartbeats and failure propagation
//! - A pooled frame buffer allocator shared by all channels

pub mod auth;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod connection;
pub mod content;
pub mod error;
pub mod handler;
mod io;
mod pool;
mod rpc;

#[cfg(test)]
mod testing;

pub use auth::{AuthMechanism, ExternalAuth, PlainAuth};
pub use buffer::BufferPool;
pub use channel::{Channel, ChannelState};
pub use config::{ConfigError, ConnectionConfig};
pub use connection::{Connection, ConnectionState, Tuning};
pub use content::{Content, ContentBody};
pub use error::{ClientError, CloseReason};
pub use handler::{Delivery, FrameHandler, HandlerId, Subscription};
pub use rpc::PendingResponse;
