//! Method registry: method id to parser, formatter and content metadata.
//!
//! The registry is built once and is immutable afterwards. It is shared by
//! reference (`Arc`) with every component that parses or formats methods.

use crate::error::ProtocolError;
use crate::method::{self, Direction, Method, MethodId, MethodKind};
use crate::wire;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// Parses method arguments (the payload after the id).
pub type MethodParser = fn(Bytes) -> Result<Method, ProtocolError>;

/// Writes method arguments (without the id).
pub type MethodFormatter = fn(&Method, &mut BytesMut) -> Result<(), ProtocolError>;

/// Which peer the registry serves. A server registry swaps the direction
/// of every method; it is used by tooling and test brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Client,
    Server,
}

/// Everything the registry knows about one method.
#[derive(Debug, Clone, Copy)]
pub struct MethodRegistration {
    pub id: MethodId,
    pub name: &'static str,
    pub has_content: bool,
    pub direction: Direction,
    parser: Option<MethodParser>,
    formatter: Option<MethodFormatter>,
}

impl MethodRegistration {
    pub fn can_parse(&self) -> bool {
        self.parser.is_some()
    }

    pub fn can_format(&self) -> bool {
        self.formatter.is_some()
    }
}

fn parse_as<T: MethodKind>(mut payload: Bytes) -> Result<Method, ProtocolError> {
    let args = T::read(&mut payload)?;
    if !payload.is_empty() {
        return Err(ProtocolError::TrailingBytes(payload.len(), T::ID));
    }
    Ok(args.into())
}

fn format_as<T: MethodKind>(method: &Method, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let args = T::from_method(method).ok_or(ProtocolError::MethodMismatch {
        expected: T::ID,
        actual: method.id(),
    })?;
    args.write(buf)
}

/// Collects registrations before freezing them into a [`MethodRegistry`].
#[derive(Debug, Default)]
pub struct MethodRegistryBuilder {
    role: Role,
    entries: HashMap<MethodId, MethodRegistration>,
}

impl MethodRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Registers `T`. Receivable methods get a parser, sendable methods a
    /// formatter. Registering the same method twice keeps the last entry.
    pub fn register<T: MethodKind>(mut self) -> Self {
        let direction = match self.role {
            Role::Client => T::DIRECTION,
            Role::Server => T::DIRECTION.reversed(),
        };

        let registration = MethodRegistration {
            id: T::ID,
            name: T::NAME,
            has_content: T::HAS_CONTENT,
            direction,
            parser: direction
                .can_receive()
                .then_some(parse_as::<T> as MethodParser),
            formatter: direction
                .can_send()
                .then_some(format_as::<T> as MethodFormatter),
        };
        self.entries.insert(T::ID, registration);
        self
    }

    /// Registers every method this crate defines.
    pub fn register_all(self) -> Self {
        method::register_all(self)
    }

    pub fn build(self) -> Result<MethodRegistry, ProtocolError> {
        if self.entries.is_empty() {
            return Err(ProtocolError::EmptyRegistry);
        }
        Ok(MethodRegistry {
            entries: self.entries,
        })
    }
}

/// Immutable lookup table from [`MethodId`] to codec functions.
#[derive(Debug, Clone)]
pub struct MethodRegistry {
    entries: HashMap<MethodId, MethodRegistration>,
}

impl MethodRegistry {
    pub fn builder() -> MethodRegistryBuilder {
        MethodRegistryBuilder::new()
    }

    /// Client registry with every known method.
    pub fn amqp() -> Self {
        Self::for_role(Role::Client)
    }

    pub fn for_role(role: Role) -> Self {
        let entries = MethodRegistryBuilder::new()
            .with_role(role)
            .register_all()
            .entries;
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn registration(&self, id: MethodId) -> Result<&MethodRegistration, ProtocolError> {
        self.entries.get(&id).ok_or(ProtocolError::UnknownMethod(id))
    }

    pub fn contains(&self, id: MethodId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn has_content(&self, id: MethodId) -> Result<bool, ProtocolError> {
        self.registration(id).map(|r| r.has_content)
    }

    /// Reads the method id at the start of a method frame payload.
    pub fn peek_id(payload: &[u8]) -> Result<MethodId, ProtocolError> {
        if payload.len() < 4 {
            return Err(ProtocolError::UnexpectedEof {
                needed: 4 - payload.len(),
            });
        }
        let raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        Ok(MethodId::from_raw(raw))
    }

    /// Parses a full method frame payload (id + arguments).
    pub fn parse(&self, mut payload: Bytes) -> Result<Method, ProtocolError> {
        let id = MethodId::from_raw(wire::read_u32(&mut payload)?);
        let registration = self.registration(id)?;
        let parser = registration.parser.ok_or(ProtocolError::NotIncoming(id))?;
        parser(payload)
    }

    /// Writes a full method frame payload (id + arguments).
    pub fn format(&self, method: &Method, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let id = method.id();
        let registration = self.registration(id)?;
        let formatter = registration.formatter.ok_or(ProtocolError::NotOutgoing(id))?;
        buf.put_u32(id.raw());
        formatter(method, buf)
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::amqp()
    }
}
