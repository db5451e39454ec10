//! Frame handlers attached to a channel.
//!
//! Handlers are tried in registration order for every incoming method that
//! is not a close, a flow request or the answer to a pending correlated
//! wait. The first handler returning `true` stops the chain.

use crate::content::Content;
use amqpmux_protocol::{Method, MethodId};
use tokio::sync::mpsc;

/// Something that may claim an incoming method.
pub trait FrameHandler: Send + Sync {
    /// Returns `true` when the method was handled.
    fn try_handle(&self, method: &Method, content: Option<&Content>) -> bool;
}

impl<F> FrameHandler for F
where
    F: Fn(&Method, Option<&Content>) -> bool + Send + Sync,
{
    fn try_handle(&self, method: &Method, content: Option<&Content>) -> bool {
        self(method, content)
    }
}

/// Identifies a registered handler for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// A method, with its content when it carries one, forwarded to a
/// subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub method: Method,
    pub content: Option<Content>,
}

/// Forwards methods with matching ids into an unbounded queue.
pub(crate) struct Forwarder {
    ids: Vec<MethodId>,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl Forwarder {
    pub(crate) fn new(ids: &[MethodId]) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                ids: ids.to_vec(),
                tx,
            },
            rx,
        )
    }
}

impl FrameHandler for Forwarder {
    fn try_handle(&self, method: &Method, content: Option<&Content>) -> bool {
        if !self.ids.contains(&method.id()) {
            return false;
        }
        // A dropped receiver leaves the method unhandled.
        self.tx
            .send(Delivery {
                method: method.clone(),
                content: content.cloned(),
            })
            .is_ok()
    }
}

/// Receiving end of [`Channel::subscribe`](crate::Channel::subscribe).
///
/// Yields `None` once the channel is closed.
#[derive(Debug)]
pub struct Subscription {
    id: HandlerId,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub(crate) fn new(id: HandlerId, rx: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self { id, rx }
    }

    /// The handler id, usable with
    /// [`Channel::remove_handler`](crate::Channel::remove_handler).
    pub fn handler_id(&self) -> HandlerId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }
}
