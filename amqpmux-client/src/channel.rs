//! Logical channels.
//!
//! Each channel has one dispatch task that consumes its inbound frames in
//! arrival order, reassembles content and hands every complete method to,
//! in turn: the close/flow logic, the pending correlated wait, then the
//! registered handlers. Sends take the channel's send lock for the whole
//! format-and-enqueue step.

use crate::buffer::{BufferPool, FrameBuilder};
use crate::content::{Content, ContentBody};
use crate::error::{ClientError, CloseReason};
use crate::handler::{FrameHandler, Forwarder, HandlerId, Subscription};
use crate::io::ChannelFrame;
use crate::pool::ChannelPool;
use crate::rpc::{PendingResponse, WaitSlot};
use amqpmux_protocol::method::{
    ChannelClose, ChannelCloseOk, ChannelFlowOk, ConnectionClose, ConnectionCloseOk,
};
use amqpmux_protocol::{
    reply, ContentHeader, IncomingMethod, MessageProperties, Method, MethodId, MethodKind,
    MethodRegistry, OutgoingMethod, ProtocolError, CONTROL_CHANNEL,
};
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};

/// Lifecycle of a channel. `Closed` is terminal.
#[derive(Debug, Clone)]
pub enum ChannelState {
    /// Waiting for `channel.open-ok`; only `channel.open` may be sent.
    Opening,
    Open,
    /// A close was sent and the channel waits for `close-ok`. Carries the
    /// failure that triggered it, `None` for a requested close.
    Closing(Option<CloseReason>),
    /// `None` after a requested close completed.
    Closed(Option<CloseReason>),
}

impl ChannelState {
    pub fn is_open(&self) -> bool {
        matches!(self, ChannelState::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelState::Closed(_))
    }

    fn reason(&self) -> Option<&CloseReason> {
        match self {
            ChannelState::Closing(reason) | ChannelState::Closed(reason) => reason.as_ref(),
            _ => None,
        }
    }
}

/// Per-connection resources shared by all channels.
pub(crate) struct ChannelContext {
    pub(crate) registry: Arc<MethodRegistry>,
    pub(crate) outbound: mpsc::Sender<BytesMut>,
    pub(crate) buffers: Arc<BufferPool>,
    pub(crate) frame_max: Arc<AtomicUsize>,
    pub(crate) pool: Weak<ChannelPool>,
}

pub(crate) struct ChannelInner {
    number: u16,
    ctx: Arc<ChannelContext>,
    state: watch::Sender<ChannelState>,
    send_lock: tokio::sync::Mutex<()>,
    waiter: Arc<WaitSlot>,
    handlers: RwLock<Vec<(HandlerId, Arc<dyn FrameHandler>)>>,
    next_handler_id: AtomicU64,
    flow_active: AtomicBool,
    /// Set once `finish` ran, before the number is released.
    terminal: AtomicBool,
}

impl ChannelInner {
    pub(crate) fn new(number: u16, ctx: Arc<ChannelContext>, initial: ChannelState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            number,
            ctx,
            state,
            send_lock: tokio::sync::Mutex::new(()),
            waiter: Arc::new(WaitSlot::new(number)),
            handlers: RwLock::new(Vec::new()),
            next_handler_id: AtomicU64::new(1),
            flow_active: AtomicBool::new(true),
            terminal: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }

    fn is_control(&self) -> bool {
        self.number == CONTROL_CHANNEL
    }

    pub(crate) fn set_open(&self) -> bool {
        self.state.send_if_modified(|state| match state {
            ChannelState::Opening => {
                *state = ChannelState::Open;
                true
            }
            _ => false,
        })
    }

    fn add_handler(&self, handler: Arc<dyn FrameHandler>) -> HandlerId {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, handler));
        id
    }

    // --- send path ---

    fn check_can_send(&self, method: &Method) -> Result<(), ClientError> {
        let state = self.state.borrow();
        let allowed = match &*state {
            ChannelState::Open => true,
            ChannelState::Opening => matches!(method, Method::ChannelOpen(_)),
            ChannelState::Closing(_) => method.is_close() || method.is_close_ok(),
            ChannelState::Closed(_) => false,
        };
        if allowed && !self.is_closed() {
            return Ok(());
        }
        Err(match state.reason() {
            Some(reason) if state.is_closed() => ClientError::Closed(reason.clone()),
            _ => ClientError::ChannelNotOpen(self.number),
        })
    }

    pub(crate) async fn send_method(
        &self,
        method: &Method,
        content: Option<(&MessageProperties, &[u8])>,
    ) -> Result<(), ClientError> {
        match (method.has_content(), content.is_some()) {
            (true, false) => return Err(ClientError::ContentMismatch(method.id(), "requires")),
            (false, true) => {
                return Err(ClientError::ContentMismatch(method.id(), "does not carry"))
            }
            _ => {}
        }

        let _guard = self.send_lock.lock().await;
        self.check_can_send(method)?;

        let buffers = {
            let frame_max = self.ctx.frame_max.load(Ordering::Acquire);
            let mut builder = FrameBuilder::new(&self.ctx.buffers, frame_max);
            builder.method(self.number, &self.ctx.registry, method)?;
            if let Some((properties, body)) = content {
                builder.content(self.number, properties, body)?;
            }
            builder.finish()
        };

        tracing::trace!("[ch {}] sending {}", self.number, method);
        self.enqueue(buffers).await
    }

    /// Sends bytes outside any frame (the protocol header).
    pub(crate) async fn send_raw(&self, bytes: &[u8]) -> Result<(), ClientError> {
        let _guard = self.send_lock.lock().await;
        let buffers = {
            let mut builder = FrameBuilder::new(&self.ctx.buffers, bytes.len());
            builder.raw(bytes);
            builder.finish()
        };
        self.enqueue(buffers).await
    }

    async fn enqueue(&self, buffers: Vec<BytesMut>) -> Result<(), ClientError> {
        for buf in buffers {
            self.ctx
                .outbound
                .send(buf)
                .await
                .map_err(|_| ClientError::Closed(CloseReason::ConnectionDropped))?;
        }
        Ok(())
    }

    // --- receive path ---

    async fn read_command(
        &self,
        payload: Bytes,
        inbound: &mut mpsc::UnboundedReceiver<ChannelFrame>,
    ) -> Result<(Method, Option<Content>), CloseReason> {
        let method = self.ctx.registry.parse(payload).map_err(parse_error)?;
        if !method.has_content() {
            return Ok((method, None));
        }

        let (body_size, mut header) = match inbound.recv().await {
            Some(ChannelFrame::Header { body_size, payload }) => (body_size, payload),
            Some(_) => {
                return Err(CloseReason::protocol(
                    reply::UNEXPECTED_FRAME,
                    format!("expected content header after {}", method.name()),
                ))
            }
            None => return Err(CloseReason::ConnectionDropped),
        };
        let header = ContentHeader::read(&mut header).map_err(parse_error)?;

        let mut body = ContentBody::new();
        while (body.len() as u64) < body_size {
            match inbound.recv().await {
                Some(ChannelFrame::Body(chunk)) => body.push(chunk),
                Some(_) => {
                    return Err(CloseReason::protocol(
                        reply::UNEXPECTED_FRAME,
                        format!(
                            "expected content body ({} of {} bytes received)",
                            body.len(),
                            body_size
                        ),
                    ))
                }
                None => return Err(CloseReason::ConnectionDropped),
            }
        }
        if body.len() as u64 > body_size {
            return Err(CloseReason::protocol(
                reply::UNEXPECTED_FRAME,
                format!(
                    "content body of {} bytes exceeds declared size {}",
                    body.len(),
                    body_size
                ),
            ));
        }

        Ok((
            method,
            Some(Content {
                properties: header.properties,
                body,
            }),
        ))
    }

    async fn dispatch(&self, method: Method, content: Option<Content>) {
        let closing = matches!(*self.state.borrow(), ChannelState::Closing(_));
        if closing && !method.is_close() && !method.is_close_ok() {
            tracing::trace!("[ch {}] closing, discarding {}", self.number, method);
            return;
        }

        match &method {
            Method::ChannelClose(_) | Method::ConnectionClose(_) => {
                self.on_remote_close(&method).await;
                return;
            }
            Method::ChannelCloseOk(_) | Method::ConnectionCloseOk(_) => {
                self.on_close_ok().await;
                return;
            }
            Method::ChannelFlow(flow) => {
                self.flow_active.store(flow.active, Ordering::Release);
                tracing::info!("[ch {}] flow active={}", self.number, flow.active);
                let reply: Method = ChannelFlowOk {
                    active: flow.active,
                }
                .into();
                if let Err(e) = self.send_method(&reply, None).await {
                    tracing::debug!("[ch {}] flow-ok not sent: {}", self.number, e);
                }
                return;
            }
            _ => {}
        }

        let method = match self.waiter.try_complete(method) {
            Ok(()) => return,
            Err(method) => method,
        };

        let handlers: Vec<Arc<dyn FrameHandler>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        if handlers
            .iter()
            .any(|handler| handler.try_handle(&method, content.as_ref()))
        {
            return;
        }

        tracing::warn!("[ch {}] {} not processed by any handler", self.number, method);
        self.fail(CloseReason::Unhandled(method.id())).await;
    }

    async fn on_remote_close(&self, method: &Method) {
        let Some((code, text, failed_method)) = method.as_close() else {
            return;
        };
        let remote = if matches!(method, Method::ConnectionClose(_)) {
            CloseReason::ConnectionClosed {
                code,
                text: text.to_string(),
                failed_method,
            }
        } else {
            CloseReason::ChannelClosed {
                code,
                text: text.to_string(),
                failed_method,
            }
        };
        tracing::warn!("[ch {}] {}", self.number, remote);

        // A failure already being reported locally stays the reason. When
        // our own close is in flight, the broker still owes its close-ok and
        // the number stays reserved until it arrives.
        let mut reason = remote;
        let mut awaiting_close_ok = false;
        self.state.send_if_modified(|state| match state {
            ChannelState::Closed(_) => false,
            ChannelState::Closing(Some(local)) => {
                reason = local.clone();
                awaiting_close_ok = true;
                false
            }
            ChannelState::Closing(None) => {
                *state = ChannelState::Closing(Some(reason.clone()));
                awaiting_close_ok = true;
                true
            }
            _ => {
                *state = ChannelState::Closing(Some(reason.clone()));
                true
            }
        });
        self.waiter.close(&reason);

        let close_ok: Method = if self.is_control() {
            ConnectionCloseOk.into()
        } else {
            ChannelCloseOk.into()
        };
        match self.send_method(&close_ok, None).await {
            Ok(()) if awaiting_close_ok => {
                tracing::debug!("[ch {}] close crossed, waiting for close-ok", self.number);
            }
            Ok(()) => self.finish(Some(reason)),
            Err(e) => {
                tracing::debug!("[ch {}] close-ok not sent: {}", self.number, e);
                self.finish(Some(reason));
            }
        }
    }

    async fn on_close_ok(&self) {
        let reason = match &*self.state.borrow() {
            ChannelState::Closing(reason) => Some(reason.clone()),
            _ => None,
        };
        match reason {
            Some(reason) => self.finish(reason),
            None => {
                self.fail(CloseReason::protocol(
                    reply::COMMAND_INVALID,
                    "close-ok without a pending close",
                ))
                .await
            }
        }
    }

    /// Fails the channel locally: pending and future waits get `reason`
    /// and a close carrying its reply code goes to the broker. The channel
    /// reaches `Closed` when the broker answers with close-ok.
    pub(crate) async fn fail(&self, reason: CloseReason) {
        let moved = self.state.send_if_modified(|state| match state {
            ChannelState::Opening | ChannelState::Open => {
                *state = ChannelState::Closing(Some(reason.clone()));
                true
            }
            _ => false,
        });
        if !moved {
            return;
        }

        tracing::warn!("[ch {}] failing: {}", self.number, reason);
        self.waiter.close(&reason);

        let close = self.close_method(reason.reply_code(), &reason.to_string(), reason.failed_method());
        if let Err(e) = self.send_method(&close, None).await {
            tracing::debug!("[ch {}] close not sent: {}", self.number, e);
            self.finish(Some(reason));
        }
    }

    fn close_method(&self, code: u16, text: &str, failed: Option<MethodId>) -> Method {
        // Short strings are capped at 255 bytes.
        let mut end = text.len().min(255);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let text = &text[..end];
        if self.is_control() {
            ConnectionClose::new(code, text, failed).into()
        } else {
            ChannelClose::new(code, text, failed).into()
        }
    }

    /// Moves to `Closed`, fails every wait and gives the number back.
    ///
    /// The number is released before `Closed` is published, so anyone
    /// observing the state change can reuse it.
    fn finish(&self, reason: Option<CloseReason>) {
        if self.terminal.swap(true, Ordering::AcqRel) {
            return;
        }

        match &reason {
            Some(reason) => tracing::debug!("[ch {}] closed: {}", self.number, reason),
            None => tracing::debug!("[ch {}] closed", self.number),
        }
        self.waiter
            .close(reason.as_ref().unwrap_or(&CloseReason::Local));
        // Dropping forwarders ends their subscriptions.
        self.handlers.write().clear();
        if let Some(pool) = self.ctx.pool.upgrade() {
            pool.release(self.number);
        }
        self.state.send_replace(ChannelState::Closed(reason));
    }

    /// Closes the channel because its connection is gone.
    pub(crate) fn terminate(&self, reason: CloseReason) {
        self.finish(Some(reason));
    }
}

fn parse_error(e: ProtocolError) -> CloseReason {
    let code = match e {
        ProtocolError::UnknownMethod(_) | ProtocolError::NotIncoming(_) => reply::COMMAND_INVALID,
        _ => reply::SYNTAX_ERROR,
    };
    CloseReason::protocol(code, e.to_string())
}

/// The dispatch task of one channel. Ends when the channel's number is
/// released and its inbound queue closes.
pub(crate) async fn dispatch_loop(
    inner: Arc<ChannelInner>,
    mut inbound: mpsc::UnboundedReceiver<ChannelFrame>,
) {
    tracing::debug!("[ch {}] dispatch loop started", inner.number);
    while let Some(frame) = inbound.recv().await {
        let command = match frame {
            ChannelFrame::Method(payload) => inner.read_command(payload, &mut inbound).await,
            ChannelFrame::Header { .. } => Err(CloseReason::protocol(
                reply::UNEXPECTED_FRAME,
                "content header without a method",
            )),
            ChannelFrame::Body(_) => Err(CloseReason::protocol(
                reply::UNEXPECTED_FRAME,
                "content body without a method",
            )),
        };

        match command {
            Ok((method, content)) => inner.dispatch(method, content).await,
            Err(reason) => inner.fail(reason).await,
        }
    }
    tracing::debug!("[ch {}] dispatch loop stopped", inner.number);
}

/// Registers a channel in the pool and starts its dispatch task.
pub(crate) fn spawn_channel(
    pool: &ChannelPool,
    ctx: &Arc<ChannelContext>,
    control: bool,
    initial: ChannelState,
    handlers: Vec<Arc<dyn FrameHandler>>,
) -> Result<Channel, ClientError> {
    let (inner, inbound) = pool.register(control, |number| {
        let inner = ChannelInner::new(number, ctx.clone(), initial);
        for handler in handlers {
            inner.add_handler(handler);
        }
        Arc::new(inner)
    })?;
    tokio::spawn(dispatch_loop(inner.clone(), inbound));
    Ok(Channel { inner })
}

/// A logical channel. Cheap to clone; all clones share the channel.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub fn number(&self) -> u16 {
        self.inner.number
    }

    pub fn state(&self) -> ChannelState {
        self.inner.state.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.borrow().is_open()
    }

    /// Whether the broker currently allows content to flow on this channel.
    pub fn is_flow_active(&self) -> bool {
        self.inner.flow_active.load(Ordering::Acquire)
    }

    /// Sends a method without content.
    pub async fn send<M: OutgoingMethod>(&self, method: M) -> Result<(), ClientError> {
        self.inner.send_method(&method.into(), None).await
    }

    /// Sends a content-carrying method followed by its header and body
    /// frames, split to the negotiated frame size.
    pub async fn send_with_content<M: OutgoingMethod>(
        &self,
        method: M,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<(), ClientError> {
        self.inner
            .send_method(&method.into(), Some((properties, body)))
            .await
    }

    /// Sends an already built method. Content must be given exactly when
    /// the method carries content.
    pub async fn send_method(
        &self,
        method: Method,
        content: Option<(&MessageProperties, &[u8])>,
    ) -> Result<(), ClientError> {
        self.inner.send_method(&method, content).await
    }

    /// Sends `request` and waits for the `Resp` reply.
    ///
    /// The wait is registered before the request goes out. Only one
    /// correlated wait may be pending per channel; a second one fails with
    /// [`ClientError::WaitInProgress`]. Dropping the returned future
    /// abandons the wait without telling the broker.
    pub async fn call<Req, Resp>(&self, request: Req) -> Result<Resp, ClientError>
    where
        Req: OutgoingMethod,
        Resp: IncomingMethod,
    {
        let pending = self.inner.waiter.register(&[Resp::ID])?;
        self.send(request).await?;
        let method = pending.recv().await?;
        Resp::try_from_method(method).map_err(|other| ClientError::UnexpectedMethod {
            expected: Resp::ID,
            actual: other.id(),
        })
    }

    /// Registers a correlated wait for the next method with one of `ids`
    /// without sending anything.
    pub fn expect(&self, ids: &[MethodId]) -> Result<PendingResponse, ClientError> {
        self.inner.waiter.register(ids)
    }

    /// Waits for the next `M` on this channel.
    pub async fn wait_for<M: IncomingMethod>(&self) -> Result<M, ClientError> {
        let method = self.expect(&[M::ID])?.recv().await?;
        M::try_from_method(method).map_err(|other| ClientError::UnexpectedMethod {
            expected: M::ID,
            actual: other.id(),
        })
    }

    /// Appends a handler to the end of the handler chain.
    pub fn add_handler(&self, handler: impl FrameHandler + 'static) -> HandlerId {
        self.inner.add_handler(Arc::new(handler))
    }

    /// Returns whether a handler with `id` was removed.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.inner.handlers.write();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Forwards every incoming method with one of `ids`, with its content,
    /// to the returned subscription.
    pub fn subscribe(&self, ids: &[MethodId]) -> Subscription {
        let (forwarder, rx) = Forwarder::new(ids);
        let id = self.inner.add_handler(Arc::new(forwarder));
        Subscription::new(id, rx)
    }

    /// Closes the channel with reply code 200.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.close_with(reply::SUCCESS, "Goodbye", None).await
    }

    /// Sends a close and waits for the broker's close-ok.
    ///
    /// Returns `Ok` when the close completed as requested, or the reason
    /// the channel ended otherwise.
    pub async fn close_with(
        &self,
        code: u16,
        text: &str,
        failed_method: Option<MethodId>,
    ) -> Result<(), ClientError> {
        let inner = &self.inner;
        let moved = inner.state.send_if_modified(|state| match state {
            ChannelState::Opening | ChannelState::Open => {
                *state = ChannelState::Closing(None);
                true
            }
            _ => false,
        });

        if moved {
            tracing::debug!("[ch {}] closing", inner.number);
            inner.waiter.fail_pending(&CloseReason::Local);
            let close = inner.close_method(code, text, failed_method);
            if let Err(e) = inner.send_method(&close, None).await {
                inner.finish(Some(CloseReason::ConnectionDropped));
                return Err(e);
            }
        }

        match self.closed().await {
            None => Ok(()),
            Some(reason) => Err(ClientError::Closed(reason)),
        }
    }

    /// Waits until the channel is closed and returns why, `None` for a
    /// requested close.
    pub async fn closed(&self) -> Option<CloseReason> {
        let mut rx = self.inner.state.subscribe();
        let state = rx.wait_for(|state| state.is_closed()).await;
        match state {
            Ok(state) => state.reason().cloned(),
            Err(_) => Some(CloseReason::ConnectionDropped),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<ChannelInner> {
        &self.inner
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("number", &self.inner.number)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}
