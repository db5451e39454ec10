//! Connection management.
//!
//! A connection owns the socket loops, the channel pool and the control
//! channel (number 0). Failure of any of them, or of the broker, fails the
//! whole connection: every channel is closed with the same reason and
//! every pending wait resolves with it.

use crate::buffer::{BufferPool, FrameBuilder};
use crate::channel::{spawn_channel, Channel, ChannelContext, ChannelState};
use crate::config::{endpoint_address, ConnectionConfig};
use crate::content::Content;
use crate::error::{ClientError, CloseReason};
use crate::handler::FrameHandler;
use crate::io::{self, Activity};
use crate::pool::ChannelPool;
use amqpmux_protocol::method::{
    ChannelOpen, ChannelOpenOk, ConnectionClose, ConnectionOpen, ConnectionOpenOk,
    ConnectionSecure, ConnectionSecureOk, ConnectionStart, ConnectionStartOk, ConnectionTune,
    ConnectionTuneOk,
};
use amqpmux_protocol::{
    reply, FieldTable, FrameEncoder, Method, MethodKind, CONTROL_CHANNEL,
    FRAME_MIN_SIZE, PROTOCOL_HEADER,
};
use bytes::BytesMut;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

/// Connection lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Pending,
    Connecting,
    Negotiating,
    Configuring,
    Open,
    Closed,
}

/// Parameters agreed with the broker.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Tuning {
    /// Highest usable channel number; 0 means no limit.
    pub channel_max: u16,
    /// Largest frame in bytes, header and end marker included.
    pub frame_max: u32,
    /// Heartbeat interval in seconds; 0 when disabled.
    pub heartbeat: u16,
    pub server_properties: FieldTable,
}

/// Lower of two proposals where 0 means "no limit".
fn negotiate<T: Ord + Default + Copy>(client: T, broker: T) -> T {
    let zero = T::default();
    if client == zero {
        broker
    } else if broker == zero {
        client
    } else {
        client.min(broker)
    }
}

struct ConnectionShared {
    state: watch::Sender<ConnectionState>,
    pool: Arc<ChannelPool>,
    ctx: Arc<ChannelContext>,
    shutdown: watch::Sender<bool>,
    blocked: Arc<AtomicBool>,
    activity: Arc<Activity>,
    close_timeout: Duration,
    close_reason: Mutex<Option<CloseReason>>,
}

impl ConnectionShared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Connection state {:?} -> {:?}", previous, state);
        }
    }

    /// Fails the connection. The first reason wins; later calls do nothing.
    fn fail(&self, reason: CloseReason) {
        {
            let mut close_reason = self.close_reason.lock();
            if close_reason.is_some() {
                return;
            }
            *close_reason = Some(reason.clone());
        }

        match &reason {
            CloseReason::Local => tracing::info!("Connection closed"),
            other => tracing::warn!("Connection failed: {}", other),
        }
        self.set_state(ConnectionState::Closed);
        self.pool.release_all(&reason);
        self.shutdown.send_replace(true);
    }

    /// Queues a connection close without waiting for close-ok. Used when
    /// the receive side is already gone.
    fn send_close_now(&self, code: u16, text: &str) {
        let close: Method = ConnectionClose::new(code, text, None).into();
        let frame_max = self.ctx.frame_max.load(Ordering::Acquire);
        let mut builder = FrameBuilder::new(&self.ctx.buffers, frame_max);
        if builder
            .method(CONTROL_CHANNEL, &self.ctx.registry, &close)
            .is_err()
        {
            return;
        }
        for buf in builder.finish() {
            if self.ctx.outbound.try_send(buf).is_err() {
                tracing::debug!("Outbound queue unavailable, close not sent");
                return;
            }
        }
    }
}

fn blocked_handler(blocked: Arc<AtomicBool>) -> Arc<dyn FrameHandler> {
    Arc::new(
        move |method: &Method, _: Option<&Content>| match method {
            Method::ConnectionBlocked(block) => {
                tracing::warn!("Connection blocked by broker: {}", block.reason);
                blocked.store(true, Ordering::Release);
                true
            }
            Method::ConnectionUnblocked(_) => {
                tracing::info!("Connection unblocked by broker");
                blocked.store(false, Ordering::Release);
                true
            }
            _ => false,
        },
    )
}

/// A connection to an AMQP 0-9-1 broker.
///
/// Dropping the connection tears it down with
/// [`CloseReason::ConnectionDropped`] without a close handshake.
pub struct Connection {
    shared: Arc<ConnectionShared>,
    control: Channel,
    tuning: Tuning,
}

impl Connection {
    /// Connects to the first configured endpoint that accepts a TCP
    /// connection and negotiates over it.
    ///
    /// Only connect failures move on to the next endpoint; a negotiation
    /// failure is returned as is.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let mut failures = Vec::new();
        for endpoint in &config.endpoints {
            let addr = endpoint_address(endpoint);
            tracing::debug!("Connecting to {}...", addr);

            match tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true).ok();
                    tracing::info!("TCP connected to {}", addr);
                    return Self::open(stream, config).await;
                }
                Ok(Err(e)) => {
                    tracing::warn!("Connection to {} failed: {}", addr, e);
                    failures.push(format!("{}: {}", addr, e));
                }
                Err(_) => {
                    tracing::warn!("Connection to {} timed out", addr);
                    failures.push(format!("{}: timed out", addr));
                }
            }
        }

        Err(ClientError::ConnectFailed(failures.join("; ")))
    }

    /// Negotiates over an already established transport.
    pub async fn open<S>(stream: S, config: &ConnectionConfig) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        let (state, _) = watch::channel(ConnectionState::Pending);
        let (shutdown, _) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity.max(1));

        let pool = Arc::new(ChannelPool::new(config.channel_max));
        let buffers = Arc::new(BufferPool::new(
            FRAME_MIN_SIZE as usize,
            config.buffer_pool_capacity,
        ));
        let frame_max = Arc::new(AtomicUsize::new(FRAME_MIN_SIZE as usize));
        let ctx = Arc::new(ChannelContext {
            registry: config.method_registry(),
            outbound: outbound_tx,
            buffers: buffers.clone(),
            frame_max: frame_max.clone(),
            pool: Arc::downgrade(&pool),
        });

        let blocked = Arc::new(AtomicBool::new(false));
        let control = spawn_channel(
            &pool,
            &ctx,
            true,
            ChannelState::Open,
            vec![blocked_handler(blocked.clone())],
        )?;

        let shared = Arc::new(ConnectionShared {
            state,
            pool,
            ctx,
            shutdown,
            blocked,
            activity: Arc::new(Activity::new()),
            close_timeout: config.handshake_timeout(),
            close_reason: Mutex::new(None),
        });
        shared.set_state(ConnectionState::Connecting);

        let mut connection = Self {
            shared,
            control,
            tuning: Tuning::default(),
        };
        connection.spawn_tasks(stream, outbound_rx, buffers, frame_max);

        let negotiated =
            tokio::time::timeout(config.handshake_timeout(), connection.negotiate(config)).await;
        let result = match negotiated {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Negotiation did not complete within {:?}",
                    config.handshake_timeout()
                );
                Err(ClientError::Timeout)
            }
        };

        match result {
            Ok(tuning) => {
                tracing::info!(
                    "Connection open: channel_max={} frame_max={} heartbeat={}s",
                    tuning.channel_max,
                    tuning.frame_max,
                    tuning.heartbeat
                );
                connection.tuning = tuning;
                connection.shared.set_state(ConnectionState::Open);
                connection.spawn_heartbeat();
                Ok(connection)
            }
            Err(e) => {
                let reason = match &e {
                    ClientError::Closed(reason) => reason.clone(),
                    _ => CloseReason::Local,
                };
                connection.shared.fail(reason);
                Err(e)
            }
        }
    }

    fn spawn_tasks<S>(
        &self,
        stream: S,
        outbound: mpsc::Receiver<BytesMut>,
        buffers: Arc<BufferPool>,
        frame_max: Arc<AtomicUsize>,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);

        let shared = self.shared.clone();
        let shutdown = self.shared.shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = io::send_loop(writer, outbound, buffers, shutdown).await {
                tracing::debug!("Send loop error: {}", e);
                shared.fail(e.into());
            }
        });

        let shared = self.shared.clone();
        let shutdown = self.shared.shutdown.subscribe();
        let activity = self.shared.activity.clone();
        tokio::spawn(async move {
            let pool = shared.pool.clone();
            let result = io::receive_loop(reader, frame_max, activity, shutdown, |number, frame| {
                pool.route(number, frame)
            })
            .await;
            if let Err(reason) = result {
                if let CloseReason::Protocol { code, message } = &reason {
                    shared.send_close_now(*code, message);
                }
                shared.fail(reason);
            }
        });

        // The control channel closing, for whatever reason, ends the
        // connection.
        let shared = self.shared.clone();
        let control = self.control.clone();
        tokio::spawn(async move {
            let reason = control.closed().await;
            shared.fail(reason.unwrap_or(CloseReason::Local));
        });
    }

    async fn negotiate(&self, config: &ConnectionConfig) -> Result<Tuning, ClientError> {
        let control = &self.control;
        self.shared.set_state(ConnectionState::Negotiating);

        let start = control.expect(&[ConnectionStart::ID])?;
        control.inner().send_raw(&PROTOCOL_HEADER).await?;
        let start = expect_method::<ConnectionStart>(start.recv().await?)?;
        if (start.version_major, start.version_minor) != (0, 9) {
            return Err(ClientError::NegotiationFailed(format!(
                "broker speaks protocol {}-{}, expected 0-9",
                start.version_major, start.version_minor
            )));
        }
        tracing::debug!(
            "Broker offers mechanisms [{}], locales [{}]",
            start.mechanisms,
            start.locales
        );

        let auth = config.auth_mechanism();
        if !start.supports_mechanism(auth.name()) {
            return Err(ClientError::AuthMechanismUnsupported {
                mechanism: auth.name().to_string(),
                offered: start.mechanisms.clone(),
            });
        }
        let locale = if start.locales().any(|l| l == config.locale) {
            config.locale.clone()
        } else {
            start
                .locales()
                .next()
                .map(str::to_string)
                .unwrap_or_else(|| config.locale.clone())
        };

        let reply = control.expect(&[ConnectionSecure::ID, ConnectionTune::ID])?;
        control
            .send(ConnectionStartOk {
                client_properties: config.client_properties_table(),
                mechanism: auth.name().to_string(),
                response: auth.response(&[]),
                locale,
            })
            .await?;

        let mut reply = reply.recv().await?;
        let tune = loop {
            match reply {
                Method::ConnectionSecure(secure) => {
                    tracing::debug!("Answering broker challenge");
                    let next = control.expect(&[ConnectionSecure::ID, ConnectionTune::ID])?;
                    control
                        .send(ConnectionSecureOk {
                            response: auth.response(&secure.challenge),
                        })
                        .await?;
                    reply = next.recv().await?;
                }
                Method::ConnectionTune(tune) => break tune,
                other => {
                    return Err(ClientError::UnexpectedMethod {
                        expected: ConnectionTune::ID,
                        actual: other.id(),
                    })
                }
            }
        };

        let channel_max = negotiate(config.channel_max, tune.channel_max);
        let frame_max = negotiate(config.frame_max, tune.frame_max).max(FRAME_MIN_SIZE);
        let heartbeat = negotiate(config.heartbeat_secs, tune.heartbeat);
        tracing::debug!(
            "Broker proposed channel_max={} frame_max={} heartbeat={}",
            tune.channel_max,
            tune.frame_max,
            tune.heartbeat
        );

        control
            .send(ConnectionTuneOk {
                channel_max,
                frame_max,
                heartbeat,
            })
            .await?;
        self.shared
            .ctx
            .frame_max
            .store(frame_max as usize, Ordering::Release);
        self.shared.ctx.buffers.set_buffer_size(frame_max as usize);
        self.shared.pool.set_channel_max(channel_max);

        self.shared.set_state(ConnectionState::Configuring);
        control
            .call::<_, ConnectionOpenOk>(ConnectionOpen::new(config.virtual_host.as_str()))
            .await?;

        Ok(Tuning {
            channel_max,
            frame_max,
            heartbeat,
            server_properties: start.server_properties,
        })
    }

    fn spawn_heartbeat(&self) {
        if self.tuning.heartbeat == 0 {
            return;
        }
        let interval = Duration::from_secs(self.tuning.heartbeat as u64);
        let shared = self.shared.clone();
        let mut shutdown = self.shared.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = io::stopped(&mut shutdown) => return,
                    _ = ticker.tick() => {}
                }

                if shared.activity.idle() >= interval * 2 {
                    shared.fail(CloseReason::HeartbeatTimeout);
                    return;
                }
                let mut buf = shared.ctx.buffers.rent();
                FrameEncoder::heartbeat(&mut buf);
                if shared.ctx.outbound.send(buf).await.is_err() {
                    return;
                }
            }
        });
    }

    /// Opens a new channel.
    pub async fn open_channel(&self) -> Result<Channel, ClientError> {
        self.open_channel_with(Vec::new()).await
    }

    /// Opens a new channel with `handlers` installed before any frame can
    /// arrive for it.
    pub async fn open_channel_with(
        &self,
        handlers: Vec<Arc<dyn FrameHandler>>,
    ) -> Result<Channel, ClientError> {
        self.ensure_open()?;
        let channel = spawn_channel(
            &self.shared.pool,
            &self.shared.ctx,
            false,
            ChannelState::Opening,
            handlers,
        )?;

        let mut guard = OpeningChannel {
            channel: Some(channel.clone()),
            sent: false,
        };
        let pending = channel.expect(&[ChannelOpenOk::ID])?;
        channel.send(ChannelOpen).await?;
        guard.sent = true;
        let result = pending.recv().await;
        guard.channel = None;

        match result {
            Ok(_) => {
                channel.inner().set_open();
                tracing::debug!("Channel {} open", channel.number());
                Ok(channel)
            }
            Err(e) => {
                channel.inner().terminate(CloseReason::Local);
                Err(e)
            }
        }
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.state() == ConnectionState::Open {
            return Ok(());
        }
        Err(match self.close_reason() {
            Some(reason) => ClientError::Closed(reason),
            None => ClientError::ChannelNotOpen(CONTROL_CHANNEL),
        })
    }

    /// Performs the close handshake and tears the connection down.
    pub async fn close(&self) -> Result<(), ClientError> {
        let result = tokio::time::timeout(
            self.shared.close_timeout,
            self.control.close_with(reply::SUCCESS, "Goodbye", None),
        )
        .await;
        self.shared.fail(CloseReason::Local);

        match result {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    /// Whether the broker reported the connection as blocked.
    pub fn is_blocked(&self) -> bool {
        self.shared.blocked.load(Ordering::Acquire)
    }

    /// Why the connection closed, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.close_reason.lock().clone()
    }

    /// Waits until the connection is closed and returns why.
    pub async fn wait_closed(&self) -> CloseReason {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
        self.close_reason().unwrap_or(CloseReason::ConnectionDropped)
    }

    /// Number of live channels, the control channel included.
    pub fn channel_count(&self) -> usize {
        self.shared.pool.len()
    }
}

fn expect_method<M: MethodKind>(method: Method) -> Result<M, ClientError> {
    M::try_from_method(method).map_err(|other| ClientError::UnexpectedMethod {
        expected: M::ID,
        actual: other.id(),
    })
}

/// Cleans up a channel whose open was abandoned.
///
/// Before the open went out the number is simply released. After that the
/// broker may still answer, so the channel is closed with a handshake and
/// its number stays reserved until close-ok.
struct OpeningChannel {
    channel: Option<Channel>,
    sent: bool,
}

impl Drop for OpeningChannel {
    fn drop(&mut self) {
        let Some(channel) = self.channel.take() else {
            return;
        };
        if !self.sent {
            channel.inner().terminate(CloseReason::Local);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Channel {} open abandoned, closing", channel.number());
                handle.spawn(async move {
                    if let Err(e) = channel.close().await {
                        tracing::debug!(
                            "Channel {} close after abandoned open: {}",
                            channel.number(),
                            e
                        );
                    }
                });
            }
            Err(_) => channel.inner().terminate(CloseReason::Local),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.fail(CloseReason::ConnectionDropped);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("tuning", &self.tuning)
            .field("channels", &self.shared.pool.len())
            .finish()
    }
}
