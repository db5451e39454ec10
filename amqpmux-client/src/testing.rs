//! Test fixtures: a channel harness without a socket and a scripted broker
//! over an in-memory duplex stream.

use crate::buffer::BufferPool;
use crate::channel::{spawn_channel, Channel, ChannelContext, ChannelInner, ChannelState};
use crate::io::ChannelFrame;
use crate::pool::ChannelPool;
use amqpmux_protocol::method::{ConnectionOpenOk, ConnectionStart, ConnectionTune};
use amqpmux_protocol::{
    ContentHeader, FieldTable, Frame, FrameDecoder, FrameEncoder, FrameType, MessageProperties,
    Method, MethodRegistry, Role, FRAME_MIN_SIZE, PROTOCOL_HEADER,
};
use bytes::BytesMut;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

/// Channels wired to a pool and an outbound queue the test reads from.
pub(crate) struct Harness {
    pub(crate) pool: Arc<ChannelPool>,
    ctx: Arc<ChannelContext>,
    outbound: mpsc::Receiver<BytesMut>,
    decoder: FrameDecoder,
    broker: MethodRegistry,
}

impl Harness {
    pub(crate) fn new(channel_max: u16) -> Self {
        let pool = Arc::new(ChannelPool::new(channel_max));
        let (tx, rx) = mpsc::channel(1024);
        let ctx = Arc::new(ChannelContext {
            registry: Arc::new(MethodRegistry::amqp()),
            outbound: tx,
            buffers: Arc::new(BufferPool::new(FRAME_MIN_SIZE as usize, 16)),
            frame_max: Arc::new(AtomicUsize::new(FRAME_MIN_SIZE as usize)),
            pool: Arc::downgrade(&pool),
        });
        Self {
            pool,
            ctx,
            outbound: rx,
            decoder: FrameDecoder::new(),
            broker: MethodRegistry::for_role(Role::Server),
        }
    }

    pub(crate) fn inner(&self, number: u16, state: ChannelState) -> Arc<ChannelInner> {
        Arc::new(ChannelInner::new(number, self.ctx.clone(), state))
    }

    pub(crate) fn channel(&self, state: ChannelState) -> Channel {
        spawn_channel(&self.pool, &self.ctx, false, state, Vec::new()).unwrap()
    }

    pub(crate) fn control(&self) -> Channel {
        spawn_channel(&self.pool, &self.ctx, true, ChannelState::Open, Vec::new()).unwrap()
    }

    /// Routes a method as if the broker sent it.
    pub(crate) fn deliver(&self, number: u16, method: &Method) {
        let mut payload = BytesMut::new();
        method.encode(&mut payload).unwrap();
        self.pool
            .route(number, ChannelFrame::Method(payload.freeze()))
            .unwrap();
    }

    pub(crate) fn deliver_header(&self, number: u16, body_size: u64, props: MessageProperties) {
        let mut payload = BytesMut::new();
        ContentHeader::new(body_size, props)
            .write(&mut payload)
            .unwrap();
        self.pool
            .route(
                number,
                ChannelFrame::Header {
                    body_size,
                    payload: payload.freeze(),
                },
            )
            .unwrap();
    }

    pub(crate) fn deliver_body(&self, number: u16, body: &[u8]) {
        self.pool
            .route(
                number,
                ChannelFrame::Body(bytes::Bytes::copy_from_slice(body)),
            )
            .unwrap();
    }

    /// Next frame sent by a channel, waiting for it.
    pub(crate) async fn next_frame(&mut self) -> Frame {
        loop {
            if let Some(frame) = self.decoder.decode_frame().unwrap() {
                return frame;
            }
            let buf = tokio::time::timeout(WAIT, self.outbound.recv())
                .await
                .expect("timed out waiting for an outgoing frame")
                .expect("outbound queue closed");
            self.decoder.extend(&buf);
        }
    }

    /// Next method sent by a channel, with the channel number.
    pub(crate) async fn next_method(&mut self) -> (u16, Method) {
        let frame = self.next_frame().await;
        assert_eq!(frame.frame_type, FrameType::Method);
        (frame.channel, self.broker.parse(frame.payload).unwrap())
    }

    pub(crate) fn try_next_frame(&mut self) -> Option<Frame> {
        while let Ok(buf) = self.outbound.try_recv() {
            self.decoder.extend(&buf);
        }
        self.decoder.decode_frame().unwrap()
    }

    /// Every frame sent so far.
    pub(crate) fn drain_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.try_next_frame() {
            frames.push(frame);
        }
        frames
    }
}

/// The broker side of a connection, driven step by step by a test.
pub(crate) struct FakeBroker {
    stream: DuplexStream,
    decoder: FrameDecoder,
    registry: MethodRegistry,
}

impl FakeBroker {
    /// Returns the client end of the stream and the broker.
    pub(crate) fn pair() -> (DuplexStream, Self) {
        let (client, broker) = tokio::io::duplex(256 * 1024);
        (
            client,
            Self {
                stream: broker,
                decoder: FrameDecoder::new(),
                registry: MethodRegistry::for_role(Role::Server),
            },
        )
    }

    pub(crate) async fn read_protocol_header(&mut self) {
        let mut header = [0u8; 8];
        tokio::time::timeout(WAIT, self.stream.read_exact(&mut header))
            .await
            .expect("timed out waiting for protocol header")
            .unwrap();
        assert_eq!(header, PROTOCOL_HEADER);
    }

    /// Next frame from the client, or `None` once the client hung up.
    pub(crate) async fn next_frame(&mut self) -> Option<Frame> {
        let mut buf = [0u8; 8192];
        loop {
            if let Some(frame) = self.decoder.decode_frame().unwrap() {
                return Some(frame);
            }
            let n = tokio::time::timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for a client frame")
                .ok()?;
            if n == 0 {
                return None;
            }
            self.decoder.extend(&buf[..n]);
        }
    }

    /// Next method from the client, skipping heartbeats.
    pub(crate) async fn next_method(&mut self) -> (u16, Method) {
        loop {
            let frame = self.next_frame().await.expect("client hung up");
            match frame.frame_type {
                FrameType::Heartbeat => continue,
                FrameType::Method => {
                    return (frame.channel, self.registry.parse(frame.payload).unwrap())
                }
                other => panic!("expected a method frame, got {:?}", other),
            }
        }
    }

    pub(crate) async fn send_method(&mut self, channel: u16, method: impl Into<Method>) {
        let mut buf = BytesMut::new();
        FrameEncoder::method_frame(&mut buf, channel, &self.registry, &method.into()).unwrap();
        self.stream.write_all(&buf).await.unwrap();
    }

    /// Sends a content header and the body split into `chunks`.
    pub(crate) async fn send_content(
        &mut self,
        channel: u16,
        props: MessageProperties,
        chunks: &[&[u8]],
    ) {
        let size: usize = chunks.iter().map(|c| c.len()).sum();
        let mut buf = BytesMut::new();
        FrameEncoder::content_header_frame(
            &mut buf,
            channel,
            &ContentHeader::new(size as u64, props),
        )
        .unwrap();
        for chunk in chunks {
            FrameEncoder::body_frame(&mut buf, channel, chunk).unwrap();
        }
        self.stream.write_all(&buf).await.unwrap();
    }

    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub(crate) fn start() -> ConnectionStart {
        let mut server_properties = FieldTable::new();
        server_properties.insert("product".into(), "FakeBroker".into());
        ConnectionStart {
            version_major: 0,
            version_minor: 9,
            server_properties,
            mechanisms: "PLAIN AMQPLAIN".into(),
            locales: "en_US".into(),
        }
    }

    /// Runs the broker side of a successful negotiation with `tune`.
    /// Returns the client's tune-ok values.
    pub(crate) async fn handshake(&mut self, tune: ConnectionTune) -> Method {
        self.read_protocol_header().await;
        self.send_method(0, Self::start()).await;
        let (_, start_ok) = self.next_method().await;
        assert!(matches!(start_ok, Method::ConnectionStartOk(_)));

        self.send_method(0, tune).await;
        let (_, tune_ok) = self.next_method().await;
        assert!(matches!(tune_ok, Method::ConnectionTuneOk(_)));

        let (_, open) = self.next_method().await;
        assert!(matches!(open, Method::ConnectionOpen(_)));
        self.send_method(0, ConnectionOpenOk).await;
        tune_ok
    }

    /// Drops the broker's end of the socket.
    pub(crate) fn hang_up(self) {}
}
