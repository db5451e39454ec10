//! Socket I/O loops.
//!
//! The send loop owns the write half and drains the outbound queue one
//! buffer at a time; each buffer holds complete frames of a single logical
//! send, so frames of concurrent senders never interleave. The receive loop
//! owns the read half, decodes frames and routes them to channels by
//! number.

use crate::buffer::BufferPool;
use crate::error::CloseReason;
use amqpmux_protocol::{
    reply, ContentHeader, Frame, FrameDecoder, FrameType, ProtocolError, CONTROL_CHANNEL,
};
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

/// Read buffer size for socket reads (8 KiB).
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// A frame routed to a channel.
#[derive(Debug)]
pub(crate) enum ChannelFrame {
    Method(Bytes),
    Header { body_size: u64, payload: Bytes },
    Body(Bytes),
}

/// Time of the last frame received from the broker.
#[derive(Debug)]
pub(crate) struct Activity {
    base: Instant,
    last_millis: AtomicU64,
}

impl Activity {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            last_millis: AtomicU64::new(0),
        }
    }

    pub(crate) fn touch(&self) {
        let now = self.base.elapsed().as_millis() as u64;
        self.last_millis.store(now, Ordering::Relaxed);
    }

    /// Time since the last received frame.
    pub(crate) fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_millis.load(Ordering::Relaxed));
        self.base.elapsed().saturating_sub(last)
    }
}

/// Resolves once shutdown is signalled or its sender is gone.
///
/// The borrow of the watched value ends here, so callers may await in the
/// branch that follows.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Writes queued buffers until the queue closes or shutdown is signalled.
///
/// On shutdown, buffers already queued are still written so a final
/// close or close-ok reaches the broker.
pub(crate) async fn send_loop<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<BytesMut>,
    pool: Arc<BufferPool>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    tracing::debug!("send loop started");
    loop {
        tokio::select! {
            biased;

            next = outbound.recv() => match next {
                Some(buf) => write_buffer(&mut writer, buf, &pool).await?,
                None => break,
            },

            _ = stopped(&mut shutdown) => {
                while let Ok(buf) = outbound.try_recv() {
                    write_buffer(&mut writer, buf, &pool).await?;
                }
                break;
            }
        }
    }

    tracing::debug!("send loop stopped");
    let _ = writer.shutdown().await;
    Ok(())
}

async fn write_buffer<W>(writer: &mut W, buf: BytesMut, pool: &BufferPool) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&buf).await?;
    writer.flush().await?;
    pool.release(buf);
    Ok(())
}

/// Reads frames and hands them to `route` until the socket fails, a frame
/// violates the protocol or shutdown is signalled.
///
/// `frame_max` is re-read before every decode so a value tuned during
/// negotiation applies to the next frame. Returns `Ok(())` only on
/// shutdown.
pub(crate) async fn receive_loop<R, F>(
    mut reader: R,
    frame_max: Arc<AtomicUsize>,
    activity: Arc<Activity>,
    mut shutdown: watch::Receiver<bool>,
    mut route: F,
) -> Result<(), CloseReason>
where
    R: AsyncRead + Unpin,
    F: FnMut(u16, ChannelFrame) -> Result<(), CloseReason>,
{
    tracing::debug!("receive loop started");
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => {
                tracing::debug!("receive loop stopped");
                return Ok(());
            }
            result = reader.read(&mut buf) => result?,
        };

        if n == 0 {
            tracing::debug!("receive loop: connection closed by broker");
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by broker",
            )
            .into());
        }

        decoder.extend(&buf[..n]);
        loop {
            decoder.set_max_frame_size(frame_max.load(Ordering::Acquire));
            let frame = match decoder.decode_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => return Err(frame_error(e)),
            };
            activity.touch();
            dispatch_frame(frame, &mut route)?;
        }
    }
}

fn dispatch_frame<F>(frame: Frame, route: &mut F) -> Result<(), CloseReason>
where
    F: FnMut(u16, ChannelFrame) -> Result<(), CloseReason>,
{
    let routed = match frame.frame_type {
        FrameType::Heartbeat if frame.channel != CONTROL_CHANNEL => {
            return Err(CloseReason::protocol(
                reply::FRAME_ERROR,
                format!("heartbeat on channel {}", frame.channel),
            ));
        }
        FrameType::Heartbeat => {
            tracing::trace!("heartbeat received");
            return Ok(());
        }
        FrameType::Method => ChannelFrame::Method(frame.payload),
        FrameType::ContentHeader => {
            let body_size = ContentHeader::peek_body_size(&frame.payload).map_err(frame_error)?;
            ChannelFrame::Header {
                body_size,
                payload: frame.payload,
            }
        }
        FrameType::ContentBody => ChannelFrame::Body(frame.payload),
        FrameType::Malformed => {
            return Err(CloseReason::protocol(reply::FRAME_ERROR, "malformed frame"));
        }
    };
    route(frame.channel, routed)
}

fn frame_error(e: ProtocolError) -> CloseReason {
    match e {
        ProtocolError::Io(e) => e.into(),
        other => CloseReason::protocol(reply::FRAME_ERROR, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amqpmux_protocol::method::ChannelOpenOk;
    use amqpmux_protocol::{FrameEncoder, MessageProperties, MethodRegistry, Role};
    use tokio_test::io::Builder;

    fn shutdown_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_send_loop_writes_in_order_and_releases() {
        let pool = Arc::new(BufferPool::new(64, 4));
        let writer = Builder::new().write(b"first").write(b"second").build();
        let (tx, rx) = mpsc::channel(4);
        let (_stop, shutdown) = shutdown_pair();

        let mut a = pool.rent();
        a.extend_from_slice(b"first");
        let mut b = pool.rent();
        b.extend_from_slice(b"second");
        tx.send(a).await.unwrap();
        tx.send(b).await.unwrap();
        drop(tx);

        send_loop(writer, rx, pool.clone(), shutdown).await.unwrap();
        assert_eq!(pool.free_count(), 2);
    }

    #[tokio::test]
    async fn test_send_loop_drains_queue_on_shutdown() {
        let pool = Arc::new(BufferPool::new(64, 4));
        let writer = Builder::new().write(b"close-ok").build();
        let (tx, rx) = mpsc::channel(4);
        let (stop, shutdown) = shutdown_pair();

        let mut buf = pool.rent();
        buf.extend_from_slice(b"close-ok");
        tx.send(buf).await.unwrap();
        stop.send(true).unwrap();

        send_loop(writer, rx, pool, shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_loop_spawned_drains_after_shutdown() {
        let pool = Arc::new(BufferPool::new(64, 4));
        let (client, mut broker) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::channel(4);
        let (stop, shutdown) = shutdown_pair();

        let mut close_ok = pool.rent();
        close_ok.extend_from_slice(b"close-ok");
        tx.send(close_ok).await.unwrap();
        stop.send(true).unwrap();

        let task = tokio::spawn(send_loop(client, rx, pool, shutdown));
        task.await.unwrap().unwrap();

        let mut written = Vec::new();
        broker.read_to_end(&mut written).await.unwrap();
        assert_eq!(written, b"close-ok");
    }

    #[tokio::test]
    async fn test_receive_loop_rejects_heartbeat_off_control_channel() {
        // Heartbeat frame on channel 3.
        let reader = Builder::new().read(&[8, 0, 3, 0, 0, 0, 0, 0xCE]).build();
        let (_stop, shutdown) = shutdown_pair();
        let result = receive_loop(
            reader,
            Arc::new(AtomicUsize::new(4096)),
            Arc::new(Activity::new()),
            shutdown,
            |_, _| Ok(()),
        )
        .await;

        assert!(matches!(
            result,
            Err(CloseReason::Protocol {
                code: reply::FRAME_ERROR,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_receive_loop_routes_frames() {
        let registry = MethodRegistry::for_role(Role::Server);
        let mut wire = BytesMut::new();
        FrameEncoder::method_frame(&mut wire, 3, &registry, &ChannelOpenOk.into()).unwrap();
        FrameEncoder::heartbeat(&mut wire);
        let header = ContentHeader::new(5, MessageProperties::new());
        FrameEncoder::content_header_frame(&mut wire, 3, &header).unwrap();
        FrameEncoder::body_frame(&mut wire, 3, b"hello").unwrap();

        // Split mid-frame to exercise partial reads.
        let (head, tail) = wire.split_at(10);
        let reader = Builder::new().read(head).read(tail).build();
        let (_stop, shutdown) = shutdown_pair();
        let activity = Arc::new(Activity::new());

        let mut routed = Vec::new();
        let result = receive_loop(
            reader,
            Arc::new(AtomicUsize::new(4096)),
            activity,
            shutdown,
            |channel, frame| {
                routed.push((channel, frame));
                Ok(())
            },
        )
        .await;

        assert!(matches!(result, Err(CloseReason::Io(_))));
        assert_eq!(routed.len(), 3);
        assert!(matches!(routed[0], (3, ChannelFrame::Method(_))));
        assert!(matches!(
            routed[1],
            (3, ChannelFrame::Header { body_size: 5, .. })
        ));
        match &routed[2] {
            (3, ChannelFrame::Body(body)) => assert_eq!(&body[..], b"hello"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receive_loop_rejects_bad_frame_end() {
        let reader = Builder::new()
            .read(&[1, 0, 1, 0, 0, 0, 1, 0xAA, 0x00])
            .build();
        let (_stop, shutdown) = shutdown_pair();
        let result = receive_loop(
            reader,
            Arc::new(AtomicUsize::new(4096)),
            Arc::new(Activity::new()),
            shutdown,
            |_, _| Ok(()),
        )
        .await;

        match result {
            Err(CloseReason::Protocol { code, .. }) => assert_eq!(code, reply::FRAME_ERROR),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receive_loop_rejects_oversized_frame() {
        // Declares a 5000 byte payload against a 4096 frame max.
        let reader = Builder::new()
            .read(&[3, 0, 1, 0, 0, 0x13, 0x88])
            .build();
        let (_stop, shutdown) = shutdown_pair();
        let result = receive_loop(
            reader,
            Arc::new(AtomicUsize::new(4096)),
            Arc::new(Activity::new()),
            shutdown,
            |_, _| Ok(()),
        )
        .await;

        assert!(matches!(
            result,
            Err(CloseReason::Protocol {
                code: reply::FRAME_ERROR,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_receive_loop_propagates_routing_error() {
        let registry = MethodRegistry::for_role(Role::Server);
        let mut wire = BytesMut::new();
        FrameEncoder::method_frame(&mut wire, 9, &registry, &ChannelOpenOk.into()).unwrap();
        let reader = Builder::new().read(&wire).build();
        let (_stop, shutdown) = shutdown_pair();

        let result = receive_loop(
            reader,
            Arc::new(AtomicUsize::new(4096)),
            Arc::new(Activity::new()),
            shutdown,
            |channel, _| {
                Err(CloseReason::protocol(
                    reply::CHANNEL_ERROR,
                    format!("unknown channel {}", channel),
                ))
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(CloseReason::Protocol {
                code: reply::CHANNEL_ERROR,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_receive_loop_stops_on_shutdown() {
        let (client, _broker) = tokio::io::duplex(64);
        let (stop, shutdown) = shutdown_pair();
        let task = tokio::spawn(receive_loop(
            client,
            Arc::new(AtomicUsize::new(4096)),
            Arc::new(Activity::new()),
            shutdown,
            |_, _| Ok(()),
        ));
        stop.send(true).unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_activity_tracks_idle_time() {
        let activity = Activity::new();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(activity.idle() >= Duration::from_millis(20));
        activity.touch();
        assert!(activity.idle() < Duration::from_millis(20));
    }
}
