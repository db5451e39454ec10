//! Pooled frame buffers.
//!
//! Every outgoing frame is assembled in a buffer rented from the pool and
//! handed back by the send loop once written. Buffers are keyed by a single
//! configured size (the negotiated frame max); anything else is dropped on
//! release so one oversized send cannot grow the pool.

use amqpmux_protocol::{
    ContentHeader, FrameEncoder, MessageProperties, Method, MethodRegistry, ProtocolError,
    FRAME_OVERHEAD,
};
use bytes::BytesMut;
use parking_lot::Mutex;

/// Default number of free buffers kept around.
pub const DEFAULT_POOL_CAPACITY: usize = 100;

/// Thread-safe free list of equally sized byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    state: Mutex<PoolState>,
    max_free: usize,
}

#[derive(Debug)]
struct PoolState {
    buffer_size: usize,
    free: Vec<BytesMut>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_free: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                buffer_size,
                free: Vec::with_capacity(max_free.min(DEFAULT_POOL_CAPACITY)),
            }),
            max_free,
        }
    }

    /// Rents an empty buffer with the pool's buffer size as capacity.
    pub fn rent(&self) -> BytesMut {
        let mut state = self.state.lock();
        match state.free.pop() {
            Some(buf) => buf,
            None => BytesMut::with_capacity(state.buffer_size),
        }
    }

    /// Rents an empty buffer with at least `size` bytes of capacity.
    ///
    /// Requests above the pool's buffer size get a fresh allocation that
    /// will not be kept on release.
    pub fn rent_sized(&self, size: usize) -> BytesMut {
        if size <= self.buffer_size() {
            self.rent()
        } else {
            BytesMut::with_capacity(size)
        }
    }

    /// Returns a buffer to the free list. Buffers whose capacity differs
    /// from the configured size, or that arrive when the free list is full,
    /// are dropped.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        let mut state = self.state.lock();
        if buf.capacity() == state.buffer_size && state.free.len() < self.max_free {
            state.free.push(buf);
        }
    }

    /// Changes the buffer size. Free buffers of the old size are dropped.
    pub fn set_buffer_size(&self, size: usize) {
        let mut state = self.state.lock();
        if state.buffer_size == size {
            return;
        }
        tracing::debug!(
            "Buffer size {} -> {}, dropping {} free buffers",
            state.buffer_size,
            size,
            state.free.len()
        );
        state.buffer_size = size;
        state.free.clear();
    }

    pub fn buffer_size(&self) -> usize {
        self.state.lock().buffer_size
    }

    /// Number of buffers currently on the free list.
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }
}

/// Lays out the frames of one logical send across pooled buffers.
///
/// Content bodies are split into chunks of at most `frame_max - 8` bytes so
/// that no frame exceeds the negotiated maximum.
pub struct FrameBuilder<'a> {
    pool: &'a BufferPool,
    frame_max: usize,
    current: BytesMut,
    filled: Vec<BytesMut>,
}

/// Room reserved for a method or content-header frame before it is
/// written; larger frames grow the buffer.
const SMALL_FRAME_RESERVE: usize = 512;

impl<'a> FrameBuilder<'a> {
    pub fn new(pool: &'a BufferPool, frame_max: usize) -> Self {
        Self {
            pool,
            frame_max,
            current: pool.rent(),
            filled: Vec::new(),
        }
    }

    fn ensure(&mut self, needed: usize) {
        let room = self.current.capacity() - self.current.len();
        if room < needed && !self.current.is_empty() {
            let next = self.pool.rent_sized(needed);
            self.filled.push(std::mem::replace(&mut self.current, next));
        }
    }

    pub fn method(
        &mut self,
        channel: u16,
        registry: &MethodRegistry,
        method: &Method,
    ) -> Result<(), ProtocolError> {
        self.ensure(SMALL_FRAME_RESERVE);
        FrameEncoder::method_frame(&mut self.current, channel, registry, method)
    }

    /// Writes the content header followed by the body frames.
    pub fn content(
        &mut self,
        channel: u16,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<(), ProtocolError> {
        let header = ContentHeader::new(body.len() as u64, properties.clone());
        self.ensure(SMALL_FRAME_RESERVE);
        FrameEncoder::content_header_frame(&mut self.current, channel, &header)?;

        for chunk in body.chunks(self.max_body_chunk()) {
            self.ensure(chunk.len() + FRAME_OVERHEAD);
            FrameEncoder::body_frame(&mut self.current, channel, chunk)?;
        }
        Ok(())
    }

    /// Appends raw bytes (the protocol header) outside any frame.
    pub fn raw(&mut self, bytes: &[u8]) {
        self.ensure(bytes.len());
        self.current.extend_from_slice(bytes);
    }

    fn max_body_chunk(&self) -> usize {
        self.frame_max.saturating_sub(FRAME_OVERHEAD).max(1)
    }

    /// Returns the filled buffers in write order.
    pub fn finish(mut self) -> Vec<BytesMut> {
        if !self.current.is_empty() {
            self.filled.push(self.current);
        } else {
            self.pool.release(self.current);
        }
        self.filled
    }
}
