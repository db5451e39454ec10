//! Reassembled message content.

use amqpmux_protocol::MessageProperties;
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

/// Properties plus body of a content-carrying method.
#[derive(Debug, Clone, Default)]
pub struct Content {
    pub properties: MessageProperties,
    pub body: ContentBody,
}

/// A message body made of the payloads of one or more body frames.
///
/// Segments are kept as received and joined lazily: reading through the
/// [`Buf`] implementation walks the segments in order without copying.
#[derive(Debug, Clone, Default)]
pub struct ContentBody {
    segments: VecDeque<Bytes>,
    remaining: usize,
}

impl ContentBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: Bytes) {
        if segment.is_empty() {
            return;
        }
        self.remaining += segment.len();
        self.segments.push_back(segment);
    }

    pub fn len(&self) -> usize {
        self.remaining
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    pub fn segments(&self) -> impl Iterator<Item = &Bytes> {
        self.segments.iter()
    }

    /// Returns the body as one contiguous `Bytes`. Zero-copy when the body
    /// arrived in a single frame.
    pub fn to_bytes(&self) -> Bytes {
        match self.segments.len() {
            0 => Bytes::new(),
            1 => self.segments[0].clone(),
            _ => {
                let mut joined = BytesMut::with_capacity(self.remaining);
                for segment in &self.segments {
                    joined.extend_from_slice(segment);
                }
                joined.freeze()
            }
        }
    }
}

impl From<Bytes> for ContentBody {
    fn from(bytes: Bytes) -> Self {
        let mut body = Self::new();
        body.push(bytes);
        body
    }
}

impl Buf for ContentBody {
    fn remaining(&self) -> usize {
        self.remaining
    }

    fn chunk(&self) -> &[u8] {
        self.segments.front().map(|s| &s[..]).unwrap_or(&[])
    }

    fn advance(&mut self, mut cnt: usize) {
        assert!(cnt <= self.remaining, "advance past end of content body");
        self.remaining -= cnt;
        while cnt > 0 {
            let Some(front) = self.segments.front_mut() else {
                break;
            };
            if cnt < front.len() {
                front.advance(cnt);
                break;
            }
            cnt -= front.len();
            self.segments.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_read_as_one_sequence() {
        let mut body = ContentBody::new();
        body.push(Bytes::from_static(b"0123"));
        body.push(Bytes::from_static(b"4567"));
        body.push(Bytes::from_static(b"89"));
        assert_eq!(body.len(), 10);
        assert_eq!(body.segments().count(), 3);

        assert_eq!(&body.to_bytes()[..], b"0123456789");

        let mut reader = body.clone();
        let mut out = [0u8; 10];
        reader.copy_to_slice(&mut out);
        assert_eq!(&out, b"0123456789");
        assert!(!reader.has_remaining());
    }

    #[test]
    fn test_single_segment_is_zero_copy() {
        let data = Bytes::from_static(b"payload");
        let body = ContentBody::from(data.clone());
        assert_eq!(body.to_bytes().as_ptr(), data.as_ptr());
    }

    #[test]
    fn test_advance_across_segments() {
        let mut body = ContentBody::new();
        body.push(Bytes::from_static(b"abc"));
        body.push(Bytes::new());
        body.push(Bytes::from_static(b"def"));
        body.advance(4);
        assert_eq!(body.chunk(), b"ef");
        assert_eq!(body.remaining(), 2);
        body.advance(2);
        assert_eq!(body.chunk(), b"");
    }
}
