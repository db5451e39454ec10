//! Channel number allocation and frame routing.

use crate::channel::ChannelInner;
use crate::error::{ClientError, CloseReason};
use crate::io::ChannelFrame;
use amqpmux_protocol::{reply, CONTROL_CHANNEL};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

struct Slot {
    inbound: mpsc::UnboundedSender<ChannelFrame>,
    channel: Weak<ChannelInner>,
}

struct Slots {
    /// Highest usable number; 0 means no limit beyond `u16::MAX`.
    channel_max: u16,
    entries: HashMap<u16, Slot>,
    closed: Option<CloseReason>,
}

/// Live channel numbers of one connection.
///
/// A number is handed out again only after [`release`](Self::release),
/// which the channel calls itself once it reaches `Closed`.
pub(crate) struct ChannelPool {
    slots: Mutex<Slots>,
}

impl ChannelPool {
    pub(crate) fn new(channel_max: u16) -> Self {
        Self {
            slots: Mutex::new(Slots {
                channel_max,
                entries: HashMap::new(),
                closed: None,
            }),
        }
    }

    /// Allocates a channel number and builds the channel for it.
    ///
    /// The control channel always gets number 0; every other channel the
    /// lowest free number above 0.
    pub(crate) fn register<F>(
        &self,
        control: bool,
        make: F,
    ) -> Result<(Arc<ChannelInner>, mpsc::UnboundedReceiver<ChannelFrame>), ClientError>
    where
        F: FnOnce(u16) -> Arc<ChannelInner>,
    {
        let mut slots = self.slots.lock();
        if let Some(reason) = &slots.closed {
            return Err(ClientError::Closed(reason.clone()));
        }

        let number = if control {
            if slots.entries.contains_key(&CONTROL_CHANNEL) {
                return Err(ClientError::ChannelInUse(CONTROL_CHANNEL));
            }
            CONTROL_CHANNEL
        } else {
            let max = if slots.channel_max == 0 {
                u16::MAX
            } else {
                slots.channel_max
            };
            (1..=max)
                .find(|n| !slots.entries.contains_key(n))
                .ok_or(ClientError::ChannelLimitReached(max))?
        };

        let channel = make(number);
        let (tx, rx) = mpsc::unbounded_channel();
        slots.entries.insert(
            number,
            Slot {
                inbound: tx,
                channel: Arc::downgrade(&channel),
            },
        );
        tracing::debug!("Registered channel {} ({} live)", number, slots.entries.len());
        Ok((channel, rx))
    }

    /// Queues a frame for the channel's dispatch loop.
    ///
    /// A frame for a number with no live channel is a connection error.
    pub(crate) fn route(&self, number: u16, frame: ChannelFrame) -> Result<(), CloseReason> {
        let slots = self.slots.lock();
        let slot = slots.entries.get(&number).ok_or_else(|| {
            CloseReason::protocol(
                reply::CHANNEL_ERROR,
                format!("frame for unknown channel {}", number),
            )
        })?;
        if slot.inbound.send(frame).is_err() {
            tracing::debug!("Channel {} dispatch loop gone, dropping frame", number);
        }
        Ok(())
    }

    /// Frees `number` once its channel is closed (or gone).
    ///
    /// Returns whether the number was released.
    pub(crate) fn release(&self, number: u16) -> bool {
        let mut slots = self.slots.lock();
        let closed = match slots.entries.get(&number) {
            Some(slot) => slot
                .channel
                .upgrade()
                .map(|channel| channel.is_closed())
                .unwrap_or(true),
            None => return false,
        };
        if closed {
            slots.entries.remove(&number);
            tracing::debug!("Released channel {}", number);
        }
        closed
    }

    /// Closes every live channel with `reason` and refuses further
    /// registrations. Safe to call more than once and concurrently with
    /// channels closing on their own.
    pub(crate) fn release_all(&self, reason: &CloseReason) {
        let drained: Vec<(u16, Slot)> = {
            let mut slots = self.slots.lock();
            if slots.closed.is_none() {
                slots.closed = Some(reason.clone());
            }
            slots.entries.drain().collect()
        };

        if !drained.is_empty() {
            tracing::debug!("Closing {} channels: {}", drained.len(), reason);
        }
        for (_, slot) in drained {
            if let Some(channel) = slot.channel.upgrade() {
                channel.terminate(reason.clone());
            }
        }
    }

    pub(crate) fn set_channel_max(&self, channel_max: u16) {
        self.slots.lock().channel_max = channel_max;
    }

    pub(crate) fn channel_max(&self) -> u16 {
        self.slots.lock().channel_max
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub(crate) fn contains(&self, number: u16) -> bool {
        self.slots.lock().entries.contains_key(&number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;
    use crate::testing::Harness;

    #[tokio::test]
    async fn test_lowest_free_number() {
        let harness = Harness::new(0);
        let a = harness.channel(ChannelState::Open);
        let b = harness.channel(ChannelState::Open);
        assert_eq!(a.number(), 1);
        assert_eq!(b.number(), 2);
        assert_eq!(harness.pool.len(), 2);
    }

    #[tokio::test]
    async fn test_number_reused_only_after_release() {
        let harness = Harness::new(0);
        let first = harness.channel(ChannelState::Open);
        assert_eq!(first.number(), 1);

        // Still open: release refuses and the number stays taken.
        assert!(!harness.pool.release(1));
        assert_eq!(harness.channel(ChannelState::Open).number(), 2);

        first.inner().terminate(CloseReason::Local);
        assert!(!harness.pool.contains(1));
        assert_eq!(harness.channel(ChannelState::Open).number(), 1);
    }

    #[tokio::test]
    async fn test_channel_limit() {
        let harness = Harness::new(2);
        harness.channel(ChannelState::Open);
        harness.channel(ChannelState::Open);
        let result = harness.pool.register(false, |n| harness.inner(n, ChannelState::Open));
        assert!(matches!(result, Err(ClientError::ChannelLimitReached(2))));
    }

    #[tokio::test]
    async fn test_control_channel_is_zero() {
        let harness = Harness::new(0);
        let control = harness.control();
        assert_eq!(control.number(), CONTROL_CHANNEL);
        assert!(matches!(
            harness
                .pool
                .register(true, |n| harness.inner(n, ChannelState::Open)),
            Err(ClientError::ChannelInUse(0))
        ));
        assert_eq!(harness.channel(ChannelState::Open).number(), 1);
    }

    #[tokio::test]
    async fn test_route_unknown_channel() {
        let harness = Harness::new(0);
        let err = harness
            .pool
            .route(5, ChannelFrame::Body(bytes::Bytes::new()))
            .unwrap_err();
        assert_eq!(err.reply_code(), reply::CHANNEL_ERROR);
    }

    #[tokio::test]
    async fn test_release_all_closes_channels_once() {
        let harness = Harness::new(0);
        let a = harness.channel(ChannelState::Open);
        let b = harness.channel(ChannelState::Open);

        harness.pool.release_all(&CloseReason::HeartbeatTimeout);
        harness.pool.release_all(&CloseReason::Local);

        for channel in [&a, &b] {
            assert!(matches!(
                channel.state(),
                ChannelState::Closed(Some(CloseReason::HeartbeatTimeout))
            ));
        }
        assert_eq!(harness.pool.len(), 0);
        assert!(matches!(
            harness
                .pool
                .register(false, |n| harness.inner(n, ChannelState::Open)),
            Err(ClientError::Closed(CloseReason::HeartbeatTimeout))
        ));
    }
}
