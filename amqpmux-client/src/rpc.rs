//! Correlated waits: one pending "next method with one of these ids" slot
//! per channel.
//!
//! A wait is registered before the request goes out so the response cannot
//! race past it. Dropping the [`PendingResponse`] abandons the wait locally;
//! the broker is not told and may still answer, in which case the answer
//! reaches the channel's handlers instead.

use crate::error::{ClientError, CloseReason};
use amqpmux_protocol::{Method, MethodId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

type Reply = Result<Method, CloseReason>;

struct Waiter {
    id: u64,
    expected: Vec<MethodId>,
    tx: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct SlotState {
    next_id: u64,
    pending: Option<Waiter>,
    /// Set once the channel is terminal; later registrations fail with it.
    closed: Option<CloseReason>,
}

/// The single correlated-wait slot of a channel.
#[derive(Default)]
pub(crate) struct WaitSlot {
    channel: u16,
    state: Mutex<SlotState>,
}

impl WaitSlot {
    pub(crate) fn new(channel: u16) -> Self {
        Self {
            channel,
            state: Mutex::new(SlotState::default()),
        }
    }

    /// Registers a wait for the next method whose id is in `expected`.
    pub(crate) fn register(
        self: &Arc<Self>,
        expected: &[MethodId],
    ) -> Result<PendingResponse, ClientError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            return Err(ClientError::Closed(reason.clone()));
        }
        if state.pending.is_some() {
            return Err(ClientError::WaitInProgress(self.channel));
        }

        state.next_id += 1;
        let id = state.next_id;
        let (tx, rx) = oneshot::channel();
        state.pending = Some(Waiter {
            id,
            expected: expected.to_vec(),
            tx,
        });

        Ok(PendingResponse {
            slot: self.clone(),
            id,
            rx,
        })
    }

    /// Hands `method` to the pending wait if it expects it, otherwise gives
    /// it back.
    pub(crate) fn try_complete(&self, method: Method) -> Result<(), Method> {
        let waiter = {
            let mut state = self.state.lock();
            match &state.pending {
                Some(waiter) if waiter.expected.contains(&method.id()) => state.pending.take(),
                _ => None,
            }
        };

        match waiter {
            Some(waiter) => {
                // The receiver may have been dropped concurrently; the
                // method is then consumed without effect.
                let _ = waiter.tx.send(Ok(method));
                Ok(())
            }
            None => Err(method),
        }
    }

    /// Whether a wait is pending for `id`.
    pub(crate) fn expects(&self, id: MethodId) -> bool {
        self.state
            .lock()
            .pending
            .as_ref()
            .map(|w| w.expected.contains(&id))
            .unwrap_or(false)
    }

    /// Fails the pending wait, if any, without closing the slot.
    pub(crate) fn fail_pending(&self, reason: &CloseReason) {
        let waiter = self.state.lock().pending.take();
        if let Some(waiter) = waiter {
            let _ = waiter.tx.send(Err(reason.clone()));
        }
    }

    /// Fails the pending wait and every later registration. Idempotent:
    /// the first reason sticks.
    pub(crate) fn close(&self, reason: &CloseReason) {
        let waiter = {
            let mut state = self.state.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.clone());
            }
            state.pending.take()
        };
        if let Some(waiter) = waiter {
            let _ = waiter.tx.send(Err(reason.clone()));
        }
    }

    fn clear(&self, id: u64) {
        let mut state = self.state.lock();
        if state.pending.as_ref().map(|w| w.id) == Some(id) {
            state.pending = None;
        }
    }
}

/// An outstanding correlated wait.
///
/// Resolves with the expected method, or with the close reason if the
/// channel or connection fails first.
pub struct PendingResponse {
    slot: Arc<WaitSlot>,
    id: u64,
    rx: oneshot::Receiver<Reply>,
}

impl PendingResponse {
    pub async fn recv(mut self) -> Result<Method, ClientError> {
        match (&mut self.rx).await {
            Ok(Ok(method)) => Ok(method),
            Ok(Err(reason)) => Err(ClientError::Closed(reason)),
            Err(_) => Err(ClientError::Closed(CloseReason::ConnectionDropped)),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.slot.clear(self.id);
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("channel", &self.slot.channel)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amqpmux_protocol::method::{ChannelOpenOk, QueueDeclareOk};
    use amqpmux_protocol::MethodKind;

    fn declare_ok() -> Method {
        QueueDeclareOk {
            queue: "q".into(),
            message_count: 0,
            consumer_count: 0,
        }
        .into()
    }

    #[tokio::test]
    async fn test_wait_completes_on_expected_method() {
        let slot = Arc::new(WaitSlot::new(1));
        let pending = slot.register(&[QueueDeclareOk::ID]).unwrap();
        assert!(slot.expects(QueueDeclareOk::ID));

        let other: Method = ChannelOpenOk.into();
        assert_eq!(slot.try_complete(other.clone()), Err(other));
        assert_eq!(slot.try_complete(declare_ok()), Ok(()));

        let method = pending.recv().await.unwrap();
        assert_eq!(method.id(), QueueDeclareOk::ID);
        assert!(!slot.expects(QueueDeclareOk::ID));
    }

    #[tokio::test]
    async fn test_second_wait_is_rejected() {
        let slot = Arc::new(WaitSlot::new(7));
        let _first = slot.register(&[QueueDeclareOk::ID]).unwrap();
        assert!(matches!(
            slot.register(&[ChannelOpenOk::ID]),
            Err(ClientError::WaitInProgress(7))
        ));
    }

    #[tokio::test]
    async fn test_drop_clears_slot() {
        let slot = Arc::new(WaitSlot::new(1));
        let pending = slot.register(&[QueueDeclareOk::ID]).unwrap();
        drop(pending);
        assert!(!slot.expects(QueueDeclareOk::ID));
        assert!(slot.try_complete(declare_ok()).is_err());
        assert!(slot.register(&[QueueDeclareOk::ID]).is_ok());
    }

    #[tokio::test]
    async fn test_timeout_abandons_wait() {
        let slot = Arc::new(WaitSlot::new(1));
        let pending = slot.register(&[QueueDeclareOk::ID]).unwrap();
        let result =
            tokio::time::timeout(std::time::Duration::from_millis(10), pending.recv()).await;
        assert!(result.is_err());
        assert!(slot.register(&[QueueDeclareOk::ID]).is_ok());
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_future_waits() {
        let slot = Arc::new(WaitSlot::new(1));
        let pending = slot.register(&[QueueDeclareOk::ID]).unwrap();

        let reason = CloseReason::ChannelClosed {
            code: 406,
            text: "PRECONDITION_FAILED".into(),
            failed_method: None,
        };
        slot.close(&reason);
        slot.close(&CloseReason::Local);

        match pending.recv().await {
            Err(ClientError::Closed(CloseReason::ChannelClosed { code, .. })) => {
                assert_eq!(code, 406)
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            slot.register(&[QueueDeclareOk::ID]),
            Err(ClientError::Closed(CloseReason::ChannelClosed { .. }))
        ));
    }
}
