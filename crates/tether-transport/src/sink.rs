//! Inbound event channel shared by a transport and its background tasks.
//!
//! The channel is single-consumer (the connection driver). [`EventSink::close`]
//! delivers the terminal event exactly once; afterwards the sender is gone and
//! every later `data`/`close` call is a no-op.

use std::sync::Arc;

use parking_lot::Mutex;
use tether_core::errors::TransportError;
use tether_core::transfer::Payload;
use tokio::sync::mpsc;

/// Event delivered from a transport to its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// An inbound frame.
    Data(Payload),
    /// Terminal close. `None` when shutdown was clean.
    Closed(Option<TransportError>),
}

/// Producer half of a transport's event channel.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>>,
}

impl EventSink {
    /// Create a sink and its receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Deliver a frame. Returns `false` once the sink is closed.
    pub fn data(&self, payload: Payload) -> bool {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => tx.send(TransportEvent::Data(payload)).is_ok(),
            None => false,
        }
    }

    /// Deliver the terminal close. Returns `true` only for the first call.
    pub fn close(&self, error: Option<TransportError>) -> bool {
        let Some(tx) = self.tx.lock().take() else {
            return false;
        };
        let _ = tx.send(TransportEvent::Closed(error));
        true
    }

    /// Whether the terminal close has been delivered.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::transfer::TransportKind;

    #[tokio::test]
    async fn close_is_delivered_once() {
        let (sink, mut rx) = EventSink::channel();
        assert!(sink.data(Payload::from("a")));
        assert!(sink.close(None));
        assert!(!sink.close(Some(TransportError::NotConnected(TransportKind::WebSockets))));

        assert_eq!(rx.recv().await, Some(TransportEvent::Data(Payload::from("a"))));
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed(None)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn data_after_close_is_dropped() {
        let (sink, mut rx) = EventSink::channel();
        let clone = sink.clone();
        assert!(clone.close(None));
        assert!(sink.is_closed());
        assert!(!sink.data(Payload::from("late")));
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed(None)));
        assert_eq!(rx.recv().await, None);
    }
}
