//! Lifecycle and data events delivered to the single subscriber.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tether_core::errors::ConnectionError;
use tether_core::ids::ConnectionId;
use tether_core::transfer::Payload;
use tokio::sync::mpsc;

/// Something the connection wants the application to know.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Inbound frame from the active transport.
    Received(Payload),
    /// The transport dropped and reconnection began. Carries the drop error.
    Reconnecting(Option<ConnectionError>),
    /// A reconnect attempt succeeded. Carries the new connection id, which is
    /// `None` when negotiation was skipped.
    Reconnected(Option<ConnectionId>),
    /// The lifecycle ended. `None` for a caller-initiated stop.
    Closed(Option<ConnectionError>),
}

/// Receiving end of a connection's event channel.
///
/// Events are buffered until read, so a subscriber that falls behind never
/// blocks the connection.
#[derive(Debug)]
pub struct ConnectionEvents {
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl ConnectionEvents {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<ConnectionEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Next event. `None` once the connection is gone and the buffer is drained.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }

    /// Next buffered event, without waiting.
    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for ConnectionEvents {
    type Item = ConnectionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
