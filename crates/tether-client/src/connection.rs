//! The public connection handle.

use std::sync::Arc;

use parking_lot::Mutex;
use tether_core::errors::ConnectionError;
use tether_core::ids::ConnectionId;
use tether_core::state::ConnectionState;
use tether_core::transfer::{Payload, TransferFormat};
use tether_transport::endpoint;
use tokio::sync::{mpsc, oneshot, watch};
use url::Url;

use crate::driver::{Command, ConnectContext, Driver, Snapshot};
use crate::events::ConnectionEvents;
use crate::options::HttpConnectionOptions;

/// Handle to one logical connection.
///
/// Cloning is cheap; all clones drive the same connection. When the last
/// clone is dropped the connection is stopped and its driver task exits.
#[derive(Clone, Debug)]
pub struct HttpConnection {
    base_url: Url,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Snapshot>,
    events: Arc<Mutex<Option<ConnectionEvents>>>,
}

impl HttpConnection {
    /// Create a disconnected connection to `url` and spawn its driver.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(url: &str, options: HttpConnectionOptions) -> Result<Self, ConnectionError> {
        let base_url = endpoint::parse(url)?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(Snapshot::default());
        let (event_tx, events) = ConnectionEvents::channel();

        let ctx = Arc::new(ConnectContext::new(base_url.clone(), options));
        let driver = Driver::new(ctx, command_rx, status_tx, event_tx);
        let _ = tokio::spawn(driver.run());

        Ok(Self {
            base_url,
            commands,
            status,
            events: Arc::new(Mutex::new(Some(events))),
        })
    }

    /// Negotiate and connect. Resolves once a transport is open.
    ///
    /// Initial failures are returned here and never retried. A concurrent
    /// [`stop`](Self::stop) makes this fail with [`ConnectionError::Stopped`].
    pub async fn start(&self, format: TransferFormat) -> Result<(), ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Start { format, reply })?;
        rx.await.map_err(|_| ConnectionError::DriverGone)?
    }

    /// Send one frame on the active transport.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<(), ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send {
            payload: payload.into(),
            reply,
        })?;
        rx.await.map_err(|_| ConnectionError::DriverGone)?
    }

    /// Stop the connection, cancelling any in-flight start or reconnect.
    ///
    /// Resolves once the connection is disconnected. `error` is reported in
    /// the `Closed` event. A no-op when already disconnected.
    pub async fn stop(&self, error: Option<ConnectionError>) {
        let (reply, rx) = oneshot::channel();
        if self.command(Command::Stop { error, reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Declare the connection dead (e.g. a keep-alive timed out). While
    /// connected this behaves like an unexpected transport drop; otherwise it
    /// is ignored.
    pub fn connection_lost(&self, error: ConnectionError) {
        let _ = self.command(Command::ConnectionLost { error });
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Id of the current connection, while connected with negotiation.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.status.borrow().connection_id.clone()
    }

    /// Watch state changes.
    pub fn status(&self) -> watch::Receiver<Snapshot> {
        self.status.clone()
    }

    /// Take the event stream. Only the first call returns `Some`.
    pub fn take_events(&self) -> Option<ConnectionEvents> {
        self.events.lock().take()
    }

    /// URL the connection negotiates against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn command(&self, command: Command) -> Result<(), ConnectionError> {
        self.commands
            .send(command)
            .map_err(|_| ConnectionError::DriverGone)
    }
}
