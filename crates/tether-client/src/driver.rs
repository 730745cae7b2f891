//! The connection state machine.
//!
//! One task owns the state, the active transport slot, and the event sender.
//! [`HttpConnection`](crate::HttpConnection) handles talk to it over a command
//! channel, so every transition runs on this task and nothing re-enters it.
//! While a connect attempt or reconnect delay is in flight, commands keep
//! being serviced: `Stop` cancels the attempt, `Start`/`Send` are rejected.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;

use tether_core::errors::{ConnectionError, NegotiationError};
use tether_core::ids::ConnectionId;
use tether_core::metrics::RECONNECT_ATTEMPTS_TOTAL;
use tether_core::retry::{RetryContext, RetryPolicy};
use tether_core::state::ConnectionState;
use tether_core::transfer::{Payload, TransferFormat, TransportKind};
use tether_transport::negotiate::{Negotiation, Negotiator};
use tether_transport::selector::{CandidatePlan, ConnectArgs, ConnectedTransport, TransportSelector};
use tether_transport::sink::TransportEvent;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::events::ConnectionEvent;
use crate::options::HttpConnectionOptions;

/// Published view of the state machine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Id issued by the last successful negotiation, while connected.
    pub connection_id: Option<ConnectionId>,
}

/// Requests from handles to the driver.
pub(crate) enum Command {
    Start {
        format: TransferFormat,
        reply: oneshot::Sender<Result<(), ConnectionError>>,
    },
    Send {
        payload: Payload,
        reply: oneshot::Sender<Result<(), ConnectionError>>,
    },
    Stop {
        error: Option<ConnectionError>,
        reply: oneshot::Sender<()>,
    },
    ConnectionLost {
        error: ConnectionError,
    },
}

/// Everything a connect attempt needs; shared with in-flight attempts.
pub(crate) struct ConnectContext {
    pub(crate) base_url: Url,
    pub(crate) options: HttpConnectionOptions,
    negotiator: Negotiator,
    selector: TransportSelector,
}

impl ConnectContext {
    pub(crate) fn new(base_url: Url, options: HttpConnectionOptions) -> Self {
        let negotiator = Negotiator::new(
            options.http_client.clone(),
            options.headers.clone(),
            options.max_redirects,
        );
        let selector = TransportSelector::new(Arc::clone(&options.transport_factory));
        Self {
            base_url,
            options,
            negotiator,
            selector,
        }
    }
}

/// A successful attempt.
struct Established {
    connected: ConnectedTransport,
    connection_id: Option<ConnectionId>,
}

/// How a future run under [`Driver::interruptible`] ended.
enum Interrupted<T> {
    Completed(T),
    Stopped {
        error: Option<ConnectionError>,
        reply: oneshot::Sender<()>,
    },
    /// Every handle is gone.
    Abandoned,
}

/// What woke the idle loop.
enum Wake {
    Command(Option<Command>),
    Transport(Option<TransportEvent>),
}

/// Negotiate (unless skipped) and connect the first transport that works.
#[instrument(skip_all, fields(url = %ctx.base_url, %format, skip_negotiation = skip))]
async fn establish(
    ctx: Arc<ConnectContext>,
    format: TransferFormat,
    skip: bool,
) -> Result<Established, ConnectionError> {
    let options = &ctx.options;
    let (negotiation, plan) = if skip {
        if options.transport.exact() != Some(TransportKind::WebSockets) {
            return Err(NegotiationError::SkipNotAllowed.into());
        }
        debug!("skipping negotiation");
        (
            Negotiation::skipped(ctx.base_url.clone(), options.access_token.clone()),
            CandidatePlan::single(TransportKind::WebSockets),
        )
    } else {
        let negotiation = ctx
            .negotiator
            .negotiate(&ctx.base_url, options.access_token.clone())
            .await?;
        let plan = CandidatePlan::from_response(
            &negotiation.response,
            options.transport,
            format,
            ctx.selector.factory(),
        );
        (negotiation, plan)
    };

    let url = negotiation.connect_url();
    let transport_options = options.transport_options(negotiation.access_token.clone());
    let connected = ctx
        .selector
        .select_and_connect(
            plan,
            ConnectArgs {
                url: &url,
                format,
                options: &transport_options,
                handshake_timeout: options.handshake_timeout,
            },
        )
        .await?;

    Ok(Established {
        connected,
        connection_id: negotiation.connection_id().cloned(),
    })
}

pub(crate) struct Driver {
    ctx: Arc<ConnectContext>,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<Snapshot>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    active: Option<ConnectedTransport>,
    format: TransferFormat,
}

impl Driver {
    pub(crate) fn new(
        ctx: Arc<ConnectContext>,
        commands: mpsc::UnboundedReceiver<Command>,
        status: watch::Sender<Snapshot>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            ctx,
            commands,
            status,
            events,
            active: None,
            format: TransferFormat::Text,
        }
    }

    /// Run until every handle is dropped.
    pub(crate) async fn run(mut self) {
        loop {
            let wake = match self.active.as_mut() {
                Some(active) => tokio::select! {
                    command = self.commands.recv() => Wake::Command(command),
                    event = active.events.recv() => Wake::Transport(event),
                },
                None => Wake::Command(self.commands.recv().await),
            };

            let flow = match wake {
                Wake::Command(Some(command)) => self.handle(command).await,
                Wake::Command(None) => {
                    self.shutdown().await;
                    ControlFlow::Break(())
                }
                Wake::Transport(Some(TransportEvent::Data(payload))) => {
                    self.emit(ConnectionEvent::Received(payload));
                    ControlFlow::Continue(())
                }
                Wake::Transport(Some(TransportEvent::Closed(error))) => {
                    self.transport_closed(error.map(ConnectionError::from)).await
                }
                Wake::Transport(None) => {
                    self.transport_closed(Some(ConnectionError::Lost(
                        "transport went away without closing".into(),
                    )))
                    .await
                }
            };
            if flow.is_break() {
                debug!("connection driver exiting");
                return;
            }
        }
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Start { format, reply } => return self.start(format, reply).await,
            Command::Send { payload, reply } => {
                let result = match self.active.as_ref() {
                    Some(active) => active
                        .transport
                        .send(payload)
                        .await
                        .map_err(ConnectionError::from),
                    None => Err(self.invalid_state("send data on")),
                };
                let _ = reply.send(result);
            }
            Command::Stop { error, reply } => {
                self.stop(error).await;
                let _ = reply.send(());
            }
            Command::ConnectionLost { error } => {
                let Some(mut active) = self.active.take() else {
                    debug!(%error, "ignoring connection_lost while not connected");
                    return ControlFlow::Continue(());
                };
                warn!(%error, "connection declared lost");
                active.transport.stop(None).await;
                return self.unexpected_close(Some(error)).await;
            }
        }
        ControlFlow::Continue(())
    }

    async fn start(
        &mut self,
        format: TransferFormat,
        reply: oneshot::Sender<Result<(), ConnectionError>>,
    ) -> ControlFlow<()> {
        if self.state() != ConnectionState::Disconnected {
            let _ = reply.send(Err(self.invalid_state("start")));
            return ControlFlow::Continue(());
        }

        self.format = format;
        self.set_state(ConnectionState::Connecting, None);
        info!(url = %self.ctx.base_url, %format, "starting connection");

        let skip = self.ctx.options.skip_negotiation;
        let attempt = establish(Arc::clone(&self.ctx), format, skip);
        match self.interruptible(attempt).await {
            Interrupted::Completed(Ok(established)) => {
                self.connected(established);
                let _ = reply.send(Ok(()));
            }
            Interrupted::Completed(Err(error)) => {
                warn!(%error, "failed to start the connection");
                self.set_state(ConnectionState::Disconnected, None);
                self.emit(ConnectionEvent::Closed(Some(error.clone())));
                let _ = reply.send(Err(error));
            }
            Interrupted::Stopped {
                error,
                reply: stop_reply,
            } => {
                info!("connection stopped while starting");
                self.set_state(ConnectionState::Disconnected, None);
                self.emit(ConnectionEvent::Closed(error));
                let _ = reply.send(Err(ConnectionError::Stopped));
                let _ = stop_reply.send(());
            }
            Interrupted::Abandoned => {
                self.set_state(ConnectionState::Disconnected, None);
                self.emit(ConnectionEvent::Closed(None));
                let _ = reply.send(Err(ConnectionError::Stopped));
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn stop(&mut self, error: Option<ConnectionError>) {
        let Some(mut active) = self.active.take() else {
            debug!("stop ignored: connection is already disconnected");
            return;
        };
        let connection_id = self.status.borrow().connection_id.clone();
        self.set_state(ConnectionState::Disconnecting, connection_id);
        info!(transport = %active.transport.kind(), "stopping connection");
        active.transport.stop(None).await;
        self.set_state(ConnectionState::Disconnected, None);
        self.emit(ConnectionEvent::Closed(error));
    }

    async fn transport_closed(&mut self, error: Option<ConnectionError>) -> ControlFlow<()> {
        // The transport is already dead; dropping it cancels its tasks without
        // another round trip to the server.
        drop(self.active.take());
        match &error {
            Some(error) => warn!(%error, "transport closed unexpectedly"),
            None => info!("transport closed by the server"),
        }
        self.unexpected_close(error).await
    }

    async fn unexpected_close(&mut self, error: Option<ConnectionError>) -> ControlFlow<()> {
        match self.ctx.options.reconnect_policy.clone() {
            Some(policy) => self.reconnect(policy, error).await,
            None => {
                self.set_state(ConnectionState::Disconnected, None);
                self.emit(ConnectionEvent::Closed(error));
                ControlFlow::Continue(())
            }
        }
    }

    /// One reconnect episode.
    async fn reconnect(
        &mut self,
        policy: Arc<dyn RetryPolicy>,
        error: Option<ConnectionError>,
    ) -> ControlFlow<()> {
        let started = Instant::now();
        let mut previous_retry_count = 0u32;
        // A clean drop followed by no attempt at all closes cleanly.
        let mut last_error = error.clone();
        let mut retry_reason = error
            .clone()
            .unwrap_or_else(|| ConnectionError::Lost("transport closed without an error".into()));
        let skip = self.ctx.options.skip_negotiation && self.ctx.options.skip_negotiation_on_reconnect;

        self.set_state(ConnectionState::Reconnecting, None);
        self.emit(ConnectionEvent::Reconnecting(error));

        loop {
            let context = RetryContext {
                previous_retry_count,
                elapsed: started.elapsed(),
                retry_reason: retry_reason.clone(),
            };
            let Some(delay) = policy.next_retry_delay(&context) else {
                warn!(
                    attempts = previous_retry_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %retry_reason,
                    "reconnect retries exhausted, not reconnecting"
                );
                self.set_state(ConnectionState::Disconnected, None);
                self.emit(ConnectionEvent::Closed(last_error));
                return ControlFlow::Continue(());
            };

            let attempt = previous_retry_count + 1;
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect attempt scheduled");
            let ctx = Arc::clone(&self.ctx);
            let format = self.format;
            let delayed_attempt = async move {
                tokio::time::sleep(delay).await;
                metrics::counter!(RECONNECT_ATTEMPTS_TOTAL).increment(1);
                establish(ctx, format, skip).await
            };

            match self.interruptible(delayed_attempt).await {
                Interrupted::Completed(Ok(established)) => {
                    info!(
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "reconnected"
                    );
                    let connection_id = established.connection_id.clone();
                    self.connected(established);
                    self.emit(ConnectionEvent::Reconnected(connection_id));
                    return ControlFlow::Continue(());
                }
                Interrupted::Completed(Err(error)) => {
                    warn!(attempt, %error, "reconnect attempt failed");
                    previous_retry_count += 1;
                    last_error = Some(error.clone());
                    retry_reason = error;
                }
                Interrupted::Stopped { error, reply } => {
                    info!("connection stopped while reconnecting");
                    self.set_state(ConnectionState::Disconnected, None);
                    self.emit(ConnectionEvent::Closed(error));
                    let _ = reply.send(());
                    return ControlFlow::Continue(());
                }
                Interrupted::Abandoned => {
                    self.set_state(ConnectionState::Disconnected, None);
                    self.emit(ConnectionEvent::Closed(None));
                    return ControlFlow::Break(());
                }
            }
        }
    }

    /// Drive `fut` to completion while answering commands.
    async fn interruptible<T>(&mut self, fut: impl Future<Output = T>) -> Interrupted<T> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                output = &mut fut => return Interrupted::Completed(output),
                command = self.commands.recv() => match command {
                    None => return Interrupted::Abandoned,
                    Some(Command::Stop { error, reply }) => {
                        return Interrupted::Stopped { error, reply };
                    }
                    Some(Command::Start { reply, .. }) => {
                        let _ = reply.send(Err(self.invalid_state("start")));
                    }
                    Some(Command::Send { reply, .. }) => {
                        let _ = reply.send(Err(self.invalid_state("send data on")));
                    }
                    Some(Command::ConnectionLost { error }) => {
                        debug!(%error, "ignoring connection_lost while no transport is connected");
                    }
                },
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.active.is_some() {
            debug!("all handles dropped, stopping connection");
            self.stop(None).await;
        }
    }

    fn connected(&mut self, established: Established) {
        let Established {
            connected,
            connection_id,
        } = established;
        info!(
            transport = %connected.transport.kind(),
            connection_id = connection_id.as_ref().map(ConnectionId::as_str),
            "connection established"
        );
        self.active = Some(connected);
        self.set_state(ConnectionState::Connected, connection_id);
    }

    fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    fn set_state(&self, state: ConnectionState, connection_id: Option<ConnectionId>) {
        let previous = self.status.send_replace(Snapshot {
            state,
            connection_id,
        });
        if previous.state != state {
            debug!(from = %previous.state, to = %state, "connection state changed");
        }
    }

    fn invalid_state(&self, operation: &'static str) -> ConnectionError {
        ConnectionError::InvalidState {
            operation,
            state: self.state(),
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}
