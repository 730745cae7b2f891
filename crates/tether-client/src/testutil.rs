//! Scripted transports and a counting negotiate server for lifecycle tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tether_core::errors::TransportError;
use tether_core::transfer::{Payload, TransferFormat, TransportKind};
use tether_transport::{EventSink, Transport, TransportFactory, TransportOptions};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use crate::events::{ConnectionEvent, ConnectionEvents};
use crate::options::HttpConnectionOptions;

/// What the next transport's `connect` does.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Script {
    Connect,
    Fail,
    Hang,
}

#[derive(Default)]
struct FakeState {
    scripts: VecDeque<Script>,
    connects: Vec<(TransportKind, Url)>,
    sinks: Vec<EventSink>,
    sent: Vec<Payload>,
    stops: usize,
}

/// Factory whose transports follow a script. Unscripted connects succeed.
#[derive(Clone, Default)]
pub(crate) struct FakeFactory {
    state: Arc<Mutex<FakeState>>,
}

impl FakeFactory {
    pub(crate) fn scripted(scripts: impl IntoIterator<Item = Script>) -> Self {
        let factory = Self::default();
        factory.state.lock().scripts = scripts.into_iter().collect();
        factory
    }

    /// Every `connect` call, in order.
    pub(crate) fn connects(&self) -> Vec<(TransportKind, Url)> {
        self.state.lock().connects.clone()
    }

    pub(crate) fn sent(&self) -> Vec<Payload> {
        self.state.lock().sent.clone()
    }

    pub(crate) fn stops(&self) -> usize {
        self.state.lock().stops
    }

    /// Deliver a frame on the most recent transport.
    pub(crate) fn push_frame(&self, payload: Payload) {
        let state = self.state.lock();
        let sink = state.sinks.last().expect("no transport created");
        assert!(sink.data(payload));
    }

    /// Close the most recent transport as if the server dropped it.
    pub(crate) fn drop_connection(&self, error: Option<TransportError>) {
        let state = self.state.lock();
        let sink = state.sinks.last().expect("no transport created");
        assert!(sink.close(error));
    }
}

impl TransportFactory for FakeFactory {
    fn create(&self, kind: TransportKind, _options: &TransportOptions, sink: EventSink) -> Box<dyn Transport> {
        self.state.lock().sinks.push(sink.clone());
        Box::new(FakeTransport {
            kind,
            sink,
            state: Arc::clone(&self.state),
            open: false,
        })
    }
}

struct FakeTransport {
    kind: TransportKind,
    sink: EventSink,
    state: Arc<Mutex<FakeState>>,
    open: bool,
}

#[async_trait]
impl Transport for FakeTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&mut self, url: &Url, _format: TransferFormat) -> Result<(), TransportError> {
        let script = {
            let mut state = self.state.lock();
            state.connects.push((self.kind, url.clone()));
            state.scripts.pop_front().unwrap_or(Script::Connect)
        };
        match script {
            Script::Connect => {
                self.open = true;
                Ok(())
            }
            Script::Fail => Err(TransportError::Handshake {
                transport: self.kind,
                message: "scripted failure".into(),
            }),
            Script::Hang => std::future::pending().await,
        }
    }

    async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        if !self.open || self.sink.is_closed() {
            return Err(TransportError::NotConnected(self.kind));
        }
        self.state.lock().sent.push(payload);
        Ok(())
    }

    async fn stop(&mut self, error: Option<TransportError>) {
        self.open = false;
        self.state.lock().stops += 1;
        let _ = self.sink.close(error);
    }
}

/// Answers every negotiate with a fresh `conn-N` / `token-N` pair.
struct CountingNegotiate {
    count: AtomicUsize,
}

impl Respond for CountingNegotiate {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        ResponseTemplate::new(200).set_body_json(json!({
            "connectionId": format!("conn-{n}"),
            "connectionToken": format!("token-{n}"),
            "negotiateVersion": 1,
            "availableTransports": [
                { "transport": "WebSockets", "transferFormats": ["Text", "Binary"] }
            ]
        }))
    }
}

/// Server answering `POST /hub/negotiate`.
pub(crate) async fn negotiate_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hub/negotiate"))
        .respond_with(CountingNegotiate {
            count: AtomicUsize::new(0),
        })
        .mount(&server)
        .await;
    server
}

pub(crate) fn hub_url(server: &MockServer) -> String {
    format!("{}/hub", server.uri())
}

/// Negotiate requests the server has seen.
pub(crate) async fn negotiate_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().ends_with("/negotiate"))
        .count()
}

pub(crate) fn options(factory: &FakeFactory) -> HttpConnectionOptions {
    HttpConnectionOptions::default().with_transport_factory(Arc::new(factory.clone()))
}

pub(crate) async fn next_event(events: &mut ConnectionEvents) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}
