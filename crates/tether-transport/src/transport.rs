//! The transport abstraction and its factory.
//!
//! One trait, three implementations. The set of kinds is closed
//! ([`TransportKind`]); [`DefaultTransportFactory`] matches on it. The factory
//! trait exists so the connection can be driven by scripted transports in tests.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tether_core::auth::{self, SharedTokenProvider};
use tether_core::errors::TransportError;
use tether_core::transfer::{Payload, TransferFormat, TransportKind};
use tracing::trace;
use url::Url;

use crate::long_polling::LongPollingTransport;
use crate::sink::EventSink;
use crate::sse::ServerSentEventsTransport;
use crate::websocket::WebSocketTransport;

/// Default long-poll request timeout.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(100);

/// Upper bound on the goodbye a transport sends while stopping (DELETE, close
/// frame). Stop never waits longer than this on the network.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected (or connectable) duplex channel.
///
/// Inbound frames and the terminal close are delivered through the
/// [`EventSink`] the transport was built with.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> TransportKind;

    /// Open the channel. Resolves once it is usable.
    async fn connect(&mut self, url: &Url, format: TransferFormat) -> Result<(), TransportError>;

    /// Send one frame. No delivery confirmation.
    async fn send(&self, payload: Payload) -> Result<(), TransportError>;

    /// Idempotent shutdown. The sink sees exactly one `Closed`, carrying
    /// `error` if this shutdown was not caller-initiated.
    async fn stop(&mut self, error: Option<TransportError>);
}

/// Settings shared by every transport built for one connection attempt.
#[derive(Clone)]
pub struct TransportOptions {
    /// HTTP client for negotiate, SSE, and long-poll requests.
    pub client: reqwest::Client,
    /// Bearer token source.
    pub access_token: Option<SharedTokenProvider>,
    /// Extra headers on every request.
    pub headers: BTreeMap<String, String>,
    /// Per-request timeout of a long poll.
    pub poll_timeout: Duration,
    /// Log frame contents at `trace`.
    pub log_message_content: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: None,
            headers: BTreeMap::new(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            log_message_content: false,
        }
    }
}

impl fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportOptions")
            .field("access_token", &self.access_token.is_some())
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("poll_timeout", &self.poll_timeout)
            .field("log_message_content", &self.log_message_content)
            .finish_non_exhaustive()
    }
}

impl TransportOptions {
    /// Resolve the bearer token, mapping provider failure to a handshake error.
    pub(crate) async fn bearer(&self, kind: TransportKind) -> Result<Option<String>, TransportError> {
        auth::resolve(self.access_token.as_ref())
            .await
            .map_err(|message| TransportError::Handshake {
                transport: kind,
                message: format!("access token provider failed: {message}"),
            })
    }

    /// Apply custom headers and the bearer token to a request.
    pub(crate) async fn authorize(
        &self,
        kind: TransportKind,
        mut request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = self.bearer(kind).await? {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        Ok(request)
    }

    /// Trace-log a frame, honoring `log_message_content`.
    pub(crate) fn trace_frame(&self, kind: TransportKind, direction: &str, payload: &Payload) {
        if self.log_message_content {
            trace!(transport = %kind, direction, content = %payload.describe(), "frame");
        } else {
            trace!(transport = %kind, direction, bytes = payload.len(), "frame");
        }
    }
}

/// POST one frame on the side channel used by SSE and long polling.
pub(crate) async fn send_via_post(
    kind: TransportKind,
    options: &TransportOptions,
    url: &Url,
    payload: Payload,
) -> Result<(), TransportError> {
    options.trace_frame(kind, "send", &payload);
    let (content_type, body) = match payload {
        Payload::Text(text) => ("text/plain;charset=UTF-8", reqwest::Body::from(text)),
        Payload::Binary(bytes) => ("application/octet-stream", reqwest::Body::from(bytes)),
    };
    let request = options
        .client
        .post(url.clone())
        .header(CONTENT_TYPE, content_type)
        .body(body);
    let request = options.authorize(kind, request).await?;
    let response = request.send().await.map_err(|e| TransportError::Io {
        transport: kind,
        message: e.to_string(),
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            transport: kind,
            status: status.as_u16(),
        });
    }
    Ok(())
}

/// Builds transports by kind.
pub trait TransportFactory: Send + Sync {
    /// Whether this runtime can build `kind`.
    fn is_supported(&self, kind: TransportKind) -> bool {
        let _ = kind;
        true
    }

    /// Build an unconnected transport delivering events into `sink`.
    fn create(
        &self,
        kind: TransportKind,
        options: &TransportOptions,
        sink: EventSink,
    ) -> Box<dyn Transport>;
}

/// Builds the real socket, event-stream, and long-polling transports.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(
        &self,
        kind: TransportKind,
        options: &TransportOptions,
        sink: EventSink,
    ) -> Box<dyn Transport> {
        match kind {
            TransportKind::WebSockets => Box::new(WebSocketTransport::new(options.clone(), sink)),
            TransportKind::ServerSentEvents => {
                Box::new(ServerSentEventsTransport::new(options.clone(), sink))
            }
            TransportKind::LongPolling => {
                Box::new(LongPollingTransport::new(options.clone(), sink))
            }
        }
    }
}

/// Map a payload received over HTTP into the negotiated format.
pub(crate) fn payload_from_body(
    kind: TransportKind,
    format: TransferFormat,
    body: bytes::Bytes,
) -> Result<Payload, TransportError> {
    match format {
        TransferFormat::Binary => Ok(Payload::Binary(body)),
        TransferFormat::Text => String::from_utf8(body.to_vec())
            .map(Payload::Text)
            .map_err(|e| TransportError::Io {
                transport: kind,
                message: format!("received invalid UTF-8 text frame: {e}"),
            }),
    }
}
