//! Server-push event stream transport with POST sends.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tether_core::errors::TransportError;
use tether_core::transfer::{Payload, TransferFormat, TransportKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::sink::EventSink;
use crate::transport::{Transport, TransportOptions, send_via_post};

const KIND: TransportKind = TransportKind::ServerSentEvents;

/// Event-stream transport. Text format only.
pub struct ServerSentEventsTransport {
    options: TransportOptions,
    sink: EventSink,
    cancel: CancellationToken,
    url: Option<Url>,
    reader: Option<JoinHandle<()>>,
}

impl ServerSentEventsTransport {
    /// Build an unconnected transport.
    pub fn new(options: TransportOptions, sink: EventSink) -> Self {
        Self {
            options,
            sink,
            cancel: CancellationToken::new(),
            url: None,
            reader: None,
        }
    }
}

#[async_trait]
impl Transport for ServerSentEventsTransport {
    fn kind(&self) -> TransportKind {
        KIND
    }

    #[instrument(skip_all, fields(transport = "ServerSentEvents", %format))]
    async fn connect(&mut self, url: &Url, format: TransferFormat) -> Result<(), TransportError> {
        if !KIND.supports_format(format) {
            return Err(TransportError::UnsupportedFormat {
                transport: KIND,
                format,
            });
        }

        let request = self
            .options
            .client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        let request = self.options.authorize(KIND, request).await?;
        debug!(%url, "opening event stream");
        let response = request.send().await.map_err(|e| TransportError::Handshake {
            transport: KIND,
            message: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                transport: KIND,
                status: status.as_u16(),
            });
        }

        let mut events = response.bytes_stream().eventsource();
        let sink = self.sink.clone();
        let options = self.options.clone();
        let cancel = self.cancel.clone();
        self.reader = Some(tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    () = cancel.cancelled() => return,
                    next = events.next() => next,
                };
                match next {
                    Some(Ok(event)) => {
                        let payload = Payload::Text(event.data);
                        options.trace_frame(KIND, "receive", &payload);
                        let _ = sink.data(payload);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "event stream failed");
                        let _ = sink.close(Some(TransportError::Io {
                            transport: KIND,
                            message: e.to_string(),
                        }));
                        return;
                    }
                    None => {
                        debug!("event stream ended by server");
                        let _ = sink.close(None);
                        return;
                    }
                }
            }
        }));
        self.url = Some(url.clone());
        Ok(())
    }

    async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        let Some(url) = self.url.as_ref() else {
            return Err(TransportError::NotConnected(KIND));
        };
        if self.sink.is_closed() {
            return Err(TransportError::NotConnected(KIND));
        }
        send_via_post(KIND, &self.options, url, payload).await
    }

    async fn stop(&mut self, error: Option<TransportError>) {
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
        self.url = None;
        if self.sink.close(error) {
            debug!("event stream transport stopped");
        }
    }
}

impl Drop for ServerSentEventsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
