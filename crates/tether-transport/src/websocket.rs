//! Full-duplex socket transport.
//!
//! The upgrade request carries custom headers and the bearer token. A reader
//! task maps inbound frames onto the sink; sends go straight to the write half.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tether_core::errors::TransportError;
use tether_core::transfer::{Payload, TransferFormat, TransportKind};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::endpoint::websocket_url;
use crate::sink::EventSink;
use crate::transport::{SHUTDOWN_TIMEOUT, Transport, TransportOptions};

const KIND: TransportKind = TransportKind::WebSockets;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = Arc<Mutex<SplitSink<Socket, Message>>>;

/// Socket transport over `tokio-tungstenite`.
pub struct WebSocketTransport {
    options: TransportOptions,
    sink: EventSink,
    cancel: CancellationToken,
    writer: Option<Writer>,
    reader: Option<JoinHandle<()>>,
    format: TransferFormat,
}

impl WebSocketTransport {
    /// Build an unconnected transport.
    pub fn new(options: TransportOptions, sink: EventSink) -> Self {
        Self {
            options,
            sink,
            cancel: CancellationToken::new(),
            writer: None,
            reader: None,
            format: TransferFormat::Text,
        }
    }

    fn handshake_error(message: impl ToString) -> TransportError {
        TransportError::Handshake {
            transport: KIND,
            message: message.to_string(),
        }
    }

    async fn build_request(
        &self,
        url: &Url,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, TransportError> {
        let ws_url = websocket_url(url);
        let mut request = ws_url
            .as_str()
            .into_client_request()
            .map_err(Self::handshake_error)?;
        let headers = request.headers_mut();
        for (name, value) in &self.options.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(Self::handshake_error)?;
            let value = HeaderValue::from_str(value).map_err(Self::handshake_error)?;
            let _ = headers.insert(name, value);
        }
        if let Some(token) = self.options.bearer(KIND).await? {
            let value =
                HeaderValue::from_str(&format!("Bearer {token}")).map_err(Self::handshake_error)?;
            let _ = headers.insert(AUTHORIZATION, value);
        }
        Ok(request)
    }
}

/// Map a peer close frame to the close error. Code 1000 is a clean close.
fn close_error(frame: Option<&CloseFrame>) -> Option<TransportError> {
    match frame {
        Some(frame) if frame.code == CloseCode::Normal => None,
        Some(frame) => Some(TransportError::RemoteClosed {
            transport: KIND,
            code: u16::from(frame.code),
            reason: frame.reason.to_string(),
        }),
        None => None,
    }
}

async fn read_loop(
    mut read: SplitStream<Socket>,
    sink: EventSink,
    options: TransportOptions,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return,
            next = read.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                let payload = Payload::Text(text.to_string());
                options.trace_frame(KIND, "receive", &payload);
                let _ = sink.data(payload);
            }
            Some(Ok(Message::Binary(bytes))) => {
                let payload = Payload::Binary(bytes);
                options.trace_frame(KIND, "receive", &payload);
                let _ = sink.data(payload);
            }
            Some(Ok(Message::Close(frame))) => {
                let error = close_error(frame.as_ref());
                debug!(?frame, "socket closed by peer");
                let _ = sink.close(error);
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "socket read failed");
                let _ = sink.close(Some(TransportError::Io {
                    transport: KIND,
                    message: e.to_string(),
                }));
                return;
            }
            None => {
                let _ = sink.close(Some(TransportError::RemoteClosed {
                    transport: KIND,
                    code: 1006,
                    reason: "connection dropped without a close frame".into(),
                }));
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        KIND
    }

    #[instrument(skip_all, fields(transport = "WebSockets", %format))]
    async fn connect(&mut self, url: &Url, format: TransferFormat) -> Result<(), TransportError> {
        let request = self.build_request(url).await?;
        debug!(url = %websocket_url(url), "opening socket");
        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(Self::handshake_error)?;
        let (write, read) = socket.split();
        self.format = format;
        self.writer = Some(Arc::new(Mutex::new(write)));
        self.reader = Some(tokio::spawn(read_loop(
            read,
            self.sink.clone(),
            self.options.clone(),
            self.cancel.clone(),
        )));
        debug!("socket connected");
        Ok(())
    }

    async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        let Some(writer) = self.writer.as_ref() else {
            return Err(TransportError::NotConnected(KIND));
        };
        if self.sink.is_closed() {
            return Err(TransportError::NotConnected(KIND));
        }
        self.options.trace_frame(KIND, "send", &payload);
        let message = match (self.format, payload) {
            (TransferFormat::Binary, Payload::Text(text)) => Message::Binary(text.into_bytes().into()),
            (_, Payload::Binary(bytes)) => Message::Binary(bytes),
            (TransferFormat::Text, Payload::Text(text)) => Message::Text(text.into()),
        };
        writer
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| TransportError::Io {
                transport: KIND,
                message: e.to_string(),
            })
    }

    async fn stop(&mut self, error: Option<TransportError>) {
        self.cancel.cancel();
        if let Some(writer) = self.writer.take().filter(|_| !self.sink.is_closed()) {
            let goodbye = async {
                let mut writer = writer.lock().await;
                let _ = writer.send(Message::Close(None)).await;
                let _ = writer.close().await;
            };
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, goodbye).await.is_err() {
                debug!("close handshake timed out");
            }
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
        if self.sink.close(error) {
            debug!("socket transport stopped");
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
