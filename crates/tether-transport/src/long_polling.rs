//! Long-polling transport.
//!
//! A background loop keeps exactly one GET outstanding and re-issues it as soon
//! as the previous one completes. Sends are POSTs on a separate channel. Both
//! stop together: `stop` cancels the loop, then tells the server with a DELETE.

use async_trait::async_trait;
use reqwest::StatusCode;
use tether_core::errors::TransportError;
use tether_core::transfer::{Payload, TransferFormat, TransportKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use crate::endpoint::poll_url;
use crate::sink::EventSink;
use crate::transport::{
    SHUTDOWN_TIMEOUT, Transport, TransportOptions, payload_from_body, send_via_post,
};

const KIND: TransportKind = TransportKind::LongPolling;

/// Outcome of one poll request.
#[derive(Debug)]
enum Poll {
    /// 200 with a body.
    Data(bytes::Bytes),
    /// 200 with an empty body, or the request timed out.
    Idle,
    /// 204: the server ended the connection.
    Terminated,
}

/// Long-polling transport.
pub struct LongPollingTransport {
    options: TransportOptions,
    sink: EventSink,
    cancel: CancellationToken,
    url: Option<Url>,
    poller: Option<JoinHandle<()>>,
}

impl LongPollingTransport {
    /// Build an unconnected transport.
    pub fn new(options: TransportOptions, sink: EventSink) -> Self {
        Self {
            options,
            sink,
            cancel: CancellationToken::new(),
            url: None,
            poller: None,
        }
    }
}

async fn poll_once(options: &TransportOptions, url: &Url) -> Result<Poll, TransportError> {
    let request = options
        .client
        .get(poll_url(url))
        .timeout(options.poll_timeout);
    let request = options.authorize(KIND, request).await?;
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) if e.is_timeout() => return Ok(Poll::Idle),
        Err(e) => {
            return Err(TransportError::Io {
                transport: KIND,
                message: e.to_string(),
            });
        }
    };

    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(Poll::Terminated);
    }
    if !status.is_success() {
        return Err(TransportError::Status {
            transport: KIND,
            status: status.as_u16(),
        });
    }
    match response.bytes().await {
        Ok(body) if body.is_empty() => Ok(Poll::Idle),
        Ok(body) => Ok(Poll::Data(body)),
        Err(e) if e.is_timeout() => Ok(Poll::Idle),
        Err(e) => Err(TransportError::Io {
            transport: KIND,
            message: e.to_string(),
        }),
    }
}

async fn poll_loop(
    options: TransportOptions,
    url: Url,
    format: TransferFormat,
    sink: EventSink,
    cancel: CancellationToken,
) {
    loop {
        let outcome = tokio::select! {
            () = cancel.cancelled() => return,
            outcome = poll_once(&options, &url) => outcome,
        };
        match outcome {
            Ok(Poll::Data(body)) => match payload_from_body(KIND, format, body) {
                Ok(payload) => {
                    options.trace_frame(KIND, "receive", &payload);
                    let _ = sink.data(payload);
                }
                Err(e) => {
                    let _ = sink.close(Some(e));
                    return;
                }
            },
            Ok(Poll::Idle) => trace!("poll returned without data, reissuing"),
            Ok(Poll::Terminated) => {
                debug!("poll terminated by server");
                let _ = sink.close(None);
                return;
            }
            Err(e) => {
                warn!(error = %e, "poll failed");
                let _ = sink.close(Some(e));
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for LongPollingTransport {
    fn kind(&self) -> TransportKind {
        KIND
    }

    #[instrument(skip_all, fields(transport = "LongPolling", %format))]
    async fn connect(&mut self, url: &Url, format: TransferFormat) -> Result<(), TransportError> {
        debug!(%url, "issuing initial poll");
        match poll_once(&self.options, url).await? {
            Poll::Terminated => {
                return Err(TransportError::Handshake {
                    transport: KIND,
                    message: "server closed the connection before it was established".into(),
                });
            }
            Poll::Data(body) => {
                let payload = payload_from_body(KIND, format, body)?;
                let _ = self.sink.data(payload);
            }
            Poll::Idle => {}
        }

        self.url = Some(url.clone());
        self.poller = Some(tokio::spawn(poll_loop(
            self.options.clone(),
            url.clone(),
            format,
            self.sink.clone(),
            self.cancel.clone(),
        )));
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
        // A closed sink means the poll loop already saw the server go away.
        let server_gone = self.sink.is_closed();
        self.cancel.cancel();
        if let Some(poller) = self.poller.take() {
            let _ = poller.await;
        }
        if let Some(url) = self.url.take().filter(|_| !server_gone) {
            let request = self.options.client.delete(url).timeout(SHUTDOWN_TIMEOUT);
            match self.options.authorize(KIND, request).await {
                Ok(request) => match request.send().await {
                    Ok(response) => debug!(status = response.status().as_u16(), "DELETE sent"),
                    Err(e) => debug!(error = %e, "DELETE failed"),
                },
                Err(e) => debug!(error = %e, "DELETE skipped"),
            }
        }
        if self.sink.close(error) {
            debug!("long polling transport stopped");
        }
    }
}

impl Drop for LongPollingTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sink::TransportEvent;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hub_url(server: &MockServer) -> Url {
        Url::parse(&format!("{}/hub?id=tok", server.uri())).unwrap()
    }

    async fn mount_poll(server: &MockServer, priority: u8, response: ResponseTemplate, times: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path("/hub"))
            .and(query_param("id", "tok"))
            .respond_with(response)
            .with_priority(priority);
        let mock = match times {
            Some(n) => mock.up_to_n_times(n),
            None => mock,
        };
        mock.mount(server).await;
    }

    #[tokio::test]
    async fn polls_until_server_terminates() {
        let server = MockServer::start().await;
        mount_poll(&server, 1, ResponseTemplate::new(200), Some(1)).await;
        mount_poll(&server, 2, ResponseTemplate::new(200).set_body_string("hello"), Some(1)).await;
        mount_poll(&server, 3, ResponseTemplate::new(204), None).await;

        let (sink, mut rx) = EventSink::channel();
        let mut transport = LongPollingTransport::new(TransportOptions::default(), sink);
        transport
            .connect(&hub_url(&server), TransferFormat::Text)
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Data(Payload::from("hello")))
        );
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed(None)));
    }

    #[tokio::test]
    async fn binary_polls_deliver_binary_frames() {
        let server = MockServer::start().await;
        mount_poll(&server, 1, ResponseTemplate::new(200).set_body_bytes(vec![0xffu8, 0x01]), Some(1)).await;
        mount_poll(&server, 2, ResponseTemplate::new(204), None).await;

        let (sink, mut rx) = EventSink::channel();
        let mut transport = LongPollingTransport::new(TransportOptions::default(), sink);
        transport
            .connect(&hub_url(&server), TransferFormat::Binary)
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Data(Payload::from(vec![0xffu8, 0x01])))
        );
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed(None)));
    }

    #[tokio::test]
    async fn initial_no_content_fails_connect() {
        let server = MockServer::start().await;
        mount_poll(&server, 1, ResponseTemplate::new(204), None).await;

        let (sink, _rx) = EventSink::channel();
        let mut transport = LongPollingTransport::new(TransportOptions::default(), sink);
        let err = transport
            .connect(&hub_url(&server), TransferFormat::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Handshake { .. }));
    }

    #[tokio::test]
    async fn server_error_mid_session_closes_with_error() {
        let server = MockServer::start().await;
        mount_poll(&server, 1, ResponseTemplate::new(200), Some(1)).await;
        mount_poll(&server, 2, ResponseTemplate::new(500), None).await;

        let (sink, mut rx) = EventSink::channel();
        let mut transport = LongPollingTransport::new(TransportOptions::default(), sink);
        transport
            .connect(&hub_url(&server), TransferFormat::Text)
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Closed(Some(TransportError::Status {
                transport: KIND,
                status: 500,
            })))
        );
    }

    #[tokio::test]
    async fn stop_cancels_poll_and_sends_delete() {
        let server = MockServer::start().await;
        mount_poll(&server, 1, ResponseTemplate::new(200), Some(1)).await;
        // Outstanding poll that would hang far longer than the test.
        mount_poll(
            &server,
            2,
            ResponseTemplate::new(200).set_delay(Duration::from_secs(60)),
            None,
        )
        .await;
        Mock::given(method("DELETE"))
            .and(path("/hub"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hub"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (sink, mut rx) = EventSink::channel();
        let mut transport = LongPollingTransport::new(TransportOptions::default(), sink);
        transport
            .connect(&hub_url(&server), TransferFormat::Text)
            .await
            .unwrap();
        transport.send(Payload::from("out")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), transport.stop(None))
            .await
            .expect("stop must not wait for the outstanding poll");
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed(None)));
        assert_eq!(
            transport.send(Payload::from("late")).await.unwrap_err(),
            TransportError::NotConnected(KIND)
        );
    }

    #[tokio::test]
    async fn stop_after_server_error_skips_delete() {
        let server = MockServer::start().await;
        mount_poll(&server, 1, ResponseTemplate::new(200), Some(1)).await;
        mount_poll(&server, 2, ResponseTemplate::new(500), None).await;
        Mock::given(method("DELETE"))
            .and(path("/hub"))
            .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_secs(30)))
            .expect(0)
            .mount(&server)
            .await;

        let (sink, mut rx) = EventSink::channel();
        let mut transport = LongPollingTransport::new(TransportOptions::default(), sink);
        transport
            .connect(&hub_url(&server), TransferFormat::Text)
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(TransportEvent::Closed(Some(_)))));

        tokio::time::timeout(Duration::from_secs(2), transport.stop(None))
            .await
            .expect("stop must not talk to a server that already failed");
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn poll_timeout_reissues_request() {
        let server = MockServer::start().await;
        mount_poll(&server, 1, ResponseTemplate::new(200), Some(1)).await;
        mount_poll(
            &server,
            2,
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(5)),
            Some(1),
        )
        .await;
        mount_poll(&server, 3, ResponseTemplate::new(200).set_body_string("fresh"), Some(1)).await;
        mount_poll(&server, 4, ResponseTemplate::new(204), None).await;

        let options = TransportOptions {
            poll_timeout: Duration::from_millis(200),
            ..TransportOptions::default()
        };
        let (sink, mut rx) = EventSink::channel();
        let mut transport = LongPollingTransport::new(options, sink);
        transport
            .connect(&hub_url(&server), TransferFormat::Text)
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Data(Payload::from("fresh")))
        );
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed(None)));
    }
}
