//! Candidate computation and sequential fallback.
//!
//! The server's advertised order is authoritative. The client only filters
//! (requested mask, transfer format, runtime support) and then walks what is
//! left, one attempt at a time, until a transport connects.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tether_core::errors::{FailedToStartTransportError, TransportError, TransportFailure};
use tether_core::metrics::{CONNECTIONS_ESTABLISHED_TOTAL, TRANSPORT_START_FAILURES_TOTAL};
use tether_core::transfer::{HttpTransportType, TransferFormat, TransportKind};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::negotiate::NegotiateResponse;
use crate::sink::{EventSink, TransportEvent};
use crate::transport::{Transport, TransportFactory, TransportOptions};

/// One transport eligible for this attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportCandidate {
    /// Transport to build.
    pub kind: TransportKind,
    /// Formats the server advertised for it.
    pub transfer_formats: Vec<String>,
}

/// Ordered candidates plus the reasons the rest were filtered out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CandidatePlan {
    /// Candidates in server order.
    pub candidates: Vec<TransportCandidate>,
    /// Advertised transports that were not eligible.
    pub skipped: Vec<TransportFailure>,
}

impl CandidatePlan {
    /// Compute the plan for one attempt.
    pub fn from_response(
        response: &NegotiateResponse,
        requested: HttpTransportType,
        format: TransferFormat,
        factory: &dyn TransportFactory,
    ) -> Self {
        let mut plan = Self::default();
        for advertised in &response.available_transports {
            let Ok(kind) = advertised.transport.parse::<TransportKind>() else {
                debug!(
                    transport = %advertised.transport,
                    "skipping transport not supported by this client"
                );
                continue;
            };

            if !requested.allows(kind) {
                debug!(transport = %kind, "skipping transport disabled by the client");
                plan.skipped
                    .push(TransportFailure::new(kind, "disabled by the client"));
                continue;
            }
            if !advertised
                .transfer_formats
                .iter()
                .any(|f| f == format.as_str())
            {
                debug!(transport = %kind, %format, "server does not offer the requested format");
                plan.skipped.push(TransportFailure::new(
                    kind,
                    format!("the server does not support the '{format}' transfer format"),
                ));
                continue;
            }
            if !kind.supports_format(format) {
                debug!(transport = %kind, %format, "transport cannot carry the requested format");
                plan.skipped.push(TransportFailure::new(
                    kind,
                    format!("does not support the '{format}' transfer format"),
                ));
                continue;
            }
            if !factory.is_supported(kind) {
                debug!(transport = %kind, "transport unavailable in this runtime");
                plan.skipped
                    .push(TransportFailure::new(kind, "not supported in this environment"));
                continue;
            }

            plan.candidates.push(TransportCandidate {
                kind,
                transfer_formats: advertised.transfer_formats.clone(),
            });
        }
        plan
    }

    /// A plan with exactly one candidate, used when negotiation is skipped.
    pub fn single(kind: TransportKind) -> Self {
        Self {
            candidates: vec![TransportCandidate {
                kind,
                transfer_formats: Vec::new(),
            }],
            skipped: Vec::new(),
        }
    }
}

/// Inputs shared by every candidate attempt.
#[derive(Clone, Copy, Debug)]
pub struct ConnectArgs<'a> {
    /// Transport URL (endpoint plus `id`).
    pub url: &'a Url,
    /// Negotiated transfer format.
    pub format: TransferFormat,
    /// Options handed to the factory.
    pub options: &'a TransportOptions,
    /// Upper bound on each candidate's `connect`.
    pub handshake_timeout: Duration,
}

/// A connected transport and the receiving end of its event sink.
pub struct ConnectedTransport {
    /// The open transport.
    pub transport: Box<dyn Transport>,
    /// Inbound frames and the terminal close.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl fmt::Debug for ConnectedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedTransport")
            .field("kind", &self.transport.kind())
            .finish_non_exhaustive()
    }
}

/// Walks a [`CandidatePlan`] until one transport connects.
#[derive(Clone)]
pub struct TransportSelector {
    factory: Arc<dyn TransportFactory>,
}

impl TransportSelector {
    /// Build a selector over `factory`.
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self { factory }
    }

    /// The factory transports are built with.
    pub fn factory(&self) -> &dyn TransportFactory {
        self.factory.as_ref()
    }

    /// Try each candidate in order; the first to connect wins.
    #[instrument(skip_all, fields(url = %args.url, format = %args.format))]
    pub async fn select_and_connect(
        &self,
        plan: CandidatePlan,
        args: ConnectArgs<'_>,
    ) -> Result<ConnectedTransport, FailedToStartTransportError> {
        let CandidatePlan {
            candidates,
            mut skipped,
        } = plan;

        for candidate in candidates {
            let kind = candidate.kind;
            let (sink, events) = EventSink::channel();
            let mut transport = self.factory.create(kind, args.options, sink);
            debug!(transport = %kind, "starting transport");

            let outcome = tokio::time::timeout(
                args.handshake_timeout,
                transport.connect(args.url, args.format),
            )
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Timeout {
                    transport: kind,
                    timeout_ms: args.handshake_timeout.as_millis() as u64,
                })
            });

            match outcome {
                Ok(()) => {
                    metrics::counter!(CONNECTIONS_ESTABLISHED_TOTAL, "transport" => kind.as_str())
                        .increment(1);
                    info!(transport = %kind, "transport connected");
                    return Ok(ConnectedTransport { transport, events });
                }
                Err(e) => {
                    warn!(transport = %kind, error = %e, "failed to start transport, trying the next one");
                    metrics::counter!(TRANSPORT_START_FAILURES_TOTAL, "transport" => kind.as_str())
                        .increment(1);
                    skipped.push(TransportFailure::new(kind, e.to_string()));
                }
            }
        }

        Err(FailedToStartTransportError { failures: skipped })
    }
}

impl fmt::Debug for TransportSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSelector").finish_non_exhaustive()
    }
}
