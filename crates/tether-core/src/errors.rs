//! Error hierarchy for negotiation, transports, and the connection lifecycle.
//!
//! Every error here is `Clone`: the same value is returned to the caller,
//! carried in lifecycle events, and stored as the retry reason. Underlying
//! library errors are therefore flattened to their message at the boundary.

use std::fmt;

use crate::state::ConnectionState;
use crate::transfer::{TransferFormat, TransportKind};

/// Failure of the negotiate handshake.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// The HTTP request itself failed (DNS, connect, TLS, body read).
    #[error("failed to complete negotiation with the server: {0}")]
    Http(String),

    /// The server answered with a non-2xx status.
    #[error("unexpected status code returned from negotiate '{status}': {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The response body did not match the negotiate shape.
    #[error("malformed negotiate response: {0}")]
    Malformed(String),

    /// The server refused the connection through the `error` field.
    #[error("server rejected negotiation: {0}")]
    Rejected(String),

    /// Redirect chain longer than the configured ceiling.
    #[error("negotiate redirection limit exceeded ({0} redirects)")]
    TooManyRedirects(usize),

    /// The access token provider failed.
    #[error("access token provider failed: {0}")]
    AccessToken(String),

    /// Skip-negotiation requested with anything other than exactly WebSockets.
    #[error("negotiation can only be skipped when using the WebSockets transport directly")]
    SkipNotAllowed,

    /// The base URL or a redirect URL could not be parsed.
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Parse failure.
        reason: String,
    },
}

/// Failure of one transport, at connect time or mid-session.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// `send` or an operation requiring an open channel was called while closed.
    #[error("{0} transport is not connected")]
    NotConnected(TransportKind),

    /// The transport cannot carry the requested transfer format.
    #[error("{transport} transport does not support the '{format}' transfer format")]
    UnsupportedFormat {
        /// Transport kind.
        transport: TransportKind,
        /// Requested format.
        format: TransferFormat,
    },

    /// The handshake did not complete within the configured timeout.
    #[error("{transport} handshake timed out after {timeout_ms} ms")]
    Timeout {
        /// Transport kind.
        transport: TransportKind,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The handshake was rejected or failed.
    #[error("{transport} handshake failed: {message}")]
    Handshake {
        /// Transport kind.
        transport: TransportKind,
        /// Failure description.
        message: String,
    },

    /// An HTTP request issued by the transport returned an error status.
    #[error("{transport} request returned status code {status}")]
    Status {
        /// Transport kind.
        transport: TransportKind,
        /// HTTP status code.
        status: u16,
    },

    /// I/O failure on an open channel.
    #[error("{transport} i/o error: {message}")]
    Io {
        /// Transport kind.
        transport: TransportKind,
        /// Failure description.
        message: String,
    },

    /// The remote end closed the channel abnormally.
    #[error("{transport} closed with status code {code} ({reason})")]
    RemoteClosed {
        /// Transport kind.
        transport: TransportKind,
        /// Close code reported by the peer.
        code: u16,
        /// Close reason reported by the peer.
        reason: String,
    },
}

impl TransportError {
    /// Transport kind this error came from.
    pub fn transport(&self) -> TransportKind {
        match self {
            Self::NotConnected(transport)
            | Self::UnsupportedFormat { transport, .. }
            | Self::Timeout { transport, .. }
            | Self::Handshake { transport, .. }
            | Self::Status { transport, .. }
            | Self::Io { transport, .. }
            | Self::RemoteClosed { transport, .. } => *transport,
        }
    }
}

/// Why one candidate transport could not be used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportFailure {
    /// Candidate that failed or was skipped.
    pub transport: TransportKind,
    /// Human-readable reason.
    pub reason: String,
}

impl TransportFailure {
    /// Build a failure record.
    pub fn new(transport: TransportKind, reason: impl Into<String>) -> Self {
        Self {
            transport,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.transport, self.reason)
    }
}

/// Every candidate transport was exhausted.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unable to connect to the server with any of the available transports{}", render_failures(.failures))]
pub struct FailedToStartTransportError {
    /// Per-candidate failures, in attempt order.
    pub failures: Vec<TransportFailure>,
}

fn render_failures(failures: &[TransportFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = failures.iter().map(ToString::to_string).collect();
    format!(". {}", parts.join(" "))
}

/// Errors surfaced by the connection lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Negotiation failed.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// No transport could be started.
    #[error(transparent)]
    FailedToStartTransport(#[from] FailedToStartTransportError),

    /// The active transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Operation not allowed in the current state.
    #[error("cannot {operation} a connection in the '{state}' state")]
    InvalidState {
        /// Rejected operation.
        operation: &'static str,
        /// State at the time of the call.
        state: ConnectionState,
    },

    /// `start()` was aborted by a `stop()` before it completed.
    #[error("the connection was stopped during negotiation")]
    Stopped,

    /// The layer above declared the connection lost.
    #[error("connection lost: {0}")]
    Lost(String),

    /// The driver task is gone (handle outlived the runtime).
    #[error("the connection driver is no longer running")]
    DriverGone,
}
