//! Transport kinds, transfer formats, and the frame payload type.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The closed set of wire transports.
///
/// Declaration order is the server's conventional priority order
/// (sockets, then server push, then polling), but selection always follows
/// the order the server actually advertises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Full-duplex socket.
    WebSockets,
    /// Server-push event stream with POST side-channel for sends.
    ServerSentEvents,
    /// Repeated long-lived GET with POST side-channel for sends.
    LongPolling,
}

impl TransportKind {
    /// All kinds, in conventional priority order.
    pub const ALL: [TransportKind; 3] = [
        TransportKind::WebSockets,
        TransportKind::ServerSentEvents,
        TransportKind::LongPolling,
    ];

    /// Wire name used in negotiate responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebSockets => "WebSockets",
            Self::ServerSentEvents => "ServerSentEvents",
            Self::LongPolling => "LongPolling",
        }
    }

    /// Single-bit mask for this kind.
    pub fn mask(self) -> HttpTransportType {
        match self {
            Self::WebSockets => HttpTransportType::WEB_SOCKETS,
            Self::ServerSentEvents => HttpTransportType::SERVER_SENT_EVENTS,
            Self::LongPolling => HttpTransportType::LONG_POLLING,
        }
    }

    /// Whether the client side of this transport can carry `format`.
    ///
    /// Event streams are text-only.
    pub fn supports_format(self, format: TransferFormat) -> bool {
        !matches!(
            (self, format),
            (Self::ServerSentEvents, TransferFormat::Binary)
        )
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WebSockets" => Ok(Self::WebSockets),
            "ServerSentEvents" => Ok(Self::ServerSentEvents),
            "LongPolling" => Ok(Self::LongPolling),
            other => Err(format!("unknown transport '{other}'")),
        }
    }
}

bitflags! {
    /// Caller-requested transport mask. [`HttpTransportType::all()`] means "auto".
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct HttpTransportType: u8 {
        /// Allow [`TransportKind::WebSockets`].
        const WEB_SOCKETS = 1;
        /// Allow [`TransportKind::ServerSentEvents`].
        const SERVER_SENT_EVENTS = 2;
        /// Allow [`TransportKind::LongPolling`].
        const LONG_POLLING = 4;
    }
}

impl HttpTransportType {
    /// Whether `kind` is allowed by this mask.
    pub fn allows(self, kind: TransportKind) -> bool {
        self.contains(kind.mask())
    }

    /// The single kind this mask names, if it names exactly one.
    ///
    /// An exact transport collapses the candidate list to one entry and
    /// disables fallback.
    pub fn exact(self) -> Option<TransportKind> {
        if self.bits().count_ones() != 1 {
            return None;
        }
        TransportKind::ALL.into_iter().find(|k| self.allows(*k))
    }

    /// Whether this mask is the full "auto" set.
    pub fn is_auto(self) -> bool {
        self == Self::all()
    }
}

impl Default for HttpTransportType {
    fn default() -> Self {
        Self::all()
    }
}

impl FromStr for HttpTransportType {
    type Err = String;

    /// Parses `"auto"` or a comma-separated list of transport names
    /// (case-insensitive, e.g. `"webSockets,longPolling"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("auto") {
            return Ok(Self::all());
        }
        let mut mask = Self::empty();
        for part in trimmed.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let kind = TransportKind::ALL
                .into_iter()
                .find(|k| k.as_str().eq_ignore_ascii_case(part))
                .ok_or_else(|| format!("unknown transport '{part}'"))?;
            mask |= kind.mask();
        }
        if mask.is_empty() {
            return Err("no transport named".into());
        }
        Ok(mask)
    }
}

/// Whether frames are exchanged as text or binary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferFormat {
    /// UTF-8 text frames.
    #[default]
    Text,
    /// Raw binary frames.
    Binary,
}

impl TransferFormat {
    /// Wire name used in negotiate responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Binary => "Binary",
        }
    }
}

impl fmt::Display for TransferFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame of application data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl Payload {
    /// Length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the frame carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes of the frame.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(t) => t.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    /// Short description for logs: the text itself or a byte count.
    pub fn describe(&self) -> String {
        match self {
            Self::Text(t) => format!("'{t}'"),
            Self::Binary(b) => format!("binary data of length {}", b.len()),
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(value))
    }
}
