//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the fields it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tether_core::retry::DEFAULT_RETRY_DELAYS_MS;
use tether_core::transfer::{HttpTransportType, TransferFormat};

/// Root settings for a connection.
///
/// ```json
/// {
///   "url": "https://example.com/hub",
///   "transport": "WebSockets,LongPolling",
///   "reconnect": { "enabled": true }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Base URL of the server endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// `"auto"` or a comma-separated list of transport names.
    pub transport: String,
    /// Frame format requested from the server.
    pub transfer_format: TransferFormat,
    /// Connect a socket directly, without negotiating.
    pub skip_negotiation: bool,
    /// Whether reconnect attempts also skip negotiation.
    pub skip_negotiation_on_reconnect: bool,
    /// Per-transport handshake timeout.
    pub handshake_timeout_ms: u64,
    /// Long-poll request timeout.
    pub poll_timeout_ms: u64,
    /// Negotiate redirect-hop ceiling.
    pub max_redirects: usize,
    /// Extra headers sent on every request.
    pub headers: BTreeMap<String, String>,
    /// Log frame contents at trace level.
    pub log_message_content: bool,
    /// Automatic reconnect.
    pub reconnect: ReconnectSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: None,
            transport: "auto".to_string(),
            transfer_format: TransferFormat::Text,
            skip_negotiation: false,
            skip_negotiation_on_reconnect: true,
            handshake_timeout_ms: 15_000,
            poll_timeout_ms: 100_000,
            max_redirects: 100,
            headers: BTreeMap::new(),
            log_message_content: false,
            reconnect: ReconnectSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ClientSettings {
    /// Parsed transport mask. Falls back to every transport when the string
    /// does not parse (`validate` already warned about it).
    pub fn transport_mask(&self) -> HttpTransportType {
        self.transport.parse().unwrap_or_default()
    }

    /// Correct invalid values in place, warning for each.
    ///
    /// Called during loading, so callers get corrected behavior instead of
    /// an error.
    pub fn validate(&mut self) {
        if let Err(e) = self.transport.parse::<HttpTransportType>() {
            tracing::warn!(transport = %self.transport, error = %e, "invalid transport, using auto");
            self.transport = "auto".to_string();
        }
        if self.handshake_timeout_ms == 0 {
            tracing::warn!("handshakeTimeoutMs must be positive, using 15000");
            self.handshake_timeout_ms = 15_000;
        }
        if self.poll_timeout_ms == 0 {
            tracing::warn!("pollTimeoutMs must be positive, using 100000");
            self.poll_timeout_ms = 100_000;
        }
        if self.skip_negotiation && self.transport_mask() != HttpTransportType::WEB_SOCKETS {
            tracing::warn!(
                transport = %self.transport,
                "skipNegotiation requires transport \"WebSockets\"; connections will fail to start"
            );
        }
    }
}

/// Automatic reconnect settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Reconnect after an unexpected drop.
    pub enabled: bool,
    /// Delay before each attempt; attempts stop when the table runs out.
    pub delays_ms: Vec<u64>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            delays_ms: DEFAULT_RETRY_DELAYS_MS.to_vec(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = ClientSettings::default();
        assert_eq!(s.transport, "auto");
        assert!(s.skip_negotiation_on_reconnect);
        assert_eq!(s.handshake_timeout_ms, 15_000);
        assert_eq!(s.poll_timeout_ms, 100_000);
        assert_eq!(s.max_redirects, 100);
        assert!(!s.reconnect.enabled);
        assert_eq!(s.reconnect.delays_ms, vec![0, 2_000, 10_000, 30_000]);
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s: ClientSettings = serde_json::from_str(
            r#"{"transport": "LongPolling", "reconnect": {"enabled": true}}"#,
        )
        .unwrap();
        assert_eq!(s.transport_mask(), HttpTransportType::LONG_POLLING);
        assert!(s.reconnect.enabled);
        assert_eq!(s.reconnect.delays_ms.len(), 4);
        assert_eq!(s.handshake_timeout_ms, 15_000);
    }

    #[test]
    fn camel_case_round_trip() {
        let json = serde_json::to_value(ClientSettings::default()).unwrap();
        assert!(json.get("handshakeTimeoutMs").is_some());
        assert!(json.get("skipNegotiationOnReconnect").is_some());
        assert!(json.get("url").is_none());
    }

    #[test]
    fn validate_resets_bad_values() {
        let mut s = ClientSettings {
            transport: "Carrier Pigeon".to_string(),
            handshake_timeout_ms: 0,
            poll_timeout_ms: 0,
            ..ClientSettings::default()
        };
        s.validate();
        assert_eq!(s.transport, "auto");
        assert_eq!(s.handshake_timeout_ms, 15_000);
        assert_eq!(s.poll_timeout_ms, 100_000);
    }

    #[test]
    fn validate_keeps_good_values() {
        let mut s = ClientSettings {
            transport: "WebSockets".to_string(),
            skip_negotiation: true,
            ..ClientSettings::default()
        };
        let before = s.clone();
        s.validate();
        assert_eq!(s, before);
    }
}
