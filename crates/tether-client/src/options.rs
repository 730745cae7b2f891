//! Caller-supplied connection options.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tether_core::auth::SharedTokenProvider;
use tether_core::retry::{DefaultReconnectPolicy, RetryPolicy};
use tether_core::transfer::HttpTransportType;
use tether_settings::ClientSettings;
use tether_transport::negotiate::DEFAULT_MAX_REDIRECTS;
use tether_transport::transport::DEFAULT_POLL_TIMEOUT;
use tether_transport::{DefaultTransportFactory, TransportFactory, TransportOptions};

/// Default per-transport handshake timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Options for [`HttpConnection`](crate::HttpConnection).
#[derive(Clone)]
pub struct HttpConnectionOptions {
    /// Allowed transports. The full mask means "auto".
    pub transport: HttpTransportType,
    /// Reconnect policy. `None` disables automatic reconnect.
    pub reconnect_policy: Option<Arc<dyn RetryPolicy>>,
    /// Bearer token source for negotiate and transport requests.
    pub access_token: Option<SharedTokenProvider>,
    /// Connect a socket straight to the base URL. Requires `transport` to be
    /// exactly [`HttpTransportType::WEB_SOCKETS`].
    pub skip_negotiation: bool,
    /// Whether reconnect attempts skip negotiation too (only meaningful with
    /// `skip_negotiation`).
    pub skip_negotiation_on_reconnect: bool,
    /// Upper bound on each transport's connect.
    pub handshake_timeout: Duration,
    /// Per-request long-poll timeout.
    pub poll_timeout: Duration,
    /// Negotiate redirect-hop ceiling.
    pub max_redirects: usize,
    /// Extra headers on every request.
    pub headers: BTreeMap<String, String>,
    /// Log frame contents at `trace`.
    pub log_message_content: bool,
    /// Client used for negotiate, event-stream, and long-poll requests.
    pub http_client: reqwest::Client,
    /// Builds transports. Replaceable for tests and custom runtimes.
    pub transport_factory: Arc<dyn TransportFactory>,
}

impl Default for HttpConnectionOptions {
    fn default() -> Self {
        Self {
            transport: HttpTransportType::all(),
            reconnect_policy: None,
            access_token: None,
            skip_negotiation: false,
            skip_negotiation_on_reconnect: true,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            headers: BTreeMap::new(),
            log_message_content: false,
            http_client: reqwest::Client::new(),
            transport_factory: Arc::new(DefaultTransportFactory),
        }
    }
}

impl fmt::Debug for HttpConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnectionOptions")
            .field("transport", &self.transport)
            .field("reconnect", &self.reconnect_policy.is_some())
            .field("access_token", &self.access_token.is_some())
            .field("skip_negotiation", &self.skip_negotiation)
            .field("skip_negotiation_on_reconnect", &self.skip_negotiation_on_reconnect)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("poll_timeout", &self.poll_timeout)
            .field("max_redirects", &self.max_redirects)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("log_message_content", &self.log_message_content)
            .finish_non_exhaustive()
    }
}

impl HttpConnectionOptions {
    /// Restrict the allowed transports.
    #[must_use]
    pub fn with_transport(mut self, transport: HttpTransportType) -> Self {
        self.transport = transport;
        self
    }

    /// Enable reconnect with `policy`.
    #[must_use]
    pub fn with_reconnect(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.reconnect_policy = Some(Arc::new(policy));
        self
    }

    /// Enable reconnect with the default `[0, 2, 10, 30]` second table.
    #[must_use]
    pub fn with_default_reconnect(self) -> Self {
        self.with_reconnect(DefaultReconnectPolicy::new())
    }

    /// Set the bearer token source.
    #[must_use]
    pub fn with_access_token(mut self, provider: SharedTokenProvider) -> Self {
        self.access_token = Some(provider);
        self
    }

    /// Skip negotiation and connect a socket directly.
    #[must_use]
    pub fn with_skip_negotiation(mut self, skip: bool) -> Self {
        self.skip_negotiation = skip;
        self
    }

    /// Add a header to every request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Replace the transport factory.
    #[must_use]
    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = factory;
        self
    }

    /// Build options from loaded settings. The URL is not part of the options.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        let reconnect_policy = settings.reconnect.enabled.then(|| {
            let delays = settings.reconnect.delays_ms.iter().copied().map(Duration::from_millis);
            Arc::new(DefaultReconnectPolicy::with_delays(delays)) as Arc<dyn RetryPolicy>
        });
        Self {
            transport: settings.transport_mask(),
            reconnect_policy,
            skip_negotiation: settings.skip_negotiation,
            skip_negotiation_on_reconnect: settings.skip_negotiation_on_reconnect,
            handshake_timeout: Duration::from_millis(settings.handshake_timeout_ms),
            poll_timeout: Duration::from_millis(settings.poll_timeout_ms),
            max_redirects: settings.max_redirects,
            headers: settings.headers.clone(),
            log_message_content: settings.log_message_content,
            ..Self::default()
        }
    }

    /// Options for the transports of one attempt, using the token provider
    /// negotiation settled on.
    pub(crate) fn transport_options(&self, access_token: Option<SharedTokenProvider>) -> TransportOptions {
        TransportOptions {
            client: self.http_client.clone(),
            access_token,
            headers: self.headers.clone(),
            poll_timeout: self.poll_timeout,
            log_message_content: self.log_message_content,
        }
    }
}

#[cfg(test)]
mod tests {
    use tether_core::retry::RetryContext;
    use tether_core::errors::ConnectionError;

    use super::*;

    #[test]
    fn defaults() {
        let options = HttpConnectionOptions::default();
        assert!(options.transport.is_auto());
        assert!(options.reconnect_policy.is_none());
        assert!(!options.skip_negotiation);
        assert!(options.skip_negotiation_on_reconnect);
        assert_eq!(options.handshake_timeout, Duration::from_secs(15));
        assert_eq!(options.poll_timeout, Duration::from_secs(100));
        assert_eq!(options.max_redirects, 100);
    }

    #[test]
    fn from_settings_maps_every_field() {
        let mut settings = ClientSettings {
            transport: "WebSockets".into(),
            skip_negotiation: true,
            handshake_timeout_ms: 2_000,
            max_redirects: 5,
            ..ClientSettings::default()
        };
        settings.reconnect.enabled = true;
        settings.reconnect.delays_ms = vec![0, 50];
        let _ = settings.headers.insert("x-app".into(), "cli".into());

        let options = HttpConnectionOptions::from_settings(&settings);
        assert_eq!(options.transport, HttpTransportType::WEB_SOCKETS);
        assert!(options.skip_negotiation);
        assert_eq!(options.handshake_timeout, Duration::from_secs(2));
        assert_eq!(options.max_redirects, 5);
        assert_eq!(options.headers.get("x-app").map(String::as_str), Some("cli"));

        let policy = options.reconnect_policy.unwrap();
        let context = |n| RetryContext {
            previous_retry_count: n,
            elapsed: Duration::ZERO,
            retry_reason: ConnectionError::Lost("test".into()),
        };
        assert_eq!(policy.next_retry_delay(&context(1)), Some(Duration::from_millis(50)));
        assert_eq!(policy.next_retry_delay(&context(2)), None);
    }

    #[test]
    fn reconnect_disabled_in_settings_means_no_policy() {
        let options = HttpConnectionOptions::from_settings(&ClientSettings::default());
        assert!(options.reconnect_policy.is_none());
    }

    #[test]
    fn debug_hides_token() {
        let options = HttpConnectionOptions::default()
            .with_access_token(tether_core::auth::StaticToken::shared("hunter2"));
        assert!(!format!("{options:?}").contains("hunter2"));
    }
}
