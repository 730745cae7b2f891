//! The `POST /negotiate` handshake.
//!
//! One [`Negotiator::negotiate`] call is one connection attempt's worth of
//! handshaking: it follows redirects until the server hands back a transport
//! list, and returns the endpoint and token provider the transports must use.

use std::collections::BTreeMap;
use std::fmt;

use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tether_core::auth::{self, SharedTokenProvider, StaticToken};
use tether_core::errors::NegotiationError;
use tether_core::ids::{ConnectionId, ConnectionToken};
use tether_core::metrics::NEGOTIATE_REQUESTS_TOTAL;
use tracing::{debug, info, instrument};
use url::Url;

use crate::endpoint;

/// Default redirect-hop ceiling.
pub const DEFAULT_MAX_REDIRECTS: usize = 100;

/// One entry of `availableTransports`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AvailableTransport {
    /// Wire name, e.g. `"WebSockets"`.
    pub transport: String,
    /// Wire names of supported formats, e.g. `["Text", "Binary"]`.
    pub transfer_formats: Vec<String>,
}

/// Body of a negotiate response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NegotiateResponse {
    /// Logical connection id.
    pub connection_id: Option<ConnectionId>,
    /// Transport binding token (version 1+ servers).
    pub connection_token: Option<ConnectionToken>,
    /// Protocol version the server answered with.
    pub negotiate_version: u32,
    /// Transports in the server's priority order.
    pub available_transports: Vec<AvailableTransport>,
    /// Redirect target. When set the rest of the body is ignored.
    pub url: Option<String>,
    /// Token to use against the redirect target.
    pub access_token: Option<String>,
    /// Server-side refusal.
    pub error: Option<String>,
}

/// Outcome of a completed negotiation.
#[derive(Clone)]
pub struct Negotiation {
    /// Final (non-redirect) response.
    pub response: NegotiateResponse,
    /// Endpoint the response came from. Transports connect here.
    pub endpoint: Url,
    /// Token provider transports must use; replaced by a redirect's token.
    pub access_token: Option<SharedTokenProvider>,
}

impl Negotiation {
    /// Synthetic result for skip-negotiation mode: no id, no token, no list.
    pub fn skipped(endpoint: Url, access_token: Option<SharedTokenProvider>) -> Self {
        Self {
            response: NegotiateResponse::default(),
            endpoint,
            access_token,
        }
    }

    /// Connection id, if the server issued one.
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.response.connection_id.as_ref()
    }

    /// Token to attach as `id`. Version 0 servers issue no token, so the
    /// connection id stands in for it.
    pub fn connection_token(&self) -> Option<ConnectionToken> {
        if self.response.negotiate_version == 0 {
            return self
                .response
                .connection_id
                .as_ref()
                .map(|id| ConnectionToken::new(id.as_str()));
        }
        self.response.connection_token.clone()
    }

    /// URL every transport request goes to.
    pub fn connect_url(&self) -> Url {
        endpoint::connect_url(&self.endpoint, self.connection_token().as_ref())
    }
}

impl fmt::Debug for Negotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiation")
            .field("response", &self.response)
            .field("endpoint", &self.endpoint.as_str())
            .field("access_token", &self.access_token.is_some())
            .finish()
    }
}

/// Issues negotiate requests. Stateless between calls.
#[derive(Clone, Debug)]
pub struct Negotiator {
    client: reqwest::Client,
    headers: BTreeMap<String, String>,
    max_redirects: usize,
}

impl Negotiator {
    /// Build a negotiator sharing `client`'s connection pool.
    pub fn new(client: reqwest::Client, headers: BTreeMap<String, String>, max_redirects: usize) -> Self {
        Self {
            client,
            headers,
            max_redirects,
        }
    }

    /// Negotiate against `base`, following redirects.
    #[instrument(skip_all, fields(url = %base))]
    pub async fn negotiate(
        &self,
        base: &Url,
        access_token: Option<SharedTokenProvider>,
    ) -> Result<Negotiation, NegotiationError> {
        let mut endpoint = base.clone();
        let mut access_token = access_token;
        let mut redirects = 0usize;

        loop {
            let mut response = self.request(&endpoint, access_token.as_ref()).await?;
            if let Some(error) = response.error.take() {
                return Err(NegotiationError::Rejected(error));
            }

            let Some(next) = response.url.as_deref() else {
                if response.connection_id.is_none() {
                    return Err(NegotiationError::Malformed(
                        "response has neither a connectionId nor a redirect url".into(),
                    ));
                }
                info!(
                    connection_id = ?response.connection_id.as_ref().map(ConnectionId::as_str),
                    negotiate_version = response.negotiate_version,
                    transports = response.available_transports.len(),
                    "negotiation complete"
                );
                return Ok(Negotiation {
                    response,
                    endpoint,
                    access_token,
                });
            };

            redirects += 1;
            if redirects > self.max_redirects {
                return Err(NegotiationError::TooManyRedirects(self.max_redirects));
            }
            endpoint = endpoint::parse(next)?;
            if let Some(token) = response.access_token {
                access_token = Some(StaticToken::shared(token));
            }
            debug!(redirects, to = %endpoint, "following negotiate redirect");
        }
    }

    async fn request(
        &self,
        endpoint: &Url,
        access_token: Option<&SharedTokenProvider>,
    ) -> Result<NegotiateResponse, NegotiationError> {
        let url = endpoint::negotiate_url(endpoint);
        let mut request = self.client.post(url.clone());
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = auth::resolve(access_token)
            .await
            .map_err(NegotiationError::AccessToken)?
        {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        debug!(%url, "sending negotiate request");
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                metrics::counter!(NEGOTIATE_REQUESTS_TOTAL, "status" => "error").increment(1);
                return Err(NegotiationError::Http(e.to_string()));
            }
        };
        let status = response.status();
        metrics::counter!(NEGOTIATE_REQUESTS_TOTAL, "status" => status.as_u16().to_string())
            .increment(1);

        let body = response
            .text()
            .await
            .map_err(|e| NegotiationError::Http(e.to_string()))?;
        if !status.is_success() {
            let message = if body.is_empty() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                body
            };
            return Err(NegotiationError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| NegotiationError::Malformed(e.to_string()))
    }
}
