//! URL construction for negotiate and transport requests.

use std::time::{SystemTime, UNIX_EPOCH};

use tether_core::errors::NegotiationError;
use tether_core::ids::ConnectionToken;
use url::Url;

/// Protocol version sent as `negotiateVersion`.
pub const NEGOTIATE_VERSION: u32 = 1;

/// Parse a caller- or server-supplied endpoint.
pub fn parse(raw: &str) -> Result<Url, NegotiationError> {
    Url::parse(raw).map_err(|e| NegotiationError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// `{base}/negotiate?negotiateVersion=1`, preserving any query on `base`.
///
/// A `negotiateVersion` already present on `base` is left alone.
pub fn negotiate_url(base: &Url) -> Url {
    let mut url = base.clone();
    let path = format!("{}/negotiate", base.path().trim_end_matches('/'));
    url.set_path(&path);
    let has_version = url.query_pairs().any(|(k, _)| k == "negotiateVersion");
    if !has_version {
        let _ = url
            .query_pairs_mut()
            .append_pair("negotiateVersion", &NEGOTIATE_VERSION.to_string());
    }
    url
}

/// Transport URL: `{endpoint}?id={token}` (or `&id=` when a query exists).
pub fn connect_url(endpoint: &Url, token: Option<&ConnectionToken>) -> Url {
    let mut url = endpoint.clone();
    if let Some(token) = token {
        let _ = url.query_pairs_mut().append_pair("id", token.as_str());
    }
    url
}

/// Rewrite `http(s)` to `ws(s)`. Other schemes are kept.
pub fn websocket_url(url: &Url) -> Url {
    let mut ws = url.clone();
    let scheme = match url.scheme() {
        "http" => Some("ws"),
        "https" => Some("wss"),
        _ => None,
    };
    if let Some(scheme) = scheme {
        // Both schemes are "special", so the swap cannot fail.
        let _ = ws.set_scheme(scheme);
    }
    ws
}

/// Poll URL with a cache-busting `_` timestamp.
pub fn poll_url(url: &Url) -> Url {
    let mut poll = url.clone();
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let _ = poll.query_pairs_mut().append_pair("_", &now_ms.to_string());
    poll
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn negotiate_appends_path_and_version() {
        let n = negotiate_url(&url("http://example.com/hub"));
        assert_eq!(n.as_str(), "http://example.com/hub/negotiate?negotiateVersion=1");
    }

    #[test]
    fn negotiate_handles_trailing_slash() {
        let n = negotiate_url(&url("http://example.com/hub/"));
        assert_eq!(n.path(), "/hub/negotiate");
    }

    #[test]
    fn negotiate_keeps_existing_query() {
        let n = negotiate_url(&url("http://example.com/hub?tenant=a"));
        assert_eq!(
            n.as_str(),
            "http://example.com/hub/negotiate?tenant=a&negotiateVersion=1"
        );
    }

    #[test]
    fn negotiate_respects_explicit_version() {
        let n = negotiate_url(&url("http://example.com/hub?negotiateVersion=0"));
        assert_eq!(n.query(), Some("negotiateVersion=0"));
    }

    #[test]
    fn connect_url_adds_id() {
        let token = ConnectionToken::new("tok 1");
        let c = connect_url(&url("http://example.com/hub"), Some(&token));
        assert_eq!(c.as_str(), "http://example.com/hub?id=tok+1");

        let c = connect_url(&url("http://example.com/hub?x=1"), Some(&token));
        assert_eq!(c.query(), Some("x=1&id=tok+1"));
    }

    #[test]
    fn connect_url_without_token_is_unchanged() {
        let c = connect_url(&url("http://example.com/hub"), None);
        assert_eq!(c.as_str(), "http://example.com/hub");
    }

    #[test]
    fn websocket_scheme_rewrite() {
        assert_eq!(websocket_url(&url("http://h/x")).scheme(), "ws");
        assert_eq!(websocket_url(&url("https://h/x")).scheme(), "wss");
        assert_eq!(websocket_url(&url("ws://h/x")).scheme(), "ws");
    }

    #[test]
    fn poll_url_adds_cache_buster() {
        let p = poll_url(&url("http://h/x?id=1"));
        assert!(p.query_pairs().any(|(k, _)| k == "_"));
        assert!(p.query_pairs().any(|(k, v)| k == "id" && v == "1"));
    }

    #[test]
    fn parse_reports_bad_url() {
        assert!(parse("not a url").is_err());
    }
}
