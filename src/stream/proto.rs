//! Relay endpoint addressing.
//!
//! The relay serves the repository event stream at a fixed XRPC path. The
//! resumption cursor travels as a `cursor` query parameter on the upgrade
//! request; payloads themselves are opaque to this crate.

use url::Url;

use crate::stream::client::StreamClientError;

/// Public relay used when no other host is configured.
pub const DEFAULT_RELAY: &str = "bsky.network";
/// Resource path of the repository subscription stream.
pub const SUBSCRIBE_REPOS_PATH: &str = "/xrpc/com.atproto.sync.subscribeRepos";
/// Very old cursor, so the relay replays from the start of its buffer.
pub const DEFAULT_START_CURSOR: &str = "1000000";

const CURSOR_PARAM: &str = "cursor";

/// Where and from which position a session subscribes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirehoseEndpoint {
    relay: String,
    path: String,
    cursor: Option<String>,
    secure: bool,
    endpoint_override: Option<String>,
}

impl FirehoseEndpoint {
    /// Creates an endpoint for `relay` with the default path and cursor.
    pub fn new(relay: impl Into<String>) -> Self {
        Self {
            relay: relay.into().trim().to_string(),
            ..Self::default()
        }
    }

    /// Sets the resumption cursor sent at connect time.
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Connects without a cursor; the relay starts at its live head.
    pub fn without_cursor(mut self) -> Self {
        self.cursor = None;
        self
    }

    /// Overrides the resource path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Selects `wss` (default) or plain `ws`.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Sets an explicit websocket URL.
    ///
    /// The override takes precedence over relay, path and scheme. The cursor,
    /// when set, still replaces any `cursor` parameter in the override.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint_override = Some(endpoint.trim_end().to_string());
        self
    }

    /// Relay host name.
    pub fn relay(&self) -> &str {
        &self.relay
    }

    /// Resumption cursor, if any.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Builds the subscription URL.
    pub fn url(&self) -> Result<Url, StreamClientError> {
        let mut url = match self.endpoint_override.as_deref() {
            Some(endpoint) => Url::parse(endpoint)?,
            None => {
                let scheme = if self.secure { "wss" } else { "ws" };
                Url::parse(&format!("{scheme}://{}{}", self.relay, self.path))?
            }
        };

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(StreamClientError::Protocol(format!(
                "unsupported endpoint scheme {:?}, expected ws or wss",
                url.scheme()
            )));
        }

        if let Some(cursor) = self.cursor.as_deref() {
            let retained: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(key, _)| key != CURSOR_PARAM)
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
            url.query_pairs_mut()
                .clear()
                .extend_pairs(retained)
                .append_pair(CURSOR_PARAM, cursor);
        }

        Ok(url)
    }
}

impl Default for FirehoseEndpoint {
    fn default() -> Self {
        Self {
            relay: DEFAULT_RELAY.to_string(),
            path: SUBSCRIBE_REPOS_PATH.to_string(),
            cursor: Some(DEFAULT_START_CURSOR.to_string()),
            secure: true,
            endpoint_override: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FirehoseEndpoint, DEFAULT_RELAY, DEFAULT_START_CURSOR};

    #[test]
    fn default_endpoint_targets_public_relay_with_start_cursor() {
        let endpoint = FirehoseEndpoint::default();
        assert_eq!(endpoint.relay(), DEFAULT_RELAY);
        assert_eq!(endpoint.cursor(), Some(DEFAULT_START_CURSOR));
        assert_eq!(
            endpoint.url().expect("url").as_str(),
            "wss://bsky.network/xrpc/com.atproto.sync.subscribeRepos?cursor=1000000"
        );
    }

    #[test]
    fn insecure_endpoint_without_cursor_has_no_query() {
        let url = FirehoseEndpoint::new("relay.example:2470 ")
            .with_secure(false)
            .without_cursor()
            .url()
            .expect("url");
        assert_eq!(
            url.as_str(),
            "ws://relay.example:2470/xrpc/com.atproto.sync.subscribeRepos"
        );
    }

    #[test]
    fn endpoint_override_takes_precedence_and_keeps_other_params() {
        let url = FirehoseEndpoint::new("ignored.example")
            .with_cursor("42")
            .with_endpoint("ws://127.0.0.1:9000/stream?cursor=7&mode=raw   \n")
            .url()
            .expect("url");
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.path(), "/stream");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("mode".to_string(), "raw".to_string()),
                ("cursor".to_string(), "42".to_string()),
            ]
        );
    }

    #[test]
    fn cursor_is_query_encoded() {
        let url = FirehoseEndpoint::default()
            .with_cursor("a b&c")
            .url()
            .expect("url");
        assert_eq!(url.query(), Some("cursor=a+b%26c"));
    }

    #[test]
    fn rejects_non_websocket_scheme() {
        let result = FirehoseEndpoint::default()
            .with_endpoint("https://bsky.network/xrpc/com.atproto.sync.subscribeRepos")
            .url();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unparseable_endpoint() {
        let result = FirehoseEndpoint::default().with_endpoint("not a url").url();
        assert!(result.is_err());
    }
}
