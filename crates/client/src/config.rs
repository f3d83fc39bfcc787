//! Client configuration from environment variables.

use std::time::Duration;

use nakliye_shared::{http_to_ws, websocket_path, TrackedEntityId};

use crate::ws::ReconnectConfig;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Everything the tracking core needs to reach the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    /// REST base, including the `/api` prefix.
    pub api_base_url: String,
    /// Socket base (`ws://host[:port]`), without the `/ws/...` path.
    pub ws_base_url: String,
    /// Bearer token attached to REST calls, if any.
    pub access_token: Option<String>,
    pub reconnect: ReconnectConfig,
    /// Maximum number of samples kept in a session's location history.
    pub history_limit: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl TrackingConfig {
    /// Build a configuration whose socket base is derived from the API base.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        let api_base_url = api_base_url.into().trim_end_matches('/').to_string();
        let ws_base_url = derive_ws_base(&api_base_url);
        Self {
            api_base_url,
            ws_base_url,
            access_token: None,
            reconnect: ReconnectConfig::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NAKLIYE_API_URL`: REST base (default: "http://localhost:8000/api")
    /// - `NAKLIYE_WS_URL`: socket base (default: API origin with `ws`/`wss` scheme)
    /// - `NAKLIYE_ACCESS_TOKEN`: bearer token for REST calls
    /// - `NAKLIYE_RECONNECT_INTERVAL_MS`: base backoff interval (default: 3000)
    /// - `NAKLIYE_RECONNECT_MAX_ATTEMPTS`: retries before giving up (default: 5)
    /// - `NAKLIYE_HISTORY_LIMIT`: location history length (default: 100)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`TrackingConfig::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_base_url = match var("NAKLIYE_API_URL") {
            Some(raw) if url::Url::parse(&raw).is_ok() => raw,
            Some(raw) => {
                crate::log_warn!("Ignoring invalid NAKLIYE_API_URL '{}'", raw);
                DEFAULT_API_URL.to_string()
            }
            None => DEFAULT_API_URL.to_string(),
        };

        let mut config = Self::new(api_base_url);

        if let Some(ws) = var("NAKLIYE_WS_URL") {
            config = config.with_ws_base_url(ws);
        }
        config.access_token = var("NAKLIYE_ACCESS_TOKEN");

        if let Some(ms) = var("NAKLIYE_RECONNECT_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()) {
            config.reconnect.base_interval = Duration::from_millis(ms);
        }
        if let Some(max) = var("NAKLIYE_RECONNECT_MAX_ATTEMPTS").and_then(|v| v.parse::<u32>().ok())
        {
            config.reconnect.max_attempts = max;
        }
        if let Some(limit) = var("NAKLIYE_HISTORY_LIMIT").and_then(|v| v.parse::<usize>().ok()) {
            config.history_limit = limit;
        }

        config
    }

    pub fn with_ws_base_url(mut self, ws_base_url: impl Into<String>) -> Self {
        self.ws_base_url = http_to_ws(ws_base_url.into().trim_end_matches('/'));
        self
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Socket URL for a transportation, with the token as query parameter
    /// when one was issued.
    pub fn websocket_url(&self, id: &TrackedEntityId, token: Option<&str>) -> String {
        let mut url = format!("{}{}", self.ws_base_url, websocket_path(id));
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            url.push_str("?token=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }
}

/// `http://host:8000/api` -> `ws://host:8000`
fn derive_ws_base(api_base_url: &str) -> String {
    let trimmed = api_base_url.trim_end_matches('/');
    let origin = trimmed.strip_suffix("/api").unwrap_or(trimmed);
    http_to_ws(origin)
}
