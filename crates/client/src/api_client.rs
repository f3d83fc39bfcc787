//! HTTP API client for the transportation endpoints tracking depends on.

use async_trait::async_trait;
use nakliye_shared::{
    snapshot_path, websocket_token_path, ApiError, TrackedEntityId, TransportationSnapshot,
    WebSocketTokenResponse,
};
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::config::TrackingConfig;

/// The two REST calls the tracking core makes.
///
/// Implemented by [`ApiClient`]; tests substitute in-memory fakes.
#[async_trait]
pub trait TrackingApi: Send + Sync {
    /// `GET /transportations/{id}/`
    async fn fetch_snapshot(&self, id: &TrackedEntityId)
        -> Result<TransportationSnapshot, ApiError>;

    /// `GET /transportations/{id}/websocket-token/`. `Ok(None)` when the
    /// backend answered without a token.
    async fn fetch_websocket_token(&self, id: &TrackedEntityId)
        -> Result<Option<String>, ApiError>;
}

/// HTTP client for the nakliyematik REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            bearer_token: None,
        }
    }

    pub fn from_config(config: &TrackingConfig) -> Self {
        Self::new()
            .with_base_url(config.api_base_url.clone())
            .with_bearer_token(config.access_token.clone())
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Attach `Authorization: Bearer ...` to every request
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    /// Make a GET request and decode the JSON body
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let url = self.url(path);
        let mut rb = self.client.get(&url).header("Accept", "application/json");

        if let Some(token) = &self.bearer_token {
            rb = rb.bearer_auth(token);
        }

        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackingApi for ApiClient {
    async fn fetch_snapshot(
        &self,
        id: &TrackedEntityId,
    ) -> Result<TransportationSnapshot, ApiError> {
        let snapshot = self.get_json(&snapshot_path(id)).await;
        if let Err(e) = &snapshot {
            crate::log_error!("Failed to fetch transportation {}: {}", id, e.summary());
        }
        snapshot
    }

    async fn fetch_websocket_token(
        &self,
        id: &TrackedEntityId,
    ) -> Result<Option<String>, ApiError> {
        crate::log_debug!("Requesting socket token for {}", id);
        match self
            .get_json::<WebSocketTokenResponse>(&websocket_token_path(id))
            .await
        {
            Ok(resp) => Ok(resp.token.filter(|t| !t.is_empty())),
            Err(e) => {
                if e.status() == Some(403) {
                    crate::log_error!("Not authorized to track transportation {}", id);
                }
                Err(e)
            }
        }
    }
}
