//! Shared error types.

use serde::Deserialize;

/// Error body shapes returned by the backend (`{"detail": ".."}` or
/// `{"error": ".."}`).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Attempt to parse an error body into a user-facing message.
/// Prefers `detail`, falls back to `error`.
pub fn try_error_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    [parsed.detail, parsed.error]
        .into_iter()
        .flatten()
        .find(|msg| !msg.trim().is_empty())
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short description suitable for logs.
    pub fn summary(&self) -> String {
        match self {
            ApiError::Http { status, body } => match try_error_detail(body) {
                Some(detail) => format!("HTTP {}: {}", status, detail),
                None => format!("HTTP {}", status),
            },
            other => other.to_string(),
        }
    }
}

/// Errors surfaced by the tracking registry and sessions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackingError {
    #[error("a transportation id is required")]
    MissingEntityId,
    #[error("the connection registry has been disposed")]
    RegistryDisposed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_detail_then_error() {
        assert_eq!(
            try_error_detail(r#"{"detail": "Not found."}"#).as_deref(),
            Some("Not found.")
        );
        assert_eq!(
            try_error_detail(r#"{"detail": " ", "error": "Forbidden"}"#).as_deref(),
            Some("Forbidden")
        );
        assert_eq!(try_error_detail("<html>"), None);
    }

    #[test]
    fn summary_prefers_backend_detail() {
        let err = ApiError::Http {
            status: 403,
            body: r#"{"detail": "You do not have permission."}"#.to_string(),
        };
        assert_eq!(err.summary(), "HTTP 403: You do not have permission.");
        assert_eq!(err.status(), Some(403));
        assert_eq!(ApiError::Network("refused".into()).status(), None);
    }
}
