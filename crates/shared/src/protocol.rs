//! Tracking endpoints and WebSocket close-code semantics.

use crate::models::TrackedEntityId;

/// Prefix of the per-transportation socket path.
pub const WS_PATH_PREFIX: &str = "/ws/transportation";

/// Close code used locally when a socket dies without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// REST path of the transportation snapshot (relative to the API base).
pub fn snapshot_path(id: &TrackedEntityId) -> String {
    format!("/transportations/{}/", id)
}

/// REST path issuing a short-lived socket token.
pub fn websocket_token_path(id: &TrackedEntityId) -> String {
    format!("/transportations/{}/websocket-token/", id)
}

/// Socket path for a transportation (relative to the socket base).
pub fn websocket_path(id: &TrackedEntityId) -> String {
    format!("{}/{}/", WS_PATH_PREFIX, id)
}

/// Convert an `http(s)://` base into its `ws(s)://` counterpart. Bases that
/// already use a socket scheme are returned unchanged.
pub fn http_to_ws(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

/// WebSocket close codes with meaning for the tracking socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001
    GoingAway,
    /// 1011, transient server fault
    ServerError,
    /// 4001, the user may not observe this transportation
    Unauthorized,
    Other(u16),
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ServerError => 1011,
            CloseCode::Unauthorized => 4001,
            CloseCode::Other(code) => code,
        }
    }

    /// Closes that end the session on purpose.
    pub fn is_graceful(self) -> bool {
        matches!(self, CloseCode::Normal | CloseCode::GoingAway)
    }

    /// Closes that must never be retried automatically.
    pub fn is_terminal(self) -> bool {
        matches!(self, CloseCode::Unauthorized)
    }

    pub fn should_reconnect(self) -> bool {
        !self.is_graceful() && !self.is_terminal()
    }

    /// User-facing explanation for codes the UI should surface.
    pub fn cause(self) -> Option<&'static str> {
        match self {
            CloseCode::ServerError => Some(
                "The tracking server ran into a problem. We will try to reconnect shortly.",
            ),
            CloseCode::Unauthorized => Some("You are not authorized to track this transportation."),
            _ => None,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1011 => CloseCode::ServerError,
            4001 => CloseCode::Unauthorized,
            other => CloseCode::Other(other),
        }
    }
}
