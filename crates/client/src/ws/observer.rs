//! Observer callbacks fanned out by the registry.

use futures_channel::mpsc::UnboundedSender;
use nakliye_shared::{CloseCode, TrackedEntityId};
use serde_json::Value;

use super::reconnect::RetryDecision;

/// Details of a socket closure, as seen by observers.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    /// User-facing explanation for codes that have one (1011, 4001).
    pub cause: Option<String>,
    pub retry: RetryDecision,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>, retry: RetryDecision) -> Self {
        Self {
            code,
            reason: reason.into(),
            cause: CloseCode::from(code).cause().map(str::to_string),
            retry,
        }
    }

    pub fn close_code(&self) -> CloseCode {
        CloseCode::from(self.code)
    }
}

/// Receives the lifecycle of one entity's connection.
///
/// Callbacks run synchronously on the registry's event task and must not
/// block. Every method has a no-op default.
pub trait ConnectionObserver: Send + Sync {
    fn on_open(&self, _entity_id: &TrackedEntityId) {}

    /// A well-formed JSON message arrived. Malformed frames never get here.
    fn on_message(&self, _entity_id: &TrackedEntityId, _payload: &Value) {}

    fn on_close(&self, _entity_id: &TrackedEntityId, _info: &CloseInfo) {}

    /// `message` is generic and safe to show to users.
    fn on_error(&self, _entity_id: &TrackedEntityId, _message: &str) {}
}

/// Callback events flattened into one enum.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Open(TrackedEntityId),
    Message(TrackedEntityId, Value),
    Close(TrackedEntityId, CloseInfo),
    Error(TrackedEntityId, String),
}

/// Forwards every callback into a channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: UnboundedSender<ConnectionEvent>,
}

impl ChannelObserver {
    pub fn new(tx: UnboundedSender<ConnectionEvent>) -> Self {
        Self { tx }
    }

    fn forward(&self, event: ConnectionEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.unbounded_send(event);
    }
}

impl ConnectionObserver for ChannelObserver {
    fn on_open(&self, entity_id: &TrackedEntityId) {
        self.forward(ConnectionEvent::Open(entity_id.clone()));
    }

    fn on_message(&self, entity_id: &TrackedEntityId, payload: &Value) {
        self.forward(ConnectionEvent::Message(entity_id.clone(), payload.clone()));
    }

    fn on_close(&self, entity_id: &TrackedEntityId, info: &CloseInfo) {
        self.forward(ConnectionEvent::Close(entity_id.clone(), info.clone()));
    }

    fn on_error(&self, entity_id: &TrackedEntityId, message: &str) {
        self.forward(ConnectionEvent::Error(entity_id.clone(), message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_channel::mpsc::unbounded;
    use futures_util::StreamExt;

    #[test]
    fn close_info_carries_cause() {
        let info = CloseInfo::new(4001, "denied", RetryDecision::NotRetrying);
        assert_eq!(info.close_code(), CloseCode::Unauthorized);
        assert!(info.cause.is_some());

        let info = CloseInfo::new(1000, "", RetryDecision::NotRetrying);
        assert!(info.cause.is_none());
    }

    #[tokio::test]
    async fn channel_observer_forwards_in_order() {
        let (tx, mut rx) = unbounded();
        let observer = ChannelObserver::new(tx);
        let id = TrackedEntityId::from(3u64);

        observer.on_open(&id);
        observer.on_error(&id, "boom");

        assert_eq!(rx.next().await, Some(ConnectionEvent::Open(id.clone())));
        assert_eq!(
            rx.next().await,
            Some(ConnectionEvent::Error(id, "boom".to_string()))
        );
    }
}
