//! Socket transport abstraction.
//!
//! The registry never touches a WebSocket library directly. A [`Transport`]
//! opens a socket and hands back a [`SocketSink`] for outbound frames plus a
//! stream of [`SocketEvent`]s, mirroring the browser `WebSocket` event model:
//! `Open` once the handshake completes, any number of `Text` frames, optional
//! `Error`s, and exactly one final `Close`.

use std::sync::Arc;

use futures_channel::mpsc::UnboundedReceiver;
use nakliye_shared::TrackingError;

/// Lifecycle of a registry-owned connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// We sent a close frame and wait for the socket's final close event.
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Connecting or open: a new connect for the entity must not open another
    /// socket.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

/// Something the socket reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Text(String),
    Error(String),
    Close { code: u16, reason: String },
}

/// Outbound half of an open socket.
pub trait SocketSink: Send + Sync {
    /// Queue a text frame. Fails when the socket is not open.
    fn send_text(&self, text: String) -> Result<(), TrackingError>;

    /// Start the closing handshake. Never fails; closing twice is harmless.
    fn close(&self, code: u16, reason: &str);
}

/// A socket that was just created, before its `Open` event.
pub struct OpenedSocket {
    pub sink: Arc<dyn SocketSink>,
    pub events: UnboundedReceiver<SocketEvent>,
}

/// Opens sockets. Returns an error only when the socket cannot even be
/// created (bad URL); connection failures arrive later as events.
pub trait Transport: Send + Sync {
    fn open(&self, url: &str) -> Result<OpenedSocket, TrackingError>;
}

#[cfg(not(target_arch = "wasm32"))]
mod connection_native;
#[cfg(not(target_arch = "wasm32"))]
pub use connection_native::TungsteniteTransport;
