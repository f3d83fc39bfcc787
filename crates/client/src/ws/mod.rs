//! Real-time socket layer for transportation tracking.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   ┌────────────────┐
//! │ TrackingSession│   │ TrackingSession│   (one per observer)
//! └───────┬────────┘   └───────┬────────┘
//!         │ connect / release  │
//!         ▼                    ▼
//! ┌─────────────────────────────────────┐
//! │          ConnectionRegistry         │
//! │  one socket + one ReconnectPolicy   │
//! │       per transportation id         │
//! └─────────────────┬───────────────────┘
//!                   │ Transport::open
//!                   ▼
//!        ┌─────────────────────┐
//!        │ TungsteniteTransport│
//!        └─────────────────────┘
//! ```
//!
//! Inbound frames are parsed once by the registry and fanned out to every
//! [`ConnectionObserver`] of the transportation. Abnormal closes schedule a
//! retry with bounded exponential backoff; the socket is closed when the last
//! observer is released.

mod connection;
mod observer;
mod reconnect;
mod registry;

pub use connection::{ConnectionState, OpenedSocket, SocketEvent, SocketSink, Transport};
#[cfg(not(target_arch = "wasm32"))]
pub use connection::TungsteniteTransport;
pub use observer::{ChannelObserver, CloseInfo, ConnectionEvent, ConnectionObserver};
pub use reconnect::{ReconnectConfig, ReconnectPhase, ReconnectPolicy, RetryDecision};
pub use registry::{ConnectionRegistry, ConnectionSummary, Subscription, GENERIC_ERROR};
