//! Nakliye Client - real-time transportation tracking
//!
//! This crate contains the client side of nakliyematik's live tracking:
//! the REST client, the per-transportation socket registry with automatic
//! reconnects, and tracking sessions that merge snapshots with push updates.

pub mod logging;

pub mod api_client;
pub mod config;
pub mod tracking;
pub mod ws;

#[cfg(feature = "ui")]
pub mod hooks;

pub use api_client::{ApiClient, TrackingApi};
pub use config::TrackingConfig;
pub use tracking::{LinkStatus, TrackingSession, TrackingState};
pub use ws::{ConnectionObserver, ConnectionRegistry, ReconnectConfig, Subscription};
