//! Shared types for the nakliyematik tracking client.

pub mod coordinate;
pub mod error;
pub mod models;
pub mod protocol;

pub use coordinate::*;
pub use error::*;
pub use models::*;
pub use protocol::*;
