//! Location tracking sessions.
//!
//! A [`TrackingSession`] combines the REST snapshot of a transportation with
//! the push messages of its socket and publishes the result as a
//! [`TrackingState`]. Sessions share sockets through the
//! [`ConnectionRegistry`](crate::ws::ConnectionRegistry).

mod session;
mod state;

pub use session::{SessionSlot, TrackingSession, FETCH_ERROR};
pub use state::{LinkStatus, LocationSample, TrackingState};
