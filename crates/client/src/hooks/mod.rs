//! Dioxus hooks exposing tracking state to components.

mod use_location_tracking;

pub use use_location_tracking::{use_location_tracking, LocationTracking};
