use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use dioxus::prelude::*;
use nakliye_shared::TrackedEntityId;

use crate::tracking::{SessionSlot, TrackingSession, TrackingState};
use crate::ws::ConnectionRegistry;

/// Handle returned by [`use_location_tracking`].
#[derive(Clone)]
pub struct LocationTracking {
    /// Reactive copy of the session state.
    pub state: Signal<TrackingState>,
    slot: Rc<HookSlot>,
}

/// The session slot plus the component tasks feeding the signal.
#[derive(Default)]
struct HookSlot {
    sessions: SessionSlot,
    tasks: RefCell<Vec<Task>>,
}

impl HookSlot {
    fn current(&self) -> Option<Arc<TrackingSession>> {
        self.sessions.current()
    }

    fn cancel_tasks(&self) {
        for task in self.tasks.borrow_mut().drain(..) {
            task.cancel();
        }
    }
}

impl LocationTracking {
    /// Send the device position over the live socket.
    pub fn update_location(&self, latitude: f64, longitude: f64, note: &str) -> bool {
        self.slot
            .current()
            .is_some_and(|session| session.update_location(latitude, longitude, note))
    }

    /// User-initiated reconnect, e.g. from a "Reconnect" button.
    pub fn reconnect(&self) {
        let Some(session) = self.slot.current() else {
            return;
        };
        spawn(async move {
            if let Err(e) = session.reconnect().await {
                crate::log_error!("Reconnect failed: {}", e);
            }
        });
    }

    /// Reload the REST snapshot.
    pub fn refresh(&self) {
        let Some(session) = self.slot.current() else {
            return;
        };
        spawn(async move {
            session.refresh().await;
        });
    }
}

/// Track a transportation for the lifetime of the calling component.
///
/// Needs a [`ConnectionRegistry`] in context. Components tracking the same
/// transportation share one socket; it closes when the last one unmounts.
/// A new `entity_id` stops the old session and starts over.
///
/// ```rust,ignore
/// let tracking = use_location_tracking(TrackedEntityId::from(id));
/// let state = tracking.state.read();
/// rsx! {
///     if let Some(current) = state.current {
///         Marker { lat: current.latitude(), lng: current.longitude() }
///     }
/// }
/// ```
pub fn use_location_tracking(entity_id: TrackedEntityId) -> LocationTracking {
    let registry = use_context::<ConnectionRegistry>();
    let mut state = use_signal(TrackingState::default);
    let slot = use_hook(|| Rc::new(HookSlot::default()));

    // Track the prop so the effect below re-runs on change
    let mut tracked_id = use_signal(|| entity_id.clone());
    if *tracked_id.peek() != entity_id {
        tracked_id.set(entity_id);
    }

    use_effect({
        let slot = slot.clone();
        move || {
            let entity_id = tracked_id();
            let tracked = slot.sessions.track(&registry, entity_id);
            if matches!(tracked, Ok(None)) {
                return;
            }
            slot.cancel_tasks();

            let session = match tracked {
                Ok(Some(session)) => session,
                Ok(None) => return,
                Err(e) => {
                    crate::log_error!("Location tracking disabled: {}", e);
                    state.set(TrackingState {
                        loading: false,
                        error: Some(e.to_string()),
                        ..TrackingState::default()
                    });
                    return;
                }
            };
            state.set(session.state());

            // Mirror the watch channel into the signal
            let mut updates = session.subscribe();
            let mirror = spawn(async move {
                while updates.changed().await.is_ok() {
                    let next = updates.borrow_and_update().clone();
                    state.set(next);
                }
            });

            let starting = spawn({
                let session = session.clone();
                async move {
                    if let Err(e) = session.start().await {
                        crate::log_error!("Failed to start tracking: {}", e);
                    }
                }
            });

            slot.tasks.borrow_mut().extend([mirror, starting]);
        }
    });

    use_drop({
        let slot = slot.clone();
        move || {
            slot.cancel_tasks();
            slot.sessions.clear();
        }
    });

    LocationTracking { state, slot }
}
