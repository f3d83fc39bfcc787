//! One consumer's view of one transportation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nakliye_shared::{Position, PushUpdate, TrackedEntityId, TrackingError};
use serde_json::Value;
use tokio::sync::watch;

use super::state::{LinkStatus, TrackingState};
use crate::api_client::TrackingApi;
use crate::ws::{CloseInfo, ConnectionObserver, ConnectionRegistry, RetryDecision, Subscription};

/// Shown when the snapshot could not be loaded.
pub const FETCH_ERROR: &str = "Failed to load transportation data.";

const ABANDONED_MESSAGE: &str = "Live tracking stopped. Reconnect to resume.";

/// The part of a session the registry calls back into.
struct SessionShared {
    state: watch::Sender<TrackingState>,
    torn_down: AtomicBool,
    history_limit: usize,
}

impl SessionShared {
    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Mutate the published state unless the session is gone. `modify`
    /// returns whether it changed anything.
    fn update(&self, modify: impl FnOnce(&mut TrackingState) -> bool) {
        if self.is_torn_down() {
            return;
        }
        self.state.send_if_modified(modify);
    }
}

impl ConnectionObserver for SessionShared {
    fn on_open(&self, _entity_id: &TrackedEntityId) {
        self.update(|state| {
            state.connected = true;
            state.link = LinkStatus::Live;
            state.link_message = None;
            true
        });
    }

    fn on_message(&self, entity_id: &TrackedEntityId, payload: &Value) {
        let update = PushUpdate::from_value(payload);
        if update.is_empty() {
            crate::log_debug!("Message for transportation {} had no tracking data", entity_id);
            return;
        }
        self.update(|state| state.merge_push(&update, self.history_limit));
    }

    fn on_close(&self, _entity_id: &TrackedEntityId, info: &CloseInfo) {
        let link = match info.retry {
            RetryDecision::Scheduled { attempt, delay } => LinkStatus::Retrying { attempt, delay },
            RetryDecision::Abandoned => LinkStatus::Abandoned,
            RetryDecision::NotRetrying if info.close_code().is_terminal() => LinkStatus::Denied,
            RetryDecision::NotRetrying => LinkStatus::Closed,
        };
        let message = match link {
            LinkStatus::Abandoned => Some(ABANDONED_MESSAGE.to_string()),
            _ => info.cause.clone(),
        };

        self.update(|state| {
            state.connected = false;
            state.link = link;
            state.link_message = message;
            true
        });
    }

    fn on_error(&self, _entity_id: &TrackedEntityId, message: &str) {
        self.update(|state| {
            if state.link_message.as_deref() == Some(message) {
                return false;
            }
            state.link_message = Some(message.to_string());
            true
        });
    }
}

/// Tracks one transportation: REST snapshot first, then live push updates.
///
/// State is published through a watch channel. Dropping the session (or
/// calling [`TrackingSession::stop`]) releases its share of the socket; results
/// that arrive afterwards are discarded.
pub struct TrackingSession {
    entity_id: TrackedEntityId,
    registry: ConnectionRegistry,
    api: Arc<dyn TrackingApi>,
    shared: Arc<SessionShared>,
    subscription: Mutex<Option<Subscription>>,
}

impl TrackingSession {
    pub fn new(
        registry: ConnectionRegistry,
        entity_id: impl Into<TrackedEntityId>,
    ) -> Result<Self, TrackingError> {
        let entity_id = entity_id.into();
        if entity_id.is_blank() {
            return Err(TrackingError::MissingEntityId);
        }

        let (state, _) = watch::channel(TrackingState::default());
        let shared = Arc::new(SessionShared {
            state,
            torn_down: AtomicBool::new(false),
            history_limit: registry.config().history_limit,
        });

        Ok(Self {
            api: registry.api(),
            entity_id,
            registry,
            shared,
            subscription: Mutex::new(None),
        })
    }

    pub fn entity_id(&self) -> &TrackedEntityId {
        &self.entity_id
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackingState> {
        self.shared.state.subscribe()
    }

    /// Current state, cloned.
    pub fn state(&self) -> TrackingState {
        self.shared.state.borrow().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_torn_down()
    }

    /// Load the snapshot, then join the live socket.
    pub async fn start(&self) -> Result<(), TrackingError> {
        self.refresh().await;
        self.attach().await
    }

    /// Fetch the REST snapshot again. Failures land in `state.error`; the
    /// last good positions stay.
    pub async fn refresh(&self) {
        if self.is_stopped() {
            return;
        }
        self.shared.update(|state| !std::mem::replace(&mut state.loading, true));

        let result = self.api.fetch_snapshot(&self.entity_id).await;
        if self.is_stopped() {
            crate::log_debug!("Discarding snapshot for stopped session {}", self.entity_id);
            return;
        }

        match result {
            Ok(snapshot) => self.shared.update(|state| {
                state.apply_snapshot(&snapshot, self.shared.history_limit);
                true
            }),
            Err(e) => {
                crate::log_error!(
                    "Failed to load transportation {}: {}",
                    self.entity_id,
                    e.summary()
                );
                self.shared.update(|state| {
                    state.apply_fetch_error(FETCH_ERROR);
                    true
                });
            }
        }
    }

    /// Register with the registry. A second call while attached is a no-op.
    pub async fn attach(&self) -> Result<(), TrackingError> {
        if self.is_stopped() || self.lock_subscription().is_some() {
            return Ok(());
        }

        self.shared.update(|state| {
            state.link = LinkStatus::Connecting;
            true
        });

        let observer: Arc<dyn ConnectionObserver> = self.shared.clone();
        let subscription = match self.registry.connect(&self.entity_id, observer).await {
            Ok(subscription) => subscription,
            Err(e) => {
                crate::log_error!("Cannot track transportation {}: {}", self.entity_id, e);
                self.shared.update(|state| {
                    state.link = LinkStatus::Closed;
                    state.link_message = Some(e.to_string());
                    true
                });
                return Err(e);
            }
        };

        // Stopped or attached concurrently while connecting
        let surplus = {
            let mut slot = self.lock_subscription();
            if self.is_stopped() || slot.is_some() {
                Some(subscription)
            } else {
                *slot = Some(subscription);
                None
            }
        };
        if let Some(surplus) = surplus {
            self.registry.release(&surplus);
            return Ok(());
        }

        self.mark_live_if_open();
        Ok(())
    }

    /// Send the device position. False when it is invalid or could not be
    /// sent.
    pub fn update_location(&self, latitude: f64, longitude: f64, note: &str) -> bool {
        let Some(position) = Position::new(latitude, longitude) else {
            crate::log_warn!("Refusing to send invalid position {}, {}", latitude, longitude);
            return false;
        };
        self.registry.send_location(&self.entity_id, position, note)
    }

    pub fn set_user_status(&self, is_online: bool) -> bool {
        self.registry.send_user_status(&self.entity_id, is_online)
    }

    /// Manual reconnect, also after automatic retries gave up.
    pub async fn reconnect(&self) -> Result<(), TrackingError> {
        if self.is_stopped() {
            return Ok(());
        }
        if self.lock_subscription().is_none() {
            return self.attach().await;
        }

        self.shared.update(|state| {
            state.link = LinkStatus::Connecting;
            state.link_message = None;
            true
        });
        self.registry.reconnect(&self.entity_id).await?;
        self.mark_live_if_open();
        Ok(())
    }

    /// Stop observing. Safe to call more than once.
    pub fn stop(&self) {
        let subscription = {
            let mut slot = self.lock_subscription();
            if self.shared.torn_down.swap(true, Ordering::AcqRel) {
                return;
            }
            slot.take()
        };

        if let Some(subscription) = subscription {
            self.registry.release(&subscription);
        }
        self.shared.state.send_modify(|state| {
            state.connected = false;
            state.link = LinkStatus::Idle;
        });
        crate::log_debug!("Stopped tracking transportation {}", self.entity_id);
    }

    fn mark_live_if_open(&self) {
        if self.registry.is_connected(&self.entity_id) {
            self.shared.update(|state| {
                let changed = !state.connected || state.link != LinkStatus::Live;
                state.connected = true;
                state.link = LinkStatus::Live;
                changed
            });
        }
    }

    fn lock_subscription(&self) -> MutexGuard<'_, Option<Subscription>> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Holds the session of whichever transportation a view currently shows.
///
/// Pointing it at a new id stops the previous session first, so a view that
/// switches transportations never keeps the old socket alive.
#[derive(Default)]
pub struct SessionSlot {
    current: Mutex<Option<Arc<TrackingSession>>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<TrackingSession>> {
        self.lock().clone()
    }

    /// Track `entity_id` from now on.
    ///
    /// Returns the new, not yet started session, or `Ok(None)` when that id
    /// is already tracked. A blank id still stops the previous session.
    pub fn track(
        &self,
        registry: &ConnectionRegistry,
        entity_id: impl Into<TrackedEntityId>,
    ) -> Result<Option<Arc<TrackingSession>>, TrackingError> {
        let entity_id = entity_id.into();
        let previous = {
            let mut current = self.lock();
            if current
                .as_ref()
                .is_some_and(|session| session.entity_id() == &entity_id && !session.is_stopped())
            {
                return Ok(None);
            }
            current.take()
        };
        if let Some(previous) = previous {
            previous.stop();
        }

        let session = Arc::new(TrackingSession::new(registry.clone(), entity_id)?);
        *self.lock() = Some(session.clone());
        Ok(Some(session))
    }

    /// Stop and forget the current session.
    pub fn clear(&self) {
        let previous = self.lock().take();
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<TrackingSession>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
