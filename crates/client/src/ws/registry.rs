//! Per-transportation socket registry.
//!
//! One socket per tracked transportation, shared by every observer of that
//! transportation. The registry owns the socket handles, reconnect timers and
//! attempt counters; observers only ever see callbacks.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_channel::mpsc::UnboundedReceiver;
use futures_util::StreamExt;
use nakliye_shared::{
    ClientCommand, CloseCode, Position, TrackedEntityId, TrackingError, CLOSE_ABNORMAL,
};
use serde_json::Value;
use tokio::task::AbortHandle;

use super::connection::{ConnectionState, OpenedSocket, SocketEvent, SocketSink, Transport};
use super::observer::{CloseInfo, ConnectionObserver};
use super::reconnect::{ReconnectPhase, ReconnectPolicy, RetryDecision};
use crate::api_client::TrackingApi;
use crate::config::TrackingConfig;

/// What observers are told when the socket reports an error. Details only
/// go to the log.
pub const GENERIC_ERROR: &str = "Connection error. Live tracking may be interrupted.";

const CLIENT_DISCONNECT_REASON: &str = "Client disconnected";

/// Proof of one observer registration. Hand it back to
/// [`ConnectionRegistry::release`] when done observing.
#[derive(Debug, PartialEq, Eq)]
pub struct Subscription {
    entity_id: TrackedEntityId,
    observer_id: u64,
}

impl Subscription {
    pub fn entity_id(&self) -> &TrackedEntityId {
        &self.entity_id
    }
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub entity_id: TrackedEntityId,
    pub state: ConnectionState,
    pub observers: usize,
    pub reconnect_attempts: u32,
}

struct Connection {
    /// Distinguishes this socket from earlier ones for the same entity, so
    /// late events from a replaced socket are ignored.
    conn_id: u64,
    state: ConnectionState,
    sink: Option<Arc<dyn SocketSink>>,
    pump: Option<AbortHandle>,
}

impl Connection {
    fn connecting(conn_id: u64) -> Self {
        Self {
            conn_id,
            state: ConnectionState::Connecting,
            sink: None,
            pump: None,
        }
    }

    /// Start a client-initiated close. The entry stays until the transport
    /// reports the final close.
    fn begin_close(&mut self, code: u16, reason: &str) {
        self.state = ConnectionState::Closing;
        if let Some(sink) = &self.sink {
            sink.close(code, reason);
        }
    }

    fn shut_down(self, code: u16, reason: &str) {
        if let Some(pump) = self.pump {
            pump.abort();
        }
        if let Some(sink) = self.sink {
            sink.close(code, reason);
        }
    }
}

struct ReconnectState {
    policy: ReconnectPolicy,
    timer: Option<AbortHandle>,
}

impl ReconnectState {
    /// Abort a pending retry. Returns whether one was pending.
    fn cancel_timer(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    disposed: bool,
    connections: HashMap<TrackedEntityId, Connection>,
    reconnects: HashMap<TrackedEntityId, ReconnectState>,
    observers: HashMap<TrackedEntityId, Vec<(u64, Arc<dyn ConnectionObserver>)>>,
}

impl RegistryState {
    fn is_current(&self, id: &TrackedEntityId, conn_id: u64) -> bool {
        self.connections
            .get(id)
            .is_some_and(|conn| conn.conn_id == conn_id)
    }

    /// Current and not being closed by us: its events still reach observers.
    fn is_active(&self, id: &TrackedEntityId, conn_id: u64) -> bool {
        self.connections
            .get(id)
            .is_some_and(|conn| conn.conn_id == conn_id && conn.state != ConnectionState::Closing)
    }

    fn is_live(&self, id: &TrackedEntityId) -> bool {
        self.connections
            .get(id)
            .is_some_and(|conn| conn.state.is_live())
    }

    fn observers_for(&self, id: &TrackedEntityId) -> Vec<Arc<dyn ConnectionObserver>> {
        self.observers
            .get(id)
            .map(|entries| entries.iter().map(|(_, o)| o.clone()).collect())
            .unwrap_or_default()
    }

    fn observer_count(&self, id: &TrackedEntityId) -> usize {
        self.observers.get(id).map_or(0, Vec::len)
    }
}

struct Inner {
    config: TrackingConfig,
    api: Arc<dyn TrackingApi>,
    transport: Arc<dyn Transport>,
    state: Mutex<RegistryState>,
    next_id: AtomicU64,
}

/// Registry of tracking sockets, keyed by transportation id.
///
/// Cheap to clone; clones share the same sockets. Needs a tokio runtime for
/// its background tasks.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    pub fn new(
        config: TrackingConfig,
        api: Arc<dyn TrackingApi>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                api,
                transport,
                state: Mutex::new(RegistryState::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registry backed by the REST API and tungstenite sockets.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn native(config: TrackingConfig) -> Self {
        let api = Arc::new(crate::api_client::ApiClient::from_config(&config));
        Self::new(config, api, Arc::new(super::connection::TungsteniteTransport))
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.inner.config
    }

    pub fn api(&self) -> Arc<dyn TrackingApi> {
        self.inner.api.clone()
    }

    /// Register `observer` for `entity_id` and make sure a socket is open or
    /// opening.
    ///
    /// Idempotent per entity: while a socket is connecting or open, this only
    /// adds the observer. Otherwise any stale entry is torn down, a socket
    /// token is requested (failure is logged and the socket opens without
    /// one) and a new socket is opened. Socket failures are reported through
    /// the observer, never as an `Err`.
    pub async fn connect(
        &self,
        entity_id: &TrackedEntityId,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Subscription, TrackingError> {
        if entity_id.is_blank() {
            return Err(TrackingError::MissingEntityId);
        }

        let (subscription, conn_id) = {
            let mut state = self.inner.lock();
            if state.disposed {
                return Err(TrackingError::RegistryDisposed);
            }

            let observer_id = self.inner.next_id();
            state
                .observers
                .entry(entity_id.clone())
                .or_default()
                .push((observer_id, observer));
            let subscription = Subscription {
                entity_id: entity_id.clone(),
                observer_id,
            };

            if state.is_live(entity_id) {
                crate::log_debug!(
                    "Transportation {} already has a socket ({} observers)",
                    entity_id,
                    state.observer_count(entity_id)
                );
                return Ok(subscription);
            }

            (subscription, self.inner.reserve(&mut state, entity_id))
        };

        self.inner.open(entity_id, conn_id).await;
        Ok(subscription)
    }

    /// Drop one observer. The socket is closed when the last one leaves.
    /// Releasing twice is harmless.
    pub fn release(&self, subscription: &Subscription) {
        let id = &subscription.entity_id;
        let remaining = {
            let mut state = self.inner.lock();
            let Some(entries) = state.observers.get_mut(id) else {
                return;
            };
            let before = entries.len();
            entries.retain(|(observer_id, _)| *observer_id != subscription.observer_id);
            if entries.len() == before {
                return;
            }
            let remaining = entries.len();
            if remaining == 0 {
                state.observers.remove(id);
            }
            remaining
        };

        if remaining == 0 {
            crate::log_debug!("Last observer of transportation {} left", id);
            self.disconnect(id);
        }
    }

    /// Close the socket for `entity_id` with a normal closure and cancel any
    /// pending retry. Observers stay registered and get an `on_close` right
    /// away; the entry reads `Closing` until the transport confirms.
    pub fn disconnect(&self, entity_id: &TrackedEntityId) {
        let (had_connection, had_retry, observers) = {
            let mut state = self.inner.lock();
            let had_retry = state
                .reconnects
                .remove(entity_id)
                .is_some_and(|mut reconnect| reconnect.cancel_timer());

            let phase = state
                .connections
                .get(entity_id)
                .map(|conn| (conn.state, conn.sink.is_some()));
            let had_connection = match phase {
                None | Some((ConnectionState::Closing, _)) => false,
                // Socket handed out: wait for the transport to confirm
                Some((conn_state, true)) => {
                    if let Some(conn) = state.connections.get_mut(entity_id) {
                        if let Some(sink) = conn.sink.as_ref().filter(|_| conn_state.is_open()) {
                            send_disconnect_notice(sink.as_ref());
                        }
                        conn.begin_close(1000, CLIENT_DISCONNECT_REASON);
                    }
                    true
                }
                // Still fetching a token: nothing to close yet
                Some((_, false)) => {
                    if let Some(conn) = state.connections.remove(entity_id) {
                        conn.shut_down(1000, CLIENT_DISCONNECT_REASON);
                    }
                    true
                }
            };
            (had_connection, had_retry, state.observers_for(entity_id))
        };

        if !had_connection && !had_retry {
            return;
        }

        crate::log_info!("Disconnected from transportation {}", entity_id);
        let info = CloseInfo::new(1000, CLIENT_DISCONNECT_REASON, RetryDecision::NotRetrying);
        for observer in observers {
            observer.on_close(entity_id, &info);
        }
    }

    /// Disconnect every entity with a socket or a pending retry.
    pub fn disconnect_all(&self) {
        let ids: BTreeSet<TrackedEntityId> = {
            let state = self.inner.lock();
            state
                .connections
                .keys()
                .chain(state.reconnects.keys())
                .cloned()
                .collect()
        };
        for id in &ids {
            self.disconnect(id);
        }
    }

    /// Disconnect everything and refuse further connects.
    pub fn dispose(&self) {
        self.inner.lock().disposed = true;
        self.disconnect_all();
        self.inner.lock().observers.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// True only while the socket is open.
    pub fn is_connected(&self, entity_id: &TrackedEntityId) -> bool {
        self.connection_state(entity_id).is_open()
    }

    pub fn connection_state(&self, entity_id: &TrackedEntityId) -> ConnectionState {
        self.inner
            .lock()
            .connections
            .get(entity_id)
            .map_or(ConnectionState::Closed, |conn| conn.state)
    }

    pub fn observer_count(&self, entity_id: &TrackedEntityId) -> usize {
        self.inner.lock().observer_count(entity_id)
    }

    pub fn reconnect_attempts(&self, entity_id: &TrackedEntityId) -> u32 {
        self.inner
            .lock()
            .reconnects
            .get(entity_id)
            .map_or(0, |reconnect| reconnect.policy.attempts())
    }

    pub fn reconnect_phase(&self, entity_id: &TrackedEntityId) -> ReconnectPhase {
        self.inner
            .lock()
            .reconnects
            .get(entity_id)
            .map_or(ReconnectPhase::Idle, |reconnect| reconnect.policy.phase())
    }

    /// Every entity the registry knows about, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionSummary> {
        let state = self.inner.lock();
        let ids: BTreeSet<&TrackedEntityId> = state
            .connections
            .keys()
            .chain(state.observers.keys())
            .chain(state.reconnects.keys())
            .collect();

        ids.into_iter()
            .map(|id| ConnectionSummary {
                entity_id: id.clone(),
                state: state
                    .connections
                    .get(id)
                    .map_or(ConnectionState::Closed, |conn| conn.state),
                observers: state.observer_count(id),
                reconnect_attempts: state
                    .reconnects
                    .get(id)
                    .map_or(0, |reconnect| reconnect.policy.attempts()),
            })
            .collect()
    }

    /// Report the device position to the server. False when the socket is
    /// not open or the send failed.
    pub fn send_location(
        &self,
        entity_id: &TrackedEntityId,
        position: Position,
        note: impl Into<String>,
    ) -> bool {
        self.send_command(entity_id, ClientCommand::location_update(position, note))
    }

    /// Announce the user's presence. False when the socket is not open or the
    /// send failed.
    pub fn send_user_status(&self, entity_id: &TrackedEntityId, is_online: bool) -> bool {
        self.send_command(entity_id, ClientCommand::UserStatus { is_online })
    }

    fn send_command(&self, entity_id: &TrackedEntityId, command: ClientCommand) -> bool {
        let sink = {
            let state = self.inner.lock();
            state
                .connections
                .get(entity_id)
                .filter(|conn| conn.state.is_open())
                .and_then(|conn| conn.sink.clone())
        };
        let Some(sink) = sink else {
            crate::log_warn!("Cannot send to transportation {}: not connected", entity_id);
            return false;
        };

        let json = match command.to_json() {
            Ok(json) => json,
            Err(e) => {
                crate::log_error!("Failed to encode message: {}", e);
                return false;
            }
        };

        match sink.send_text(json) {
            Ok(()) => true,
            Err(e) => {
                crate::log_error!("Send to transportation {} failed: {}", entity_id, e);
                false
            }
        }
    }

    /// User-initiated reconnect: resets the attempt counter (also after the
    /// policy gave up) and opens a socket unless one is live.
    pub async fn reconnect(&self, entity_id: &TrackedEntityId) -> Result<(), TrackingError> {
        if entity_id.is_blank() {
            return Err(TrackingError::MissingEntityId);
        }

        let conn_id = {
            let mut state = self.inner.lock();
            if state.disposed {
                return Err(TrackingError::RegistryDisposed);
            }
            if let Some(reconnect) = state.reconnects.get_mut(entity_id) {
                reconnect.cancel_timer();
                reconnect.policy.reset();
            }
            if state.is_live(entity_id) {
                return Ok(());
            }
            self.inner.reserve(&mut state, entity_id)
        };

        crate::log_info!("Manual reconnect for transportation {}", entity_id);
        self.inner.open(entity_id, conn_id).await;
        Ok(())
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn new_reconnect_state(&self) -> ReconnectState {
        ReconnectState {
            policy: ReconnectPolicy::new(self.config.reconnect.clone()),
            timer: None,
        }
    }

    /// Replace whatever entry exists for `id` with a fresh connecting slot.
    fn reserve(&self, state: &mut RegistryState, id: &TrackedEntityId) -> u64 {
        if let Some(stale) = state.connections.remove(id) {
            stale.shut_down(1000, "Replaced");
        }

        let reconnect = state
            .reconnects
            .entry(id.clone())
            .or_insert_with(|| self.new_reconnect_state());
        reconnect.cancel_timer();
        reconnect.policy.on_connect_started();

        let conn_id = self.next_id();
        state
            .connections
            .insert(id.clone(), Connection::connecting(conn_id));
        conn_id
    }

    /// Fetch a token and open the socket for a reserved slot.
    async fn open(self: &Arc<Self>, id: &TrackedEntityId, conn_id: u64) {
        let token = match self.api.fetch_websocket_token(id).await {
            Ok(Some(token)) => Some(token),
            Ok(None) => {
                crate::log_warn!("No socket token for transportation {}, connecting without one", id);
                None
            }
            Err(e) => {
                crate::log_warn!(
                    "Failed to get socket token for transportation {}: {}",
                    id,
                    e.summary()
                );
                None
            }
        };

        // The slot may have been disconnected or replaced during the fetch
        if !self.lock().is_current(id, conn_id) {
            crate::log_debug!("Connect for transportation {} superseded", id);
            return;
        }

        let url = self.config.websocket_url(id, token.as_deref());
        crate::log_info!("Connecting to {}", self.config.websocket_url(id, None));

        let OpenedSocket { sink, events } = match self.transport.open(&url) {
            Ok(socket) => socket,
            Err(e) => {
                crate::log_error!("Failed to open socket for transportation {}: {}", id, e);
                self.handle_event(id, conn_id, SocketEvent::Error(e.to_string()));
                self.handle_event(
                    id,
                    conn_id,
                    SocketEvent::Close {
                        code: CLOSE_ABNORMAL,
                        reason: e.to_string(),
                    },
                );
                return;
            }
        };

        {
            let mut state = self.lock();
            match state.connections.get_mut(id) {
                Some(conn) if conn.conn_id == conn_id => conn.sink = Some(sink.clone()),
                _ => {
                    sink.close(1000, "Replaced");
                    return;
                }
            }
        }

        let pump = tokio::spawn(pump_events(Arc::downgrade(self), id.clone(), conn_id, events))
            .abort_handle();

        let mut state = self.lock();
        match state.connections.get_mut(id) {
            Some(conn) if conn.conn_id == conn_id => conn.pump = Some(pump),
            // Already closed and removed by its own events
            _ => pump.abort(),
        }
    }

    fn handle_event(self: &Arc<Self>, id: &TrackedEntityId, conn_id: u64, event: SocketEvent) {
        match event {
            SocketEvent::Open => {
                let observers = {
                    let mut state = self.lock();
                    if !state.is_active(id, conn_id) {
                        return;
                    }
                    if let Some(conn) = state.connections.get_mut(id) {
                        conn.state = ConnectionState::Open;
                    }
                    if let Some(reconnect) = state.reconnects.get_mut(id) {
                        reconnect.policy.on_open();
                    }
                    state.observers_for(id)
                };

                crate::log_info!("Socket open for transportation {}", id);
                for observer in observers {
                    observer.on_open(id);
                }
            }
            SocketEvent::Text(text) => {
                let observers = {
                    let state = self.lock();
                    if !state.is_active(id, conn_id) {
                        return;
                    }
                    state.observers_for(id)
                };

                let payload: Value = match serde_json::from_str(&text) {
                    Ok(payload) => payload,
                    Err(e) => {
                        crate::log_warn!(
                            "Dropping malformed message for transportation {}: {}",
                            id,
                            e
                        );
                        return;
                    }
                };
                for observer in observers {
                    observer.on_message(id, &payload);
                }
            }
            SocketEvent::Error(detail) => {
                let observers = {
                    let state = self.lock();
                    if !state.is_active(id, conn_id) {
                        return;
                    }
                    state.observers_for(id)
                };

                crate::log_error!("Socket error for transportation {}: {}", id, detail);
                for observer in observers {
                    observer.on_error(id, GENERIC_ERROR);
                }
            }
            SocketEvent::Close { code, reason } => {
                let (observers, retry) = {
                    let mut state = self.lock();
                    if !state.is_current(id, conn_id) {
                        return;
                    }
                    let closed_by_us = state
                        .connections
                        .remove(id)
                        .is_some_and(|conn| conn.state == ConnectionState::Closing);
                    if closed_by_us {
                        // Observers already heard about it from `disconnect`
                        crate::log_debug!("Close handshake done for transportation {}", id);
                        return;
                    }

                    let retry = if CloseCode::from(code).should_reconnect()
                        && !state.disposed
                        && state.observer_count(id) > 0
                    {
                        self.schedule_reconnect(&mut state, id)
                    } else {
                        if let Some(mut reconnect) = state.reconnects.remove(id) {
                            reconnect.cancel_timer();
                        }
                        RetryDecision::NotRetrying
                    };
                    (state.observers_for(id), retry)
                };

                crate::log_info!(
                    "Socket for transportation {} closed with code {} {}",
                    id,
                    code,
                    reason
                );
                let info = CloseInfo::new(code, reason, retry);
                for observer in observers {
                    observer.on_close(id, &info);
                }
            }
        }
    }

    fn schedule_reconnect(
        self: &Arc<Self>,
        state: &mut RegistryState,
        id: &TrackedEntityId,
    ) -> RetryDecision {
        let reconnect = state
            .reconnects
            .entry(id.clone())
            .or_insert_with(|| self.new_reconnect_state());
        reconnect.cancel_timer();

        let decision = reconnect.policy.on_abnormal_close();
        match decision {
            RetryDecision::Scheduled { attempt, delay } => {
                crate::log_info!(
                    "Reconnecting transportation {} in {:?} (attempt {}/{})",
                    id,
                    delay,
                    attempt,
                    self.config.reconnect.max_attempts
                );
                let weak = Arc::downgrade(self);
                let id = id.clone();
                // Deadline counts from the close, not from the task's first poll.
                let sleep = tokio::time::sleep(delay);
                let timer = tokio::spawn(async move {
                    sleep.await;
                    if let Some(inner) = weak.upgrade() {
                        inner.fire_reconnect(&id).await;
                    }
                });
                reconnect.timer = Some(timer.abort_handle());
            }
            RetryDecision::Abandoned => {
                crate::log_warn!(
                    "Giving up on transportation {} after {} attempts",
                    id,
                    self.config.reconnect.max_attempts
                );
            }
            RetryDecision::NotRetrying => {}
        }
        decision
    }

    async fn fire_reconnect(self: &Arc<Self>, id: &TrackedEntityId) {
        let conn_id = {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            let Some(reconnect) = state.reconnects.get_mut(id) else {
                return;
            };
            reconnect.timer = None;
            let Some(attempt) = reconnect.policy.on_timer_fired() else {
                return;
            };
            if state.observer_count(id) == 0 {
                state.reconnects.remove(id);
                return;
            }
            if state.is_live(id) {
                return;
            }
            crate::log_info!("Reconnect attempt {} for transportation {}", attempt, id);
            self.reserve(&mut state, id)
        };

        self.open(id, conn_id).await;
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, connection) in state.connections.drain() {
            connection.shut_down(1001, "Registry dropped");
        }
        for (_, mut reconnect) in state.reconnects.drain() {
            reconnect.cancel_timer();
        }
    }
}

/// Forward socket events to the registry until the socket closes.
async fn pump_events(
    inner: Weak<Inner>,
    id: TrackedEntityId,
    conn_id: u64,
    mut events: UnboundedReceiver<SocketEvent>,
) {
    while let Some(event) = events.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let closed = matches!(event, SocketEvent::Close { .. });
        inner.handle_event(&id, conn_id, event);
        if closed {
            return;
        }
    }

    // The transport vanished without a close event
    if let Some(inner) = inner.upgrade() {
        inner.handle_event(
            &id,
            conn_id,
            SocketEvent::Close {
                code: CLOSE_ABNORMAL,
                reason: String::new(),
            },
        );
    }
}

/// Best effort: the server also notices the close frame.
fn send_disconnect_notice(sink: &dyn SocketSink) {
    match ClientCommand::graceful_disconnect().to_json() {
        Ok(json) => {
            if let Err(e) = sink.send_text(json) {
                crate::log_debug!("Disconnect notice not sent: {}", e);
            }
        }
        Err(e) => crate::log_warn!("Failed to encode disconnect notice: {}", e),
    }
}
