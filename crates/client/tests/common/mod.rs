//! In-memory collaborators for registry and session tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{FutureExt, StreamExt};
use nakliye_client::api_client::TrackingApi;
use nakliye_client::config::TrackingConfig;
use nakliye_client::ws::{
    ChannelObserver, CloseInfo, ConnectionEvent, ConnectionObserver, ConnectionRegistry, OpenedSocket,
    SocketEvent, SocketSink, Transport,
};
use nakliye_shared::{ApiError, TrackedEntityId, TrackingError, TransportationSnapshot};
use serde_json::Value;
use tokio::time::Instant;

/// Let spawned tasks run without moving the paused clock.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub fn snapshot(payload: Value) -> TransportationSnapshot {
    serde_json::from_value(payload).expect("valid snapshot json")
}

pub fn registry_with(
    config: TrackingConfig,
    api: &Arc<FakeApi>,
    transport: &Arc<FakeTransport>,
) -> ConnectionRegistry {
    ConnectionRegistry::new(config, api.clone(), transport.clone())
}

pub fn registry(api: &Arc<FakeApi>, transport: &Arc<FakeTransport>) -> ConnectionRegistry {
    registry_with(TrackingConfig::default(), api, transport)
}

// --- API ---

pub struct FakeApi {
    snapshots: Mutex<VecDeque<Result<TransportationSnapshot, ApiError>>>,
    token: Mutex<Result<Option<String>, ApiError>>,
    snapshot_delay: Mutex<Option<Duration>>,
    token_delay: Mutex<Option<Duration>>,
    snapshot_calls: AtomicUsize,
    token_calls: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            snapshots: Mutex::new(VecDeque::new()),
            token: Mutex::new(Ok(None)),
            snapshot_delay: Mutex::new(None),
            token_delay: Mutex::new(None),
            snapshot_calls: AtomicUsize::new(0),
            token_calls: AtomicUsize::new(0),
        })
    }

    pub fn push_snapshot(&self, result: Result<TransportationSnapshot, ApiError>) {
        self.snapshots.lock().unwrap().push_back(result);
    }

    pub fn set_token(&self, token: Result<Option<String>, ApiError>) {
        *self.token.lock().unwrap() = token;
    }

    pub fn delay_snapshots(&self, delay: Duration) {
        *self.snapshot_delay.lock().unwrap() = Some(delay);
    }

    pub fn delay_tokens(&self, delay: Duration) {
        *self.token_delay.lock().unwrap() = Some(delay);
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackingApi for FakeApi {
    async fn fetch_snapshot(
        &self,
        _id: &TrackedEntityId,
    ) -> Result<TransportationSnapshot, ApiError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.snapshot_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.snapshots
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ApiError::Http {
                status: 404,
                body: r#"{"detail": "Not found."}"#.to_string(),
            }))
    }

    async fn fetch_websocket_token(
        &self,
        _id: &TrackedEntityId,
    ) -> Result<Option<String>, ApiError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.token_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.token.lock().unwrap().clone()
    }
}

// --- Transport ---

#[derive(Default)]
pub struct FakeSink {
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
    closed: Mutex<Option<(u16, String)>>,
    /// Where the server side answers a client close.
    echo: Mutex<Option<UnboundedSender<SocketEvent>>>,
    hold_close: AtomicBool,
}

impl FakeSink {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn closed(&self) -> Option<(u16, String)> {
        self.closed.lock().unwrap().clone()
    }

    /// Leave the close handshake hanging until [`FakeSink::finish_close`].
    pub fn hold_close(&self) {
        self.hold_close.store(true, Ordering::SeqCst);
    }

    pub fn finish_close(&self) {
        if let Some((code, reason)) = self.closed() {
            self.echo_close(code, reason);
        }
    }

    fn echo_close(&self, code: u16, reason: String) {
        if let Some(echo) = self.echo.lock().unwrap().as_ref() {
            let _ = echo.unbounded_send(SocketEvent::Close { code, reason });
        }
    }
}

impl SocketSink for FakeSink {
    fn send_text(&self, text: String) -> Result<(), TrackingError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TrackingError::Transport("socket is not open".to_string()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        {
            let mut closed = self.closed.lock().unwrap();
            if closed.is_some() {
                return;
            }
            *closed = Some((code, reason.to_string()));
        }
        if !self.hold_close.load(Ordering::SeqCst) {
            self.echo_close(code, reason.to_string());
        }
    }
}

pub struct FakeSocket {
    pub url: String,
    pub opened_at: Instant,
    pub sink: Arc<FakeSink>,
    events: UnboundedSender<SocketEvent>,
}

/// Records every socket it opens; tests drive the server side by hand.
#[derive(Default)]
pub struct FakeTransport {
    sockets: Mutex<Vec<FakeSocket>>,
    fail_next: AtomicBool,
    attempts: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `open` fails as if the URL were rejected.
    pub fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    pub fn url(&self, index: usize) -> String {
        self.sockets.lock().unwrap()[index].url.clone()
    }

    pub fn opened_at(&self, index: usize) -> Instant {
        self.sockets.lock().unwrap()[index].opened_at
    }

    pub fn sink(&self, index: usize) -> Arc<FakeSink> {
        self.sockets.lock().unwrap()[index].sink.clone()
    }

    pub fn last(&self) -> usize {
        self.open_count() - 1
    }

    pub fn emit(&self, index: usize, event: SocketEvent) {
        let sockets = self.sockets.lock().unwrap();
        let _ = sockets[index].events.unbounded_send(event);
    }

    /// Complete the handshake of socket `index`.
    pub fn accept(&self, index: usize) {
        self.sink(index).open.store(true, Ordering::SeqCst);
        self.emit(index, SocketEvent::Open);
    }

    /// Close socket `index` from the server side.
    pub fn close(&self, index: usize, code: u16) {
        self.sink(index).open.store(false, Ordering::SeqCst);
        self.emit(
            index,
            SocketEvent::Close {
                code,
                reason: String::new(),
            },
        );
    }

    pub fn push(&self, index: usize, payload: Value) {
        self.emit(index, SocketEvent::Text(payload.to_string()));
    }
}

impl Transport for FakeTransport {
    fn open(&self, url: &str) -> Result<OpenedSocket, TrackingError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TrackingError::Transport(format!("cannot open {url}")));
        }

        let (events, rx) = unbounded();
        let sink = Arc::new(FakeSink::default());
        *sink.echo.lock().unwrap() = Some(events.clone());
        self.sockets.lock().unwrap().push(FakeSocket {
            url: url.to_string(),
            opened_at: Instant::now(),
            sink: sink.clone(),
            events,
        });
        Ok(OpenedSocket { sink, events: rx })
    }
}

// --- Observers ---

/// Collects callbacks through a `ChannelObserver` and drains them on demand.
pub struct RecordingObserver {
    channel: ChannelObserver,
    rx: Mutex<UnboundedReceiver<ConnectionEvent>>,
    seen: Mutex<Vec<ConnectionEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(Self {
            channel: ChannelObserver::new(tx),
            rx: Mutex::new(rx),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        let mut rx = self.rx.lock().unwrap();
        let mut seen = self.seen.lock().unwrap();
        while let Some(Some(event)) = rx.next().now_or_never() {
            seen.push(event);
        }
        seen.clone()
    }

    pub fn closes(&self) -> Vec<CloseInfo> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ConnectionEvent::Close(_, info) => Some(info),
                _ => None,
            })
            .collect()
    }

    pub fn last_close(&self) -> CloseInfo {
        self.closes().pop().expect("a close event")
    }
}

impl ConnectionObserver for RecordingObserver {
    fn on_open(&self, entity_id: &TrackedEntityId) {
        self.channel.on_open(entity_id);
    }

    fn on_message(&self, entity_id: &TrackedEntityId, payload: &Value) {
        self.channel.on_message(entity_id, payload);
    }

    fn on_close(&self, entity_id: &TrackedEntityId, info: &CloseInfo) {
        self.channel.on_close(entity_id, info);
    }

    fn on_error(&self, entity_id: &TrackedEntityId, message: &str) {
        self.channel.on_error(entity_id, message);
    }
}
