//! Native/Desktop socket transport using tokio-tungstenite.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use nakliye_shared::{TrackingError, CLOSE_ABNORMAL};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::CloseFrame, Message},
};

use super::{OpenedSocket, SocketEvent, SocketSink, Transport};

/// Close status reported when the peer closed without a status code.
const CLOSE_NO_STATUS: u16 = 1005;

/// Opens one tokio task per socket. Requires a running tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
    fn open(&self, url: &str) -> Result<OpenedSocket, TrackingError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| TrackingError::Transport(format!("invalid socket url '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TrackingError::Transport(format!(
                "unsupported socket scheme '{}'",
                parsed.scheme()
            )));
        }

        let (event_tx, event_rx) = unbounded();
        let (outgoing_tx, outgoing_rx) = unbounded();
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_socket(
            url.to_string(),
            event_tx,
            outgoing_rx,
            open.clone(),
        ));

        Ok(OpenedSocket {
            sink: Arc::new(TungsteniteSink {
                outgoing: outgoing_tx,
                open,
            }),
            events: event_rx,
        })
    }
}

enum Outgoing {
    Text(String),
    Close { code: u16, reason: String },
}

struct TungsteniteSink {
    outgoing: UnboundedSender<Outgoing>,
    open: Arc<AtomicBool>,
}

impl SocketSink for TungsteniteSink {
    fn send_text(&self, text: String) -> Result<(), TrackingError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TrackingError::Transport("socket is not open".to_string()));
        }
        self.outgoing
            .unbounded_send(Outgoing::Text(text))
            .map_err(|e| TrackingError::Transport(format!("Failed to send: {}", e)))
    }

    fn close(&self, code: u16, reason: &str) {
        self.open.store(false, Ordering::Release);
        let _ = self.outgoing.unbounded_send(Outgoing::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Drive one socket until it closes, reporting everything as events.
async fn run_socket(
    url: String,
    events: UnboundedSender<SocketEvent>,
    mut outgoing: UnboundedReceiver<Outgoing>,
    open: Arc<AtomicBool>,
) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            crate::log_error!("WebSocket connect failed: {}", e);
            let _ = events.unbounded_send(SocketEvent::Error(e.to_string()));
            let _ = events.unbounded_send(SocketEvent::Close {
                code: CLOSE_ABNORMAL,
                reason: e.to_string(),
            });
            return;
        }
    };

    open.store(true, Ordering::Release);
    let _ = events.unbounded_send(SocketEvent::Open);

    let (mut write, mut read) = ws_stream.split();

    let (code, reason) = loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.unbounded_send(SocketEvent::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                }
                Some(Ok(Message::Ping(data))) => {
                    // Pong is handled automatically by tungstenite
                    crate::log_debug!("Received ping: {:?}", data);
                }
                Some(Ok(_)) => {
                    // Ignore binary, pong, etc.
                }
                Some(Err(e)) => {
                    crate::log_error!("WebSocket read error: {}", e);
                    let _ = events.unbounded_send(SocketEvent::Error(e.to_string()));
                    break (CLOSE_ABNORMAL, e.to_string());
                }
                None => break (CLOSE_ABNORMAL, String::new()),
            },
            command = outgoing.next() => match command {
                Some(Outgoing::Text(json)) => {
                    if let Err(e) = write.send(Message::text(json)).await {
                        crate::log_error!("Send failed: {}", e);
                        let _ = events.unbounded_send(SocketEvent::Error(e.to_string()));
                        break (CLOSE_ABNORMAL, e.to_string());
                    }
                }
                Some(Outgoing::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: code.into(),
                        reason: reason.clone().into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    break (code, reason);
                }
                None => {
                    // Sink dropped without an explicit close
                    let _ = write.send(Message::Close(None)).await;
                    break (1000, String::new());
                }
            },
        }
    };

    open.store(false, Ordering::Release);
    crate::log_debug!("WebSocket to {} closed with {}", url, code);
    let _ = events.unbounded_send(SocketEvent::Close { code, reason });
}
