//! Fan-out of system-mode changes to connected clients.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::AppState;

pub const SYSTEM_STATUS_EVENT: &str = "systemStatusUpdate";

/// Publishes the new online flag after every toggle. Delivery is
/// fire-and-forget: no acknowledgment, no replay for late subscribers.
pub trait ModeBroadcaster: Send + Sync {
    fn publish(&self, online: bool);
}

/// Bounded in-process channel. Slow subscribers lose old messages rather
/// than blocking publishers.
#[derive(Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<bool>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl ModeBroadcaster for ChannelBroadcaster {
    fn publish(&self, online: bool) {
        // Err only means nobody is listening.
        match self.tx.send(online) {
            Ok(receivers) => debug!(online, receivers, "broadcast system status"),
            Err(_) => debug!(online, "system status changed with no subscribers"),
        }
    }
}

pub fn status_frame(online: bool) -> String {
    json!({"event": SYSTEM_STATUS_EVENT, "data": online}).to_string()
}

// ── WebSocket endpoint ───────────────────────────────────────────────────────

pub async fn system_events(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

async fn forward_events(mut socket: WebSocket, mut rx: broadcast::Receiver<bool>) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(online) => {
                    if socket.send(Message::Text(status_frame(online).into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "system events subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("system events subscriber disconnected");
}
