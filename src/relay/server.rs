//! Socket.IO relay server
//! Pairs initiators and receivers by token and forwards their descriptions

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use super::hub::{ConnId, Envelope, RelayHub};
use crate::transport::socketio::{EnginePacket, Handshake, SocketPacket, DEFAULT_PATH};

const PING_INTERVAL: Duration = Duration::from_secs(25);
const PING_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_PAYLOAD: u64 = 1_000_000;

#[derive(Clone, Default)]
pub struct RelayState {
    hub: Arc<Mutex<RelayHub>>,
    peers: Arc<RwLock<HashMap<ConnId, mpsc::UnboundedSender<Message>>>>,
    next_id: Arc<AtomicU64>,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_count(&self) -> usize {
        self.peers.read().len()
    }

    fn deliver(&self, envelopes: Vec<Envelope>) {
        let peers = self.peers.read();
        for envelope in envelopes {
            let frame = SocketPacket::event(envelope.name, envelope.args).to_frame();
            match peers.get(&envelope.to) {
                Some(sender) => {
                    let _ = sender.send(Message::Text(frame));
                }
                None => log::debug!("Connection {} is gone, dropping {}", envelope.to, envelope.name),
            }
        }
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route(DEFAULT_PATH, get(websocket_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the relay on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    log::info!("Relay listening on http://{}", addr);
    log::info!("Socket.IO endpoint: ws://{}{}", addr, DEFAULT_PATH);
    axum::serve(listener, router(RelayState::new())).await
}

async fn root() -> &'static str {
    "Signaling relay"
}

async fn health(State(state): State<RelayState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "signaling-relay",
        "connections": state.connection_count(),
    }))
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
    let sid = Uuid::new_v4().simple().to_string();
    log::info!("Connection {} opened (sid {})", id, sid);

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let sender_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;
        loop {
            let msg = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                _ = ping.tick() => Message::Text(EnginePacket::Ping(String::new()).encode()),
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let open = EnginePacket::Open(Handshake {
        sid: sid.clone(),
        upgrades: Vec::new(),
        ping_interval: PING_INTERVAL.as_secs() * 1000,
        ping_timeout: PING_TIMEOUT.as_secs() * 1000,
        max_payload: MAX_PAYLOAD,
    });
    let _ = tx.send(Message::Text(open.encode()));

    state.peers.write().insert(id, tx.clone());
    state.hub.lock().connect(id);

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let payload = match EnginePacket::decode(&text) {
            Ok(EnginePacket::Message(payload)) => payload,
            Ok(EnginePacket::Ping(data)) => {
                let _ = tx.send(Message::Text(EnginePacket::Pong(data).encode()));
                continue;
            }
            Ok(EnginePacket::Close) => break,
            Ok(_) => continue,
            Err(e) => {
                log::warn!("Connection {}: bad Engine.IO packet: {}", id, e);
                continue;
            }
        };

        match SocketPacket::decode(&payload) {
            Ok(SocketPacket::Connect(_)) => {
                let ack = SocketPacket::Connect(Some(serde_json::json!({ "sid": sid })));
                let _ = tx.send(Message::Text(ack.to_frame()));
            }
            Ok(SocketPacket::Event { name, args, .. }) => {
                log::debug!("Connection {} sent {}", id, name);
                let envelopes = state.hub.lock().handle(id, &name, &args);
                state.deliver(envelopes);
            }
            Ok(SocketPacket::Disconnect) => break,
            Ok(_) => {}
            Err(e) => log::warn!("Connection {}: bad Socket.IO packet: {}", id, e),
        }
    }

    // Cleanup
    sender_task.abort();
    state.peers.write().remove(&id);
    let envelopes = state.hub.lock().disconnect(id);
    state.deliver(envelopes);
    log::info!("Connection {} closed", id);
}
