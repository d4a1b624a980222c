//! WebSocket Socket.IO client

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::socketio::{EnginePacket, SocketPacket, DEFAULT_PATH, ENGINE_IO_VERSION};
use super::{Connection, Connector, Transport, TransportError, TransportEvent};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens Socket.IO sessions over a WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    path: String,
}

impl WsConnector {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_PATH)
    }
}

/// Map a server address such as `http://host:3000` to its Socket.IO
/// WebSocket endpoint.
pub fn endpoint_url(server_addr: &str, path: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(server_addr)?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::AddressError(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::AddressError(format!("cannot use scheme {}", scheme)))?;

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(path);
    }
    url.query_pairs_mut()
        .append_pair("EIO", ENGINE_IO_VERSION)
        .append_pair("transport", "websocket");

    Ok(url)
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, server_addr: &str) -> Result<Connection, TransportError> {
        let url = endpoint_url(server_addr, &self.path)?;
        log::info!("Connecting to relay at {}", url);

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (sink, stream) = ws_stream.split();

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(write_loop(sink, outgoing_rx));
        tokio::spawn(read_loop(stream, outgoing_tx.clone(), event_tx));

        Ok(Connection {
            transport: Box::new(WsTransport {
                outgoing: outgoing_tx,
                closed: AtomicBool::new(false),
            }),
            events: event_rx,
        })
    }
}

struct WsTransport {
    outgoing: mpsc::UnboundedSender<Message>,
    closed: AtomicBool,
}

impl Transport for WsTransport {
    fn emit(&self, name: &str, args: Vec<Value>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let frame = SocketPacket::event(name, args).to_frame();
        self.outgoing
            .send(Message::Text(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outgoing.send(Message::Text(SocketPacket::Disconnect.to_frame()));
        let _ = self.outgoing.send(Message::Close(None));
    }
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut outgoing: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = outgoing.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            log::debug!("WebSocket write failed: {}", e);
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop<S>(
    mut stream: S,
    outgoing: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut reason = "connection closed".to_string();
    // Set from the open handshake; any frame from the server resets it.
    let mut liveness: Option<Duration> = None;

    loop {
        let next = match liveness {
            Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    log::warn!("Relay silent for {:?}, dropping the connection", limit);
                    reason = "ping timeout".to_string();
                    break;
                }
            },
            None => stream.next().await,
        };
        let Some(frame) = next else {
            break;
        };

        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                return;
            }
        };

        let packet = match EnginePacket::decode(&text) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("Dropping bad Engine.IO packet: {}", e);
                continue;
            }
        };

        match packet {
            EnginePacket::Open(handshake) => {
                log::debug!("Engine.IO open, sid {}", handshake.sid);
                liveness = handshake.liveness_timeout();
                let _ = outgoing.send(Message::Text(SocketPacket::Connect(None).to_frame()));
            }
            EnginePacket::Ping(data) => {
                let _ = outgoing.send(Message::Text(EnginePacket::Pong(data).encode()));
            }
            EnginePacket::Close => {
                reason = "server closed the session".to_string();
                break;
            }
            EnginePacket::Message(payload) => match SocketPacket::decode(&payload) {
                Ok(SocketPacket::Connect(_)) => {
                    let _ = events.send(TransportEvent::Connected);
                }
                Ok(SocketPacket::Event { name, args, .. }) => {
                    let _ = events.send(TransportEvent::Message { name, args });
                }
                Ok(SocketPacket::Disconnect) => {
                    reason = "server disconnected the socket".to_string();
                    break;
                }
                Ok(SocketPacket::ConnectError(data)) => {
                    let message = data
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| data.to_string());
                    let _ = events.send(TransportEvent::Error(format!("connect refused: {}", message)));
                    return;
                }
                Ok(SocketPacket::Ack { .. }) => {}
                Err(e) => log::warn!("Dropping bad Socket.IO packet: {}", e),
            },
            EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {}
        }
    }

    let _ = events.send(TransportEvent::Disconnected(reason));
}
