//! Messaging transport used by the signaling roles
//!
//! A transport carries named events with a JSON argument list in both
//! directions. Incoming traffic arrives on an unbounded channel so nothing is
//! lost between opening the connection and the session starting to listen.

pub mod memory;
pub mod socketio;
pub mod websocket;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::{MemoryConnector, MemoryPeer};
pub use websocket::WsConnector;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Message { name: String, args: Vec<Value> },
    Disconnected(String),
    Error(String),
}

/// Outgoing half of an open connection.
pub trait Transport: Send + Sync {
    fn emit(&self, name: &str, args: Vec<Value>) -> Result<(), TransportError>;

    fn close(&self);
}

pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, server_addr: &str) -> Result<Connection, TransportError>;
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(#[from] socketio::PacketError),

    #[error("Invalid address: {0}")]
    AddressError(String),

    #[error("Connection closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::ConnectionError(e.to_string())
    }
}

impl From<url::ParseError> for TransportError {
    fn from(e: url::ParseError) -> Self {
        TransportError::AddressError(e.to_string())
    }
}
