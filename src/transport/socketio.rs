//! Socket.IO v4 over Engine.IO v4, text packets only
//!
//! Engine.IO frame:  `<type digit><payload>`
//! Socket.IO packet: `<type digit>[/namespace,][ack id][json]`, carried in
//! an Engine.IO message (`4`). An event is therefore `42["name",arg...]`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_PATH: &str = "/socket.io/";
pub const ENGINE_IO_VERSION: &str = "4";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type {0:?}")]
    UnknownType(char),

    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("malformed event packet")]
    MalformedEvent,

    #[error("namespace {0} is not supported")]
    UnsupportedNamespace(String),

    #[error("binary packets are not supported")]
    BinaryUnsupported,
}

/// Engine.IO open handshake, sent by the server right after the upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: u64,
}

impl Handshake {
    /// How long the server may stay silent before the session counts as
    /// dead. `None` if the server announced no ping schedule.
    pub fn liveness_timeout(&self) -> Option<Duration> {
        let ms = self.ping_interval.saturating_add(self.ping_timeout);
        (ms > 0).then(|| Duration::from_millis(ms))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(handshake) => {
                // Handshake has only string/number fields
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }

    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let payload = chars.as_str();

        let packet = match kind {
            '0' => EnginePacket::Open(
                serde_json::from_str(payload).map_err(|e| PacketError::InvalidJson(e.to_string()))?,
            ),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(payload.to_string()),
            '3' => EnginePacket::Pong(payload.to_string()),
            '4' => EnginePacket::Message(payload.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            'b' => return Err(PacketError::BinaryUnsupported),
            other => return Err(PacketError::UnknownType(other)),
        };
        Ok(packet)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        args: Vec<Value>,
        ack: Option<u64>,
    },
    Ack {
        id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

impl SocketPacket {
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        SocketPacket::Event {
            name: name.into(),
            args,
            ack: None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(data)) => format!("0{}", data),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { name, args, ack } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                let id = ack.map(|id| id.to_string()).unwrap_or_default();
                format!("2{}{}", id, Value::Array(items))
            }
            SocketPacket::Ack { id, args } => format!("3{}{}", id, Value::Array(args.clone())),
            SocketPacket::ConnectError(data) => format!("4{}", data),
        }
    }

    /// Engine.IO message frame carrying this packet.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }

    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        if matches!(kind, '5' | '6') {
            return Err(PacketError::BinaryUnsupported);
        }
        if !('0'..='4').contains(&kind) {
            return Err(PacketError::UnknownType(kind));
        }
        let mut rest = chars.as_str();

        if rest.starts_with('/') {
            let (nsp, tail) = rest.split_once(',').unwrap_or((rest, ""));
            if nsp != "/" {
                return Err(PacketError::UnsupportedNamespace(nsp.to_string()));
            }
            rest = tail;
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack = if digits > 0 {
            rest[..digits].parse::<u64>().ok()
        } else {
            None
        };
        let body = &rest[digits..];

        let json = if body.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(body).map_err(|e| PacketError::InvalidJson(e.to_string()))?)
        };

        let packet = match kind {
            '0' => SocketPacket::Connect(json),
            '1' => SocketPacket::Disconnect,
            '2' => {
                let mut items = match json {
                    Some(Value::Array(items)) => items.into_iter(),
                    _ => return Err(PacketError::MalformedEvent),
                };
                let name = match items.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err(PacketError::MalformedEvent),
                };
                SocketPacket::Event {
                    name,
                    args: items.collect(),
                    ack,
                }
            }
            '3' => {
                let id = ack.ok_or(PacketError::MalformedEvent)?;
                let args = match json {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                SocketPacket::Ack { id, args }
            }
            '4' => SocketPacket::ConnectError(json.unwrap_or(Value::Null)),
            other => return Err(PacketError::UnknownType(other)),
        };
        Ok(packet)
    }
}
