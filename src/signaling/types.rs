use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::TransportError;

/// Kind of a session description, in its canonical (wire) form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpType {
    pub const ALL: [SdpType; 4] = [
        SdpType::Offer,
        SdpType::Answer,
        SdpType::Pranswer,
        SdpType::Rollback,
    ];

    pub fn canonical_form(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        }
    }

    pub fn from_canonical_form(s: &str) -> Option<Self> {
        match s {
            "offer" => Some(SdpType::Offer),
            "answer" => Some(SdpType::Answer),
            "pranswer" => Some(SdpType::Pranswer),
            "rollback" => Some(SdpType::Rollback),
            _ => None,
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_form())
    }
}

impl FromStr for SdpType {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_canonical_form(s).ok_or_else(|| DecodeError::UnknownType(s.to_string()))
    }
}

/// An SDP offer or answer. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionDescription {
    kind: SdpType,
    body: String,
}

impl SessionDescription {
    pub fn new(kind: SdpType, body: impl Into<String>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    pub fn offer(body: impl Into<String>) -> Self {
        Self::new(SdpType::Offer, body)
    }

    pub fn answer(body: impl Into<String>) -> Self {
        Self::new(SdpType::Answer, body)
    }

    pub fn kind(&self) -> SdpType {
        self.kind
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }
}

/// Pairing token issued by the relay. Opaque to clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Token {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Token {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Phase a session can be left waiting in. Each one has its own timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Awaiting {
    Connection,
    Token,
    Receiver,
    Offer,
    Answer,
    Ack,
}

impl fmt::Display for Awaiting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            Awaiting::Connection => "waiting for the relay connection",
            Awaiting::Token => "waiting for a token",
            Awaiting::Receiver => "waiting for a receiver",
            Awaiting::Offer => "waiting for the offer",
            Awaiting::Answer => "waiting for the answer",
            Awaiting::Ack => "waiting for the answer acknowledgement",
        };
        f.write_str(what)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("session description is not a JSON object")]
    NotAnObject,

    #[error("session description has no \"type\"")]
    MissingType,

    #[error("unrecognized session description type: {0}")]
    UnknownType(String),

    #[error("session description has no \"sdp\"")]
    MissingSdp,

    #[error("{event} carries no payload")]
    MissingPayload { event: String },

    #[error("{event} payload is not a {expected}")]
    InvalidPayload {
        event: String,
        expected: &'static str,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Rejected by relay: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out {0}")]
    TimedOut(Awaiting),

    #[error("Cannot {operation} while {phase}")]
    InvalidState {
        operation: &'static str,
        phase: String,
    },

    #[error("Session closed before completing")]
    Closed,
}

impl From<TransportError> for SignalingError {
    fn from(e: TransportError) -> Self {
        SignalingError::Transport(e.to_string())
    }
}

/// An event that is legal on the wire but not in the session's current phase.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unexpected {event} while {phase}")]
pub struct UnexpectedEvent {
    pub event: &'static str,
    pub phase: String,
}
