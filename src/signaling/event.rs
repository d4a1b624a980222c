//! Named events exchanged with the relay

use serde_json::Value;

use super::codec;
use super::types::{DecodeError, SessionDescription, Token};

pub const NEW_INITIATOR: &str = "signaling-new-initiator";
pub const INITIATOR_TOKEN: &str = "signaling-new-initiator:token";
pub const NEW_RECEIVER: &str = "signaling-new-receiver";
pub const SEND_OFFER: &str = "signaling-send-offer";
pub const SEND_ANSWER: &str = "signaling-send-answer";
pub const ACK_ANSWER: &str = "signaling-ack-answer";
pub const REQ_DISCONNECT: &str = "signaling-req-disconnect";

const DEFAULT_DISCONNECT_REASON: &str = "disconnect requested by relay";

/// Relay → role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Token(Token),
    ReceiverJoined,
    Offer(SessionDescription),
    Answer(SessionDescription),
    AnswerAcked,
    DisconnectRequested(String),
}

impl InboundEvent {
    /// Validate a raw event. `Ok(None)` means the name is not part of the
    /// signaling protocol.
    pub fn decode(name: &str, args: &[Value]) -> Result<Option<Self>, DecodeError> {
        let event = match name {
            INITIATOR_TOKEN => InboundEvent::Token(Token::new(string_arg(name, args)?)),
            NEW_RECEIVER => InboundEvent::ReceiverJoined,
            SEND_OFFER => InboundEvent::Offer(codec::decode(first_arg(name, args)?)?),
            SEND_ANSWER => InboundEvent::Answer(codec::decode(first_arg(name, args)?)?),
            ACK_ANSWER => InboundEvent::AnswerAcked,
            REQ_DISCONNECT => {
                let reason = match args.first() {
                    None | Some(Value::Null) => DEFAULT_DISCONNECT_REASON.to_string(),
                    Some(_) => string_arg(name, args)?,
                };
                InboundEvent::DisconnectRequested(reason)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Token(_) => INITIATOR_TOKEN,
            InboundEvent::ReceiverJoined => NEW_RECEIVER,
            InboundEvent::Offer(_) => SEND_OFFER,
            InboundEvent::Answer(_) => SEND_ANSWER,
            InboundEvent::AnswerAcked => ACK_ANSWER,
            InboundEvent::DisconnectRequested(_) => REQ_DISCONNECT,
        }
    }
}

/// Role → relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    Announce,
    Offer(SessionDescription),
    AckAnswer,
    Join(Token),
    Answer(SessionDescription),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Announce => NEW_INITIATOR,
            OutboundEvent::Offer(_) => SEND_OFFER,
            OutboundEvent::AckAnswer => ACK_ANSWER,
            OutboundEvent::Join(_) => NEW_RECEIVER,
            OutboundEvent::Answer(_) => SEND_ANSWER,
        }
    }

    pub fn args(&self) -> Vec<Value> {
        match self {
            OutboundEvent::Announce | OutboundEvent::AckAnswer => Vec::new(),
            OutboundEvent::Offer(desc) | OutboundEvent::Answer(desc) => vec![codec::encode(desc)],
            OutboundEvent::Join(token) => vec![Value::String(token.as_str().to_string())],
        }
    }
}

fn first_arg<'a>(event: &str, args: &'a [Value]) -> Result<&'a Value, DecodeError> {
    args.first().ok_or_else(|| DecodeError::MissingPayload {
        event: event.to_string(),
    })
}

fn string_arg(event: &str, args: &[Value]) -> Result<String, DecodeError> {
    first_arg(event, args)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| DecodeError::InvalidPayload {
            event: event.to_string(),
            expected: "string",
        })
}
