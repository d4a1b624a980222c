//! Pairing and forwarding rules, independent of any socket

use std::collections::HashMap;

use log::{debug, info, warn};
use serde_json::Value;
use uuid::Uuid;

use crate::signaling::codec;
use crate::signaling::event::{
    ACK_ANSWER, INITIATOR_TOKEN, NEW_INITIATOR, NEW_RECEIVER, REQ_DISCONNECT, SEND_ANSWER, SEND_OFFER,
};
use crate::signaling::Token;

pub type ConnId = u64;

pub const UNKNOWN_TOKEN: &str = "unknown or expired token";
pub const INITIATOR_GONE: &str = "initiator disconnected";

const TOKEN_LEN: usize = 8;

/// An event the server must deliver to connection `to`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub to: ConnId,
    pub name: &'static str,
    pub args: Vec<Value>,
}

impl Envelope {
    fn new(to: ConnId, name: &'static str, args: Vec<Value>) -> Self {
        Self { to, name, args }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Peer {
    Unassigned,
    Initiator {
        token: Option<Token>,
        receiver: Option<ConnId>,
        completed: bool,
    },
    Receiver {
        initiator: ConnId,
    },
}

#[derive(Debug, Default)]
pub struct RelayHub {
    peers: HashMap<ConnId, Peer>,
    pending: HashMap<Token, ConnId>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, id: ConnId) {
        self.peers.insert(id, Peer::Unassigned);
    }

    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    pub fn pending_tokens(&self) -> usize {
        self.pending.len()
    }

    pub fn handle(&mut self, id: ConnId, name: &str, args: &[Value]) -> Vec<Envelope> {
        let Some(peer) = self.peers.get(&id).cloned() else {
            warn!("Event {} from unknown connection {}", name, id);
            return Vec::new();
        };

        match (name, &peer) {
            (NEW_INITIATOR, Peer::Unassigned) => self.announce(id),
            (NEW_RECEIVER, Peer::Unassigned) => self.join(id, args),
            (SEND_OFFER, &Peer::Initiator { receiver: Some(to), .. }) => {
                self.forward(id, to, SEND_OFFER, args)
            }
            (SEND_ANSWER, &Peer::Receiver { initiator }) => self.forward(id, initiator, SEND_ANSWER, args),
            (ACK_ANSWER, &Peer::Initiator { receiver: Some(to), .. }) => {
                if let Some(Peer::Initiator { completed, .. }) = self.peers.get_mut(&id) {
                    *completed = true;
                }
                info!("Connection {} acknowledged the answer of {}", id, to);
                vec![Envelope::new(to, ACK_ANSWER, Vec::new())]
            }
            _ => {
                warn!("Dropping {} from connection {} ({:?})", name, id, peer);
                Vec::new()
            }
        }
    }

    pub fn disconnect(&mut self, id: ConnId) -> Vec<Envelope> {
        match self.peers.remove(&id) {
            Some(Peer::Initiator {
                token,
                receiver,
                completed,
            }) => {
                if let Some(token) = token {
                    self.pending.remove(&token);
                }
                match receiver {
                    Some(to) if !completed && self.peers.contains_key(&to) => {
                        info!("Initiator {} left before completing, releasing {}", id, to);
                        vec![Envelope::new(to, REQ_DISCONNECT, vec![Value::from(INITIATOR_GONE)])]
                    }
                    _ => Vec::new(),
                }
            }
            Some(Peer::Receiver { initiator }) => {
                if let Some(Peer::Initiator { receiver, .. }) = self.peers.get_mut(&initiator) {
                    if *receiver == Some(id) {
                        *receiver = None;
                    }
                }
                Vec::new()
            }
            Some(Peer::Unassigned) | None => Vec::new(),
        }
    }

    fn announce(&mut self, id: ConnId) -> Vec<Envelope> {
        let token = self.issue_token();
        info!("Connection {} is an initiator, token {}", id, token);
        self.pending.insert(token.clone(), id);
        self.peers.insert(
            id,
            Peer::Initiator {
                token: Some(token.clone()),
                receiver: None,
                completed: false,
            },
        );
        vec![Envelope::new(id, INITIATOR_TOKEN, vec![Value::from(token.as_str())])]
    }

    fn join(&mut self, id: ConnId, args: &[Value]) -> Vec<Envelope> {
        let reject = || vec![Envelope::new(id, REQ_DISCONNECT, vec![Value::from(UNKNOWN_TOKEN)])];

        let Some(token) = args.first().and_then(Value::as_str).map(Token::from) else {
            warn!("Connection {} joined without a token", id);
            return reject();
        };
        let Some(initiator) = self.pending.remove(&token) else {
            info!("Connection {} presented unknown token {}", id, token);
            return reject();
        };

        match self.peers.get_mut(&initiator) {
            Some(Peer::Initiator {
                token: held, receiver, ..
            }) if receiver.is_none() => {
                *held = None;
                *receiver = Some(id);
            }
            _ => return reject(),
        }
        self.peers.insert(id, Peer::Receiver { initiator });

        info!("Paired receiver {} with initiator {}", id, initiator);
        vec![Envelope::new(initiator, NEW_RECEIVER, Vec::new())]
    }

    fn forward(&self, from: ConnId, to: ConnId, name: &'static str, args: &[Value]) -> Vec<Envelope> {
        let Some(description) = args.first() else {
            warn!("Dropping {} from {} without a description", name, from);
            return Vec::new();
        };
        if let Err(e) = codec::decode(description) {
            warn!("Dropping {} from {}: {}", name, from, e);
            return Vec::new();
        }
        debug!("Forwarding {} from {} to {}", name, from, to);
        vec![Envelope::new(to, name, vec![description.clone()])]
    }

    fn issue_token(&self) -> Token {
        loop {
            let mut token = Uuid::new_v4().simple().to_string();
            token.truncate(TOKEN_LEN);
            let token = Token::new(token);
            if !self.pending.contains_key(&token) {
                return token;
            }
        }
    }
}
