//! Initiator: announces itself, gets a token, sends the offer, takes the answer

use std::fmt;

use crate::config::{SignalingConfig, Timeouts};
use crate::transport::{Connector, WsConnector};
use crate::transport::socketio::DEFAULT_PATH;

use super::event::{InboundEvent, OutboundEvent};
use super::session::{self, Action, Notifier, Role, Session};
use super::types::{Awaiting, SessionDescription, SignalingError, Token, UnexpectedEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiatorPhase {
    Idle,
    Connecting,
    Announced,
    AwaitingReceiver,
    OfferSent,
    Completed,
    Failed(SignalingError),
    Closed,
}

impl InitiatorPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InitiatorPhase::Completed | InitiatorPhase::Failed(_) | InitiatorPhase::Closed
        )
    }
}

impl fmt::Display for InitiatorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitiatorPhase::Idle => write!(f, "idle"),
            InitiatorPhase::Connecting => write!(f, "connecting"),
            InitiatorPhase::Announced => write!(f, "announced"),
            InitiatorPhase::AwaitingReceiver => write!(f, "awaiting a receiver"),
            InitiatorPhase::OfferSent => write!(f, "awaiting the answer"),
            InitiatorPhase::Completed => write!(f, "completed"),
            InitiatorPhase::Failed(e) => write!(f, "failed ({})", e),
            InitiatorPhase::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiatorSignal {
    Token(Token),
    Answer(SessionDescription),
}

/// Initiator protocol state machine.
#[derive(Debug, Clone)]
pub struct InitiatorMachine {
    offer: SessionDescription,
    phase: InitiatorPhase,
    token: Option<Token>,
}

impl InitiatorMachine {
    pub fn new(offer: SessionDescription) -> Self {
        Self {
            offer,
            phase: InitiatorPhase::Idle,
            token: None,
        }
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    fn unexpected(&self, event: &InboundEvent) -> UnexpectedEvent {
        UnexpectedEvent {
            event: event.name(),
            phase: self.phase.to_string(),
        }
    }
}

impl Role for InitiatorMachine {
    type Signal = InitiatorSignal;
    type Phase = InitiatorPhase;

    fn begin(&mut self) {
        if self.phase == InitiatorPhase::Idle {
            self.phase = InitiatorPhase::Connecting;
        }
    }

    fn on_connected(&mut self) -> Vec<Action<InitiatorSignal>> {
        if self.phase != InitiatorPhase::Connecting {
            return Vec::new();
        }
        self.phase = InitiatorPhase::Announced;
        vec![Action::Emit(OutboundEvent::Announce)]
    }

    fn handle(&mut self, event: InboundEvent) -> Result<Vec<Action<InitiatorSignal>>, UnexpectedEvent> {
        if self.phase.is_terminal() {
            return Err(self.unexpected(&event));
        }

        match event {
            InboundEvent::Token(token) => {
                if self.token.is_some() || self.phase == InitiatorPhase::Connecting {
                    return Err(self.unexpected(&InboundEvent::Token(token)));
                }
                self.token = Some(token.clone());
                if self.phase == InitiatorPhase::Announced {
                    self.phase = InitiatorPhase::AwaitingReceiver;
                }
                Ok(vec![Action::Signal(InitiatorSignal::Token(token))])
            }
            InboundEvent::ReceiverJoined => match self.phase {
                InitiatorPhase::Announced | InitiatorPhase::AwaitingReceiver => {
                    self.phase = InitiatorPhase::OfferSent;
                    Ok(vec![Action::Emit(OutboundEvent::Offer(self.offer.clone()))])
                }
                // One token, one receiver: the offer goes out once.
                _ => Err(self.unexpected(&event)),
            },
            InboundEvent::Answer(answer) => {
                if self.phase != InitiatorPhase::OfferSent {
                    return Err(self.unexpected(&InboundEvent::Answer(answer)));
                }
                self.phase = InitiatorPhase::Completed;
                Ok(vec![
                    Action::Emit(OutboundEvent::AckAnswer),
                    Action::Disconnect,
                    Action::Signal(InitiatorSignal::Answer(answer)),
                ])
            }
            other => Err(self.unexpected(&other)),
        }
    }

    fn fail(&mut self, error: SignalingError) -> Vec<Action<InitiatorSignal>> {
        // Completed still fails if the acknowledgement cannot be sent. The
        // same batch closes the channel, so nothing fails it afterwards.
        if matches!(self.phase, InitiatorPhase::Failed(_) | InitiatorPhase::Closed) {
            return Vec::new();
        }
        self.phase = InitiatorPhase::Failed(error.clone());
        vec![Action::Disconnect, Action::Fail(error)]
    }

    fn close(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = InitiatorPhase::Closed;
        }
    }

    fn awaiting(&self) -> Option<Awaiting> {
        match self.phase {
            InitiatorPhase::Connecting => Some(Awaiting::Connection),
            InitiatorPhase::Announced => Some(Awaiting::Token),
            InitiatorPhase::AwaitingReceiver => Some(Awaiting::Receiver),
            InitiatorPhase::OfferSent => Some(Awaiting::Answer),
            _ => None,
        }
    }

    fn outcome(&self) -> Option<Result<(), SignalingError>> {
        match &self.phase {
            InitiatorPhase::Completed => Some(Ok(())),
            InitiatorPhase::Failed(e) => Some(Err(e.clone())),
            InitiatorPhase::Closed => Some(Err(SignalingError::Closed)),
            _ => None,
        }
    }

    fn phase(&self) -> InitiatorPhase {
        self.phase.clone()
    }
}

type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

#[derive(Default)]
struct InitiatorCallbacks {
    on_token: Option<Callback<Token>>,
    on_answer: Option<Callback<SessionDescription>>,
    on_error: Option<Callback<SignalingError>>,
}

impl Notifier<InitiatorSignal> for InitiatorCallbacks {
    fn signal(&mut self, signal: InitiatorSignal) {
        match signal {
            InitiatorSignal::Token(token) => {
                log::info!("Received pairing token {}", token);
                if let Some(on_token) = self.on_token.take() {
                    on_token(token);
                }
            }
            InitiatorSignal::Answer(answer) => {
                log::info!("Received {} from receiver", answer.kind());
                if let Some(on_answer) = self.on_answer.take() {
                    on_answer(answer);
                }
            }
        }
    }

    fn error(&mut self, error: SignalingError) {
        log::error!("Initiator failed: {}", error);
        if let Some(on_error) = self.on_error.take() {
            on_error(error);
        }
    }
}

pub struct InitiatorBuilder {
    server_addr: String,
    offer: SessionDescription,
    socketio_path: String,
    timeouts: Timeouts,
    callbacks: InitiatorCallbacks,
}

impl InitiatorBuilder {
    pub fn on_token(mut self, f: impl FnOnce(Token) + Send + 'static) -> Self {
        self.callbacks.on_token = Some(Box::new(f));
        self
    }

    pub fn on_answer(mut self, f: impl FnOnce(SessionDescription) + Send + 'static) -> Self {
        self.callbacks.on_answer = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(SignalingError) + Send + 'static) -> Self {
        self.callbacks.on_error = Some(Box::new(f));
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn socketio_path(mut self, path: impl Into<String>) -> Self {
        self.socketio_path = path.into();
        self
    }

    /// Connect over WebSocket.
    pub async fn connect(self) -> Result<Initiator, SignalingError> {
        let connector = WsConnector::new(self.socketio_path.clone());
        self.connect_with(&connector).await
    }

    pub async fn connect_with(self, connector: &dyn Connector) -> Result<Initiator, SignalingError> {
        let connection = session::open(connector, &self.server_addr, &self.timeouts).await?;
        let session = Session::spawn(
            InitiatorMachine::new(self.offer),
            connection,
            self.timeouts,
            self.callbacks,
        );
        Ok(Initiator { session })
    }
}

/// Handle to a running initiator session.
#[derive(Clone)]
pub struct Initiator {
    session: Session<InitiatorMachine>,
}

impl Initiator {
    pub fn builder(server_addr: impl Into<String>, offer: SessionDescription) -> InitiatorBuilder {
        InitiatorBuilder {
            server_addr: server_addr.into(),
            offer,
            socketio_path: DEFAULT_PATH.to_string(),
            timeouts: Timeouts::default(),
            callbacks: InitiatorCallbacks::default(),
        }
    }

    pub fn from_config(config: &SignalingConfig, offer: SessionDescription) -> InitiatorBuilder {
        Self::builder(config.server_addr.clone(), offer)
            .socketio_path(config.socketio_path.clone())
            .timeouts(config.timeouts.clone())
    }

    pub fn phase(&self) -> InitiatorPhase {
        self.session.phase()
    }

    pub fn token(&self) -> Option<Token> {
        self.session.inspect(|machine| machine.token().cloned())
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    /// Resolves once the session is terminal. `Ok` only for a completed
    /// handshake.
    pub async fn finished(&self) -> Result<(), SignalingError> {
        self.session.finished().await
    }
}
