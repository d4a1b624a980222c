//! Receiver: joins with a token, takes the offer, sends the answer

use std::fmt;

use crate::config::{SignalingConfig, Timeouts};
use crate::transport::socketio::DEFAULT_PATH;
use crate::transport::{Connector, WsConnector};

use super::event::{InboundEvent, OutboundEvent};
use super::session::{self, Action, Notifier, Role, Session};
use super::types::{Awaiting, SessionDescription, SignalingError, Token, UnexpectedEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverPhase {
    Idle,
    Connecting,
    AwaitingOffer,
    OfferReceived,
    AnswerSent,
    Completed,
    Rejected(String),
    Failed(SignalingError),
    Closed,
}

impl ReceiverPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReceiverPhase::Completed
                | ReceiverPhase::Rejected(_)
                | ReceiverPhase::Failed(_)
                | ReceiverPhase::Closed
        )
    }
}

impl fmt::Display for ReceiverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiverPhase::Idle => write!(f, "idle"),
            ReceiverPhase::Connecting => write!(f, "connecting"),
            ReceiverPhase::AwaitingOffer => write!(f, "awaiting the offer"),
            ReceiverPhase::OfferReceived => write!(f, "holding an unanswered offer"),
            ReceiverPhase::AnswerSent => write!(f, "awaiting the answer acknowledgement"),
            ReceiverPhase::Completed => write!(f, "completed"),
            ReceiverPhase::Rejected(reason) => write!(f, "rejected ({})", reason),
            ReceiverPhase::Failed(e) => write!(f, "failed ({})", e),
            ReceiverPhase::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverSignal {
    Offer(SessionDescription),
}

/// Receiver protocol state machine.
#[derive(Debug, Clone)]
pub struct ReceiverMachine {
    token: Token,
    phase: ReceiverPhase,
}

impl ReceiverMachine {
    pub fn new(token: Token) -> Self {
        Self {
            token,
            phase: ReceiverPhase::Idle,
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Caller-supplied answer. Only legal while holding an unanswered offer.
    pub fn send_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<Vec<Action<ReceiverSignal>>, SignalingError> {
        if self.phase != ReceiverPhase::OfferReceived {
            return Err(SignalingError::InvalidState {
                operation: "send an answer",
                phase: self.phase.to_string(),
            });
        }
        self.phase = ReceiverPhase::AnswerSent;
        Ok(vec![Action::Emit(OutboundEvent::Answer(answer))])
    }

    fn unexpected(&self, event: &InboundEvent) -> UnexpectedEvent {
        UnexpectedEvent {
            event: event.name(),
            phase: self.phase.to_string(),
        }
    }
}

impl Role for ReceiverMachine {
    type Signal = ReceiverSignal;
    type Phase = ReceiverPhase;

    fn begin(&mut self) {
        if self.phase == ReceiverPhase::Idle {
            self.phase = ReceiverPhase::Connecting;
        }
    }

    fn on_connected(&mut self) -> Vec<Action<ReceiverSignal>> {
        if self.phase != ReceiverPhase::Connecting {
            return Vec::new();
        }
        self.phase = ReceiverPhase::AwaitingOffer;
        vec![Action::Emit(OutboundEvent::Join(self.token.clone()))]
    }

    fn handle(&mut self, event: InboundEvent) -> Result<Vec<Action<ReceiverSignal>>, UnexpectedEvent> {
        if self.phase.is_terminal() || self.phase == ReceiverPhase::Connecting {
            return Err(self.unexpected(&event));
        }

        match event {
            InboundEvent::DisconnectRequested(reason) => {
                self.phase = ReceiverPhase::Rejected(reason.clone());
                Ok(vec![
                    Action::Disconnect,
                    Action::Fail(SignalingError::Rejected(reason)),
                ])
            }
            InboundEvent::Offer(offer) => {
                if self.phase != ReceiverPhase::AwaitingOffer {
                    return Err(self.unexpected(&InboundEvent::Offer(offer)));
                }
                self.phase = ReceiverPhase::OfferReceived;
                Ok(vec![Action::Signal(ReceiverSignal::Offer(offer))])
            }
            InboundEvent::AnswerAcked => {
                if self.phase != ReceiverPhase::AnswerSent {
                    return Err(self.unexpected(&event));
                }
                self.phase = ReceiverPhase::Completed;
                Ok(vec![Action::Disconnect])
            }
            other => Err(self.unexpected(&other)),
        }
    }

    fn fail(&mut self, error: SignalingError) -> Vec<Action<ReceiverSignal>> {
        if self.phase.is_terminal() {
            return Vec::new();
        }
        self.phase = ReceiverPhase::Failed(error.clone());
        vec![Action::Disconnect, Action::Fail(error)]
    }

    fn close(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = ReceiverPhase::Closed;
        }
    }

    fn awaiting(&self) -> Option<Awaiting> {
        match self.phase {
            ReceiverPhase::Connecting => Some(Awaiting::Connection),
            ReceiverPhase::AwaitingOffer => Some(Awaiting::Offer),
            ReceiverPhase::AnswerSent => Some(Awaiting::Ack),
            _ => None,
        }
    }

    fn outcome(&self) -> Option<Result<(), SignalingError>> {
        match &self.phase {
            ReceiverPhase::Completed => Some(Ok(())),
            ReceiverPhase::Rejected(reason) => Some(Err(SignalingError::Rejected(reason.clone()))),
            ReceiverPhase::Failed(e) => Some(Err(e.clone())),
            ReceiverPhase::Closed => Some(Err(SignalingError::Closed)),
            _ => None,
        }
    }

    fn phase(&self) -> ReceiverPhase {
        self.phase.clone()
    }
}

type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

#[derive(Default)]
struct ReceiverCallbacks {
    on_offer: Option<Callback<SessionDescription>>,
    on_error: Option<Callback<SignalingError>>,
}

impl Notifier<ReceiverSignal> for ReceiverCallbacks {
    fn signal(&mut self, signal: ReceiverSignal) {
        let ReceiverSignal::Offer(offer) = signal;
        log::info!("Received {} from initiator", offer.kind());
        if let Some(on_offer) = self.on_offer.take() {
            on_offer(offer);
        }
    }

    fn error(&mut self, error: SignalingError) {
        log::error!("Receiver failed: {}", error);
        if let Some(on_error) = self.on_error.take() {
            on_error(error);
        }
    }
}

pub struct ReceiverBuilder {
    server_addr: String,
    token: Token,
    socketio_path: String,
    timeouts: Timeouts,
    callbacks: ReceiverCallbacks,
}

impl ReceiverBuilder {
    pub fn on_offer(mut self, f: impl FnOnce(SessionDescription) + Send + 'static) -> Self {
        self.callbacks.on_offer = Some(Box::new(f));
        self
    }

    /// Called for relay rejections as well as decode, transport and timeout
    /// failures.
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

    pub async fn connect(self) -> Result<Receiver, SignalingError> {
        let connector = WsConnector::new(self.socketio_path.clone());
        self.connect_with(&connector).await
    }

    pub async fn connect_with(self, connector: &dyn Connector) -> Result<Receiver, SignalingError> {
        let connection = session::open(connector, &self.server_addr, &self.timeouts).await?;
        let session = Session::spawn(
            ReceiverMachine::new(self.token),
            connection,
            self.timeouts,
            self.callbacks,
        );
        Ok(Receiver { session })
    }
}

/// Handle to a running receiver session.
#[derive(Clone)]
pub struct Receiver {
    session: Session<ReceiverMachine>,
}

impl Receiver {
    pub fn builder(server_addr: impl Into<String>, token: impl Into<Token>) -> ReceiverBuilder {
        ReceiverBuilder {
            server_addr: server_addr.into(),
            token: token.into(),
            socketio_path: DEFAULT_PATH.to_string(),
            timeouts: Timeouts::default(),
            callbacks: ReceiverCallbacks::default(),
        }
    }

    pub fn from_config(config: &SignalingConfig, token: impl Into<Token>) -> ReceiverBuilder {
        Self::builder(config.server_addr.clone(), token)
            .socketio_path(config.socketio_path.clone())
            .timeouts(config.timeouts.clone())
    }

    pub fn phase(&self) -> ReceiverPhase {
        self.session.phase()
    }

    /// Send the answer to the offer delivered through `on_offer`. A failed
    /// send is returned here and also passed to `on_error`.
    pub fn send_answer(&self, answer: SessionDescription) -> Result<(), SignalingError> {
        log::info!("Sending {} to initiator", answer.kind());
        self.session
            .apply_external(|machine| machine.send_answer(answer))
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    pub async fn finished(&self) -> Result<(), SignalingError> {
        self.session.finished().await
    }
}
