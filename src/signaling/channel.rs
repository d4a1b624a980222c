use crate::transport::{Transport, TransportError};

use super::event::OutboundEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Closed,
}

/// The one connection a role session owns.
pub struct SignalingChannel {
    transport: Box<dyn Transport>,
    state: ChannelState,
}

impl SignalingChannel {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            state: ChannelState::Connecting,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ChannelState::Closed
    }

    pub fn mark_connected(&mut self) {
        if self.state == ChannelState::Connecting {
            self.state = ChannelState::Connected;
        }
    }

    pub fn emit(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.transport.emit(event.name(), event.args())
    }

    /// Close the connection. Returns true only for the call that actually
    /// tore it down.
    pub fn disconnect(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = ChannelState::Closed;
        self.transport.close();
        true
    }
}
