//! Token-paired offer/answer signaling
//!
//! The initiator announces itself to the relay and receives a token, which
//! the application hands to the receiver out of band. The relay pairs the two
//! and forwards offer, answer and the answer acknowledgement.

pub mod channel;
pub mod codec;
pub mod event;
pub mod initiator;
pub mod receiver;
pub mod session;
pub mod types;

pub use channel::{ChannelState, SignalingChannel};
pub use event::{InboundEvent, OutboundEvent};
pub use initiator::{Initiator, InitiatorBuilder, InitiatorMachine, InitiatorPhase, InitiatorSignal};
pub use receiver::{Receiver, ReceiverBuilder, ReceiverMachine, ReceiverPhase, ReceiverSignal};
pub use session::{Action, Notifier, Role};
pub use types::*;
