//! WebRTC offer/answer exchange through a Socket.IO relay
//!
//! An [`Initiator`] announces itself, receives a token and sends its offer
//! once a [`Receiver`] joins with that token. The receiver answers, the
//! initiator acknowledges, and both sides drop the relay connection.
//!
//! [`relay`] contains a small reference relay used by the `relay_server`
//! binary and the end-to-end tests.

pub mod config;
pub mod relay;
pub mod signaling;
pub mod transport;

pub use config::{RelayConfig, SignalingConfig, Timeouts};
pub use signaling::{
    Initiator, InitiatorPhase, Receiver, ReceiverPhase, SdpType, SessionDescription, SignalingError,
    Token,
};

/// Install the `env_logger` backend with an `info` default filter.
/// Does nothing if a logger is already set.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}
