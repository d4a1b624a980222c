//! Reference relay

pub mod hub;
pub mod server;

pub use hub::{ConnId, Envelope, RelayHub};
pub use server::{router, serve, RelayState};
