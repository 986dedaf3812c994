//! Seqpacket transport: channel lifecycle and the connect/accept handshake.

pub mod channel;
pub mod handshake;

pub use channel::{Channel, ChannelState};
