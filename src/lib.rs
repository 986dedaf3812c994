//! `sensord`: a user-space daemon that multiplexes physical and fusion
//! sensors to local clients over a framed `SOCK_SEQPACKET` protocol.
//!
//! [`config`] loads the daemon's configuration; [`sensor::registry::Registry`]
//! holds the sensor handlers built from it; [`server::Server`] accepts client
//! connections and drives the reactor loops; [`client`] is the library half
//! used by processes that want to subscribe to sensors.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod policy;
pub mod reactor;
pub mod sensor;
pub mod server;
pub mod transport;
pub mod wire;
