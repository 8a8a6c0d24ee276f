//! Unix-socket transport and wire protocol for imbus.
//!
//! This crate handles the bus socket (bind, accept, connect), message
//! framing and serialisation (bincode v2 behind a big-endian length prefix),
//! and a small [`BusClient`] for peers that talk to the broker.

pub mod client;
pub mod connection;
pub mod error;
pub mod transport;
pub mod wire;

pub use client::BusClient;
pub use connection::{MessageReceiver, MessageSender, PeerConnection};
pub use error::ProtocolError;
pub use transport::UnixTransport;
