//! The `protocol` module defines what travels between the relay and a broker:
//! QoS levels, application messages and the control frames of the session
//! protocol.
//!
//! Frames are plain serde types. Transports decide how to put them on the
//! wire; the bundled WebSocket transport sends them as tagged JSON objects.

pub mod message;
pub mod packet;

pub use message::{LastWill, Message};
pub use packet::{ConnectCode, Credentials, Frame, PacketId, ProtocolVersion, QoS};

#[cfg(test)]
mod tests;
