//! # mqrelay
//!
//! `mqrelay` is a resilient publish/subscribe client session. It keeps one
//! logical connection to a broker alive across transport failures, restores
//! subscriptions after every reconnect and runs the QoS 1/2 acknowledgement
//! exchanges in both directions.
//!
//! ## Core Modules
//!
//! - `transport`: The `Transport` trait, the connect handshake and keep-alive, and the WebSocket transport.
//! - `registry`: Topic filters and the subscription registry, matched through a level trie.
//! - `delivery`: The in-flight table and the engine that handles frames from the broker.
//! - `session`: The caller-facing `Session`: lifecycle state machine, publish, subscribe, events.
//! - `protocol`: Messages, frames and their wire encoding.
//! - `client`: Subscriber handles and the deliveries they receive.
//! - `config`: Loading settings from file and environment.
//! - `utils`: Errors, identifiers and logging setup.

pub mod client;
pub mod config;
pub mod delivery;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;
pub mod utils;

pub use client::{Delivery, Subscriber};
pub use protocol::{LastWill, Message, QoS};
pub use session::{ErrorKind, Event, Session, SessionConfig, SessionState};
pub use transport::{Transport, WebSocketTransport};
