//! The `transport` module owns the link to the broker.
//!
//! A [`Transport`] opens a raw, frame-level [`Link`] to an endpoint. On top of
//! it, [`TransportSession`] performs the connect handshake, runs the keep-alive
//! timer and turns the inbound stream into [`LinkEvent`]s for the session
//! supervisor. Transports know nothing about subscriptions or QoS.

pub mod link;
#[cfg(test)]
pub(crate) mod mock;
pub mod websocket;

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::protocol::{Credentials, Frame, LastWill, ProtocolVersion};
use crate::utils::error::ConnError;

pub use link::TransportSession;
pub use websocket::WebSocketTransport;

/// Both directions of an open connection, expressed as frame channels.
///
/// Dropping `sender` closes the outbound side; `inbound` yields `None` once
/// the connection is gone.
#[derive(Debug)]
pub struct Link {
    pub sender: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

/// Opens links to a broker endpoint.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, endpoint: &str) -> impl Future<Output = Result<Link, ConnError>> + Send;
}

/// Parameters of the connect handshake.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub keep_alive: Duration,
    pub protocol_version: ProtocolVersion,
    pub clean_session: bool,
    pub credentials: Option<Credentials>,
    pub last_will: Option<LastWill>,
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    pub fn connect_frame(&self) -> Frame {
        Frame::Connect {
            client_id: self.client_id.clone(),
            // sub-second intervals still advertise a non-zero keep-alive
            keep_alive_secs: self.keep_alive.as_secs_f64().ceil().min(f64::from(u16::MAX)) as u16,
            clean_session: self.clean_session,
            protocol_version: self.protocol_version,
            credentials: self.credentials.clone(),
            last_will: self.last_will.clone(),
        }
    }
}

/// Why a link stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLoss {
    /// The underlying connection closed or failed.
    Transport,
    /// Two consecutive keep-alive probes went unanswered.
    KeepAliveTimeout,
    /// The broker sent a disconnect.
    BrokerDisconnect,
}

/// What the session supervisor receives from a live link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Frame(Frame),
    Lost(LinkLoss),
}
