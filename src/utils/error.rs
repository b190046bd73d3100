//! Error taxonomy for the relay.
//!
//! Each caller-facing operation has its own error type so callers can match on
//! exactly what their call can produce. Connection errors are additionally
//! classified as retryable or not; the lifecycle controller uses that to decide
//! between backing off and closing the session.

use thiserror::Error;

use crate::protocol::{ConnectCode, PacketId, ProtocolVersion};
use crate::session::SessionState;

/// Topic and topic-filter grammar violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic must not be empty")]
    Empty,

    #[error("topic contains a NUL character")]
    Nul,

    #[error("wildcard '{wildcard}' is not allowed in a publish topic")]
    WildcardInTopic { wildcard: char },

    #[error("wildcard in level {level} ('{segment}') must occupy the whole level")]
    PartialWildcard { level: usize, segment: String },

    #[error("'#' must be the last level of a filter (found at level {level})")]
    HashNotLast { level: usize },
}

/// Failures while establishing a broker connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnError {
    #[error("endpoint {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("broker rejected the supplied credentials")]
    AuthRejected,

    #[error("broker does not accept protocol version {requested:?}")]
    ProtocolMismatch { requested: ProtocolVersion },

    #[error("broker refused the connection: {0:?}")]
    Refused(ConnectCode),

    #[error("no connection acknowledgement within {timeout_millis}ms")]
    Timeout { timeout_millis: u64 },

    #[error("cannot connect while the session is {0:?}")]
    InvalidState(SessionState),

    #[error("link closed before the handshake completed")]
    Closed,
}

impl ConnError {
    /// Whether the lifecycle controller should try again after a backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnError::AuthRejected | ConnError::InvalidState(_))
    }
}

/// The link to the broker is gone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("link is closed")]
    Closed,
}

/// Subscribe/unsubscribe failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubError {
    #[error("invalid topic filter: {0}")]
    InvalidFilter(#[from] TopicError),

    #[error("broker rejected subscription to '{filter}'")]
    Rejected { filter: String },

    #[error("no acknowledgement for '{filter}' within the ack timeout")]
    AckTimeout { filter: String },

    #[error("all packet identifiers are in use")]
    NoPacketIdentifiers,

    #[error("session is closed")]
    Closed,
}

/// Publish failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("invalid publish topic: {0}")]
    InvalidTopic(#[from] TopicError),

    #[error("session is not connected")]
    NotConnected,

    #[error("publish {packet_id} failed after {attempts} retransmissions")]
    PublishFailed { packet_id: PacketId, attempts: u32 },

    #[error("publish {packet_id} abandoned before completion")]
    Abandoned { packet_id: PacketId },

    #[error("all packet identifiers are in use")]
    NoPacketIdentifiers,

    #[error(transparent)]
    Send(#[from] SendError),
}
