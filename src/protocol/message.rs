//! Application messages
//!
//! `Message` is the unit the relay publishes and receives. Notes on fields:
//! - `topic`: concrete topic, never a filter
//! - `payload`: opaque bytes
//! - `packet_id`: present only while a QoS 1/2 exchange carries the message
//! - `dup`: set on retransmissions, which always reuse the first `packet_id`
//! - `timestamp`: milliseconds since UNIX epoch, stamped at construction

use serde::{Deserialize, Serialize};

use super::packet::{PacketId, QoS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub dup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_id: Option<PacketId>,
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
            dup: false,
            packet_id: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Message the broker publishes on the client's behalf after an unexpected
/// disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    #[serde(default)]
    pub retain: bool,
}

impl LastWill {
    /// A will at QoS 1, not retained.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        }
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}
