use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::message::{LastWill, Message};

pub type PacketId = u16;

/// Delivery guarantee level.
///
/// Ordered so that `min` yields the weaker of two guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid QoS level {0}")]
pub struct InvalidQoS(pub u8);

impl TryFrom<u8> for QoS {
    type Error = InvalidQoS;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(InvalidQoS(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    V311,
    #[default]
    V5,
}

/// Broker verdict carried by `ConnAck`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Control and data frames exchanged with the broker.
///
/// `SubAck.granted` holds one entry per requested filter; `None` marks a
/// filter the broker refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Connect {
        client_id: String,
        keep_alive_secs: u16,
        clean_session: bool,
        protocol_version: ProtocolVersion,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<Credentials>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_will: Option<LastWill>,
    },
    ConnAck {
        session_present: bool,
        code: ConnectCode,
    },
    Publish(Message),
    PubAck {
        packet_id: PacketId,
    },
    PubRec {
        packet_id: PacketId,
    },
    PubRel {
        packet_id: PacketId,
    },
    PubComp {
        packet_id: PacketId,
    },
    Subscribe {
        packet_id: PacketId,
        filters: Vec<(String, QoS)>,
    },
    SubAck {
        packet_id: PacketId,
        granted: Vec<Option<QoS>>,
    },
    Unsubscribe {
        packet_id: PacketId,
        filters: Vec<String>,
    },
    UnsubAck {
        packet_id: PacketId,
    },
    PingReq,
    PingResp,
    Disconnect,
}

impl Frame {
    /// Short name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Connect { .. } => "connect",
            Frame::ConnAck { .. } => "connack",
            Frame::Publish(_) => "publish",
            Frame::PubAck { .. } => "puback",
            Frame::PubRec { .. } => "pubrec",
            Frame::PubRel { .. } => "pubrel",
            Frame::PubComp { .. } => "pubcomp",
            Frame::Subscribe { .. } => "subscribe",
            Frame::SubAck { .. } => "suback",
            Frame::Unsubscribe { .. } => "unsubscribe",
            Frame::UnsubAck { .. } => "unsuback",
            Frame::PingReq => "pingreq",
            Frame::PingResp => "pingresp",
            Frame::Disconnect => "disconnect",
        }
    }
}
