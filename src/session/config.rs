use std::time::Duration;

use crate::protocol::{Credentials, LastWill, ProtocolVersion};
use crate::session::backoff::{BackoffPolicy, JitterPolicy};

/// Runtime parameters of a [`Session`](crate::session::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed client identifier; generated from `client_id_prefix` when unset.
    pub client_id: Option<String>,
    pub client_id_prefix: String,
    /// Keep-alive probe period; zero disables probing.
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub protocol_version: ProtocolVersion,
    pub credentials: Option<Credentials>,
    pub last_will: Option<LastWill>,
    pub connect_timeout: Duration,
    pub base_reconnect_backoff: Duration,
    pub max_reconnect_backoff: Duration,
    pub reconnect_jitter: JitterPolicy,
    /// Reconnect attempts allowed since the last healthy connection;
    /// unlimited when unset.
    pub max_retries: Option<u32>,
    /// How long each stage of a QoS 1/2 exchange, and each subscribe, waits
    /// for its acknowledgement.
    pub ack_timeout: Duration,
    pub max_publish_retries: u32,
    pub handler_timeout: Duration,
    /// Retained online/offline announcements go here when set.
    pub presence_topic: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_id_prefix: "backend_".to_string(),
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            protocol_version: ProtocolVersion::V5,
            credentials: None,
            last_will: None,
            connect_timeout: Duration::from_secs(30),
            base_reconnect_backoff: Duration::from_secs(1),
            max_reconnect_backoff: Duration::from_secs(30),
            reconnect_jitter: JitterPolicy::Equal,
            max_retries: None,
            ack_timeout: Duration::from_secs(10),
            max_publish_retries: 3,
            handler_timeout: Duration::from_secs(5),
            presence_topic: None,
        }
    }
}

impl SessionConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            first: self.base_reconnect_backoff,
            max: self.max_reconnect_backoff,
            factor: 2.0,
            jitter: self.reconnect_jitter,
        }
    }
}
