use std::time::Duration;

use serde::Deserialize;

use crate::protocol::{Credentials, LastWill, ProtocolVersion, QoS};
use crate::session::{SessionConfig, presence_payload};

/// Top-level configuration of the relay binary.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub session: SessionSettings,
    pub logging: LoggingSettings,
}

/// Where the broker lives.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub endpoint: String,
}

/// Session parameters, in config-friendly units.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    pub protocol_version: ProtocolVersion,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_secs: u64,
    pub base_reconnect_backoff_ms: u64,
    pub max_reconnect_backoff_ms: u64,
    pub max_retries: Option<u32>,
    pub ack_timeout_ms: u64,
    pub max_publish_retries: u32,
    pub handler_timeout_ms: u64,
    /// Empty disables presence announcements.
    pub presence_topic: Option<String>,
    pub last_will: Option<WillSettings>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WillSettings {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub session: Option<PartialSessionSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialSessionSettings {
    pub client_id: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub clean_session: Option<bool>,
    pub protocol_version: Option<ProtocolVersion>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub base_reconnect_backoff_ms: Option<u64>,
    pub max_reconnect_backoff_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub ack_timeout_ms: Option<u64>,
    pub max_publish_retries: Option<u32>,
    pub handler_timeout_ms: Option<u64>,
    pub presence_topic: Option<String>,
    pub last_will: Option<WillSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                endpoint: "ws://localhost:9001/mqtt".to_string(),
            },
            session: SessionSettings {
                client_id: None,
                keep_alive_secs: 60,
                clean_session: true,
                protocol_version: ProtocolVersion::V5,
                username: None,
                password: None,
                connect_timeout_secs: 30,
                base_reconnect_backoff_ms: 1_000,
                max_reconnect_backoff_ms: 30_000,
                max_retries: None,
                ack_timeout_ms: 10_000,
                max_publish_retries: 3,
                handler_timeout_ms: 5_000,
                presence_topic: Some("backend/status".to_string()),
                last_will: None,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fills every value missing from `partial` with its default.
    pub fn merged(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let broker = partial.broker.unwrap_or_default();
        let session = partial.session.unwrap_or_default();
        let logging = partial.logging.unwrap_or_default();
        let d = default.session;

        Self {
            broker: BrokerSettings {
                endpoint: broker.endpoint.unwrap_or(default.broker.endpoint),
            },
            session: SessionSettings {
                client_id: session.client_id.or(d.client_id),
                keep_alive_secs: session.keep_alive_secs.unwrap_or(d.keep_alive_secs),
                clean_session: session.clean_session.unwrap_or(d.clean_session),
                protocol_version: session.protocol_version.unwrap_or(d.protocol_version),
                username: session.username.or(d.username),
                password: session.password.or(d.password),
                connect_timeout_secs: session
                    .connect_timeout_secs
                    .unwrap_or(d.connect_timeout_secs),
                base_reconnect_backoff_ms: session
                    .base_reconnect_backoff_ms
                    .unwrap_or(d.base_reconnect_backoff_ms),
                max_reconnect_backoff_ms: session
                    .max_reconnect_backoff_ms
                    .unwrap_or(d.max_reconnect_backoff_ms),
                max_retries: session.max_retries.or(d.max_retries),
                ack_timeout_ms: session.ack_timeout_ms.unwrap_or(d.ack_timeout_ms),
                max_publish_retries: session
                    .max_publish_retries
                    .unwrap_or(d.max_publish_retries),
                handler_timeout_ms: session.handler_timeout_ms.unwrap_or(d.handler_timeout_ms),
                presence_topic: session.presence_topic.or(d.presence_topic),
                last_will: session.last_will.or(d.last_will),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }

    /// Runtime session parameters.
    ///
    /// Without an explicit last will, a configured presence topic doubles as
    /// the will: a retained offline announcement the broker publishes if the
    /// relay vanishes.
    pub fn session_config(&self) -> SessionConfig {
        let s = &self.session;
        let presence_topic = s.presence_topic.clone().filter(|t| !t.is_empty());

        let last_will = match (&s.last_will, &presence_topic) {
            (Some(will), _) => Some(
                LastWill::new(will.topic.clone(), will.payload.clone())
                    .qos(will.qos)
                    .retain(will.retain),
            ),
            (None, Some(topic)) => Some(
                LastWill::new(topic.clone(), presence_payload("offline"))
                    .qos(QoS::AtLeastOnce)
                    .retain(true),
            ),
            (None, None) => None,
        };

        SessionConfig {
            client_id: s.client_id.clone(),
            keep_alive: Duration::from_secs(s.keep_alive_secs),
            clean_session: s.clean_session,
            protocol_version: s.protocol_version,
            credentials: s.username.clone().map(|username| Credentials {
                username,
                password: s.password.clone(),
            }),
            last_will,
            connect_timeout: Duration::from_secs(s.connect_timeout_secs),
            base_reconnect_backoff: Duration::from_millis(s.base_reconnect_backoff_ms),
            max_reconnect_backoff: Duration::from_millis(s.max_reconnect_backoff_ms),
            max_retries: s.max_retries,
            ack_timeout: Duration::from_millis(s.ack_timeout_ms),
            max_publish_retries: s.max_publish_retries,
            handler_timeout: Duration::from_millis(s.handler_timeout_ms),
            presence_topic,
            ..SessionConfig::default()
        }
    }
}
