//! The `session` module is the caller-facing side of the relay.
//!
//! A [`Session`] owns one logical connection to a broker: it drives the
//! connect/reconnect state machine, restores subscriptions on every new link,
//! runs the outbound QoS exchanges and reports what happens through
//! [`Event`]s.
//!
//! All mutable state (state machine, registry, in-flight table and the
//! current link) lives in one `Core` behind a mutex. The lock is only ever
//! taken in short synchronous sections; nothing awaits while holding it.

pub mod backoff;
pub mod config;
pub mod events;
mod lifecycle;
mod publisher;
pub mod state;
mod subscriptions;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::{Subscriber, SubscriberId};
use crate::delivery::InFlight;
use crate::protocol::Frame;
use crate::registry::Registry;
use crate::transport::{ConnectOptions, Transport, TransportSession};
use crate::utils::error::SendError;
use crate::utils::ids::{IdSource, UuidIds};

pub use backoff::{BackoffPolicy, JitterPolicy};
pub use config::SessionConfig;
pub use events::{ErrorKind, Event};
pub use state::SessionState;

use events::Notifier;

#[derive(Debug, Default)]
pub(crate) struct Core {
    pub state: SessionState,
    pub registry: Registry,
    pub inflight: InFlight,
    pub link: Option<TransportSession>,
}

impl Core {
    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        self.link.as_ref().ok_or(SendError::Closed)?.send(frame)
    }
}

/// State shared between a session handle and its background tasks.
#[derive(Debug)]
pub(crate) struct Relay {
    pub config: SessionConfig,
    pub client_id: String,
    pub notifier: Notifier,
    core: Mutex<Core>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Relay {
    fn new(config: SessionConfig, client_id: String) -> Self {
        Self {
            config,
            client_id,
            notifier: Notifier::default(),
            core: Mutex::new(Core::default()),
            supervisor: Mutex::new(None),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves `core` to `next` if the edge is legal and reports the change.
    /// Illegal edges are no-ops; the current state wins.
    pub fn transition(&self, core: &mut Core, next: SessionState) -> bool {
        let old = core.state;
        if !old.can_transition_to(next) {
            debug!(?old, ?next, "state transition ignored");
            return false;
        }
        core.state = next;
        info!(client_id = %self.client_id, ?old, new = ?next, "session state changed");
        self.notifier.emit(Event::StateChanged { old, new: next });
        true
    }

    fn set_supervisor(&self, handle: JoinHandle<()>) {
        let previous = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn take_supervisor(&self) -> Option<JoinHandle<()>> {
        self.supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// A resilient publish/subscribe session over a [`Transport`].
///
/// Cloning yields another handle to the same session.
pub struct Session<T> {
    relay: Arc<Relay>,
    transport: Arc<T>,
    ids: Arc<dyn IdSource>,
    default_subscriber: Subscriber,
}

impl<T> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            relay: self.relay.clone(),
            transport: self.transport.clone(),
            ids: self.ids.clone(),
            default_subscriber: self.default_subscriber.clone(),
        }
    }
}

impl<T: Transport> Session<T> {
    pub fn new(config: SessionConfig, transport: T) -> Self {
        Self::with_id_source(config, transport, Arc::new(UuidIds))
    }

    pub fn with_id_source(config: SessionConfig, transport: T, ids: Arc<dyn IdSource>) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| ids.next_id(&config.client_id_prefix));
        let relay = Arc::new(Relay::new(config, client_id));

        let notifier = relay.notifier.clone();
        let default_subscriber = Subscriber::from_fn(relay.client_id.clone(), move |delivery| {
            notifier.emit(Event::Message(delivery));
            futures::future::ready(Ok(()))
        });

        Self {
            relay,
            transport: Arc::new(transport),
            ids,
            default_subscriber,
        }
    }

    /// Registers a new event listener.
    pub fn events(&self) -> mpsc::UnboundedReceiver<Event> {
        self.relay.notifier.listen()
    }

    pub fn state(&self) -> SessionState {
        self.relay.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Unfinished QoS 1/2 exchanges in either direction.
    pub fn pending_in_flight_count(&self) -> usize {
        self.relay.lock().inflight.len()
    }

    pub fn client_id(&self) -> &str {
        &self.relay.client_id
    }

    /// Fresh identifier for a custom [`Subscriber`].
    pub fn new_subscriber_id(&self) -> SubscriberId {
        self.ids.next_id(&format!("{}-sub-", self.relay.client_id))
    }

    fn connect_options(&self) -> ConnectOptions {
        let config = &self.relay.config;
        ConnectOptions {
            client_id: self.relay.client_id.clone(),
            keep_alive: config.keep_alive,
            protocol_version: config.protocol_version,
            clean_session: config.clean_session,
            credentials: config.credentials.clone(),
            last_will: config.last_will.clone(),
            connect_timeout: config.connect_timeout,
        }
    }
}

/// Retained presence announcement body.
pub(crate) fn presence_payload(status: &str) -> Vec<u8> {
    json!({
        "status": status,
        "timestamp": chrono::Utc::now().timestamp_millis(),
    })
    .to_string()
    .into_bytes()
}
