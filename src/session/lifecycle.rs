use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::delivery::{DeliveryEngine, inflight::PendingRequest};
use crate::protocol::{Frame, QoS};
use crate::session::{Core, ErrorKind, Relay, Session, SessionState, presence_payload};
use crate::transport::{LinkEvent, LinkLoss, Transport, TransportSession};
use crate::utils::error::ConnError;

impl<T: Transport> Session<T> {
    /// Starts the session against `endpoint`.
    ///
    /// Only valid from `Disconnected`. A rejected authentication closes the
    /// session and is returned. Any other failure of the first attempt moves
    /// the session to `Reconnecting` and the call still succeeds; further
    /// attempts run in the background and report through events.
    pub async fn connect(&self, endpoint: &str) -> Result<(), ConnError> {
        {
            let mut core = self.relay.lock();
            if core.state != SessionState::Disconnected {
                return Err(ConnError::InvalidState(core.state));
            }
            self.relay.transition(&mut core, SessionState::Connecting);
        }
        info!(client_id = %self.relay.client_id, endpoint, "connecting");

        match self.attempt(endpoint).await {
            Ok(events) => {
                self.spawn_supervisor(endpoint, Some(events));
                Ok(())
            }
            // closed while the handshake was running
            Err(err @ ConnError::InvalidState(_)) => Err(err),
            Err(err) if !err.is_retryable() => {
                self.fail(&err);
                Err(err)
            }
            Err(err) => {
                warn!(endpoint, "first connection attempt failed: {err}");
                self.relay
                    .notifier
                    .error(ErrorKind::Connection, err.to_string());
                {
                    let mut core = self.relay.lock();
                    if !self.relay.transition(&mut core, SessionState::Reconnecting) {
                        return Err(ConnError::InvalidState(core.state));
                    }
                }
                self.spawn_supervisor(endpoint, None);
                Ok(())
            }
        }
    }

    /// Closes the session for good.
    ///
    /// When connected and a presence topic is configured, a retained offline
    /// announcement is attempted first (one ack timeout, no retransmission).
    /// Unfinished exchanges are abandoned, not completed.
    pub async fn disconnect(&self) {
        let connected = match self.relay.lock().state {
            SessionState::Closed => return,
            state => state == SessionState::Connected,
        };

        if connected {
            if let Some(topic) = self.relay.config.presence_topic.clone() {
                let announced = self
                    .publish_with_retries(&topic, presence_payload("offline"), QoS::AtLeastOnce, true, 0)
                    .await;
                if let Err(err) = announced {
                    warn!(topic = %topic, "offline announcement failed: {err}");
                }
            }
        }

        if let Some(supervisor) = self.relay.take_supervisor() {
            supervisor.abort();
        }

        let mut core = self.relay.lock();
        if self.relay.transition(&mut core, SessionState::Closed) {
            self.relay.teardown(&mut core, true);
            info!(client_id = %self.relay.client_id, "session closed");
        }
    }

    /// One open + handshake + establish.
    async fn attempt(
        &self,
        endpoint: &str,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, ConnError> {
        let options = self.connect_options();
        let (link, events) = TransportSession::open(&*self.transport, endpoint, &options).await?;
        self.relay.establish(link)?;

        if let Some(topic) = self.relay.config.presence_topic.clone() {
            let session = self.clone();
            tokio::spawn(async move {
                let announced = session
                    .publish(&topic, presence_payload("online"), QoS::AtLeastOnce, true)
                    .await;
                if let Err(err) = announced {
                    warn!(topic = %topic, "online announcement failed: {err}");
                }
            });
        }
        Ok(events)
    }

    /// Non-retryable failure: the session closes.
    fn fail(&self, err: &ConnError) {
        let kind = match err {
            ConnError::AuthRejected => ErrorKind::AuthRejected,
            _ => ErrorKind::Connection,
        };
        error!(client_id = %self.relay.client_id, "connection failed permanently: {err}");
        self.relay.notifier.error(kind, err.to_string());

        let mut core = self.relay.lock();
        if self.relay.transition(&mut core, SessionState::Closed) {
            self.relay.teardown(&mut core, false);
        }
    }

    fn spawn_supervisor(
        &self,
        endpoint: &str,
        events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    ) {
        let session = self.clone();
        let endpoint = endpoint.to_string();
        let handle = tokio::spawn(async move { session.supervise(endpoint, events).await });
        self.relay.set_supervisor(handle);
    }

    /// Reads the current link until it is lost, then reconnects with backoff.
    /// Exits when the session closes or the retry budget runs out.
    async fn supervise(
        self,
        endpoint: String,
        mut events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    ) {
        let engine = DeliveryEngine::new(self.relay.clone());
        let backoff = self.relay.config.backoff();
        // attempts since the last healthy connection
        let mut attempts: u32 = 0;

        loop {
            if let Some(mut rx) = events.take() {
                let loss = read_link(&engine, &mut rx).await;
                let Some(healthy) = self.relay.link_lost(loss) else {
                    return;
                };
                if healthy {
                    attempts = 0;
                }
            }

            if let Some(max) = self.relay.config.max_retries {
                if attempts >= max {
                    self.relay.abandon(attempts);
                    return;
                }
            }

            let delay = backoff.next(attempts);
            attempts += 1;
            debug!(attempt = attempts, ?delay, "reconnecting after backoff");
            tokio::time::sleep(delay).await;

            {
                let mut core = self.relay.lock();
                if !self.relay.transition(&mut core, SessionState::Connecting) {
                    return;
                }
            }

            match self.attempt(&endpoint).await {
                Ok(rx) => events = Some(rx),
                Err(ConnError::InvalidState(_)) => return,
                Err(err) if !err.is_retryable() => {
                    self.fail(&err);
                    return;
                }
                Err(err) => {
                    warn!(attempt = attempts, "reconnect failed: {err}");
                    self.relay
                        .notifier
                        .error(ErrorKind::Connection, err.to_string());
                    let mut core = self.relay.lock();
                    if !self.relay.transition(&mut core, SessionState::Reconnecting) {
                        return;
                    }
                }
            }
        }
    }
}

async fn read_link(engine: &DeliveryEngine, rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkLoss {
    while let Some(event) = rx.recv().await {
        match event {
            LinkEvent::Frame(frame) => engine.handle(frame),
            LinkEvent::Lost(loss) => return loss,
        }
    }
    LinkLoss::Transport
}

impl Relay {
    /// Installs a freshly acknowledged link: restores subscriptions, then
    /// resumes or discards unfinished exchanges. Everything is queued on the
    /// link before the reader sees the first inbound frame.
    fn establish(&self, link: TransportSession) -> Result<(), ConnError> {
        let mut core = self.lock();
        if !self.transition(&mut core, SessionState::Connected) {
            let state = core.state;
            link.close();
            return Err(ConnError::InvalidState(state));
        }

        let resumed = !self.config.clean_session && link.session_present();
        core.link = Some(link);

        let filters = core.registry.filters_to_restore();
        let restored = filters.len();
        if !filters.is_empty() {
            match core.inflight.allocate_id() {
                Some(packet_id) => {
                    core.inflight.add_request(
                        packet_id,
                        PendingRequest::Subscribe {
                            filters: filters.clone(),
                            reply: None,
                        },
                    );
                    if let Err(err) = core.send(Frame::Subscribe { packet_id, filters }) {
                        warn!("resubscribe not sent: {err}");
                    }
                }
                None => warn!("no packet identifier left to resubscribe"),
            }
        }

        if resumed {
            for frame in core.inflight.retransmissions() {
                if let Err(err) = core.send(frame) {
                    warn!("retransmission not sent: {err}");
                }
            }
        } else {
            let discarded = core.inflight.abandon_all();
            if discarded > 0 {
                warn!(discarded, "broker did not resume the session, in-flight state discarded");
                self.notifier.error(
                    ErrorKind::InFlightDiscarded,
                    format!("{discarded} unfinished exchanges discarded"),
                );
            }
        }

        info!(client_id = %self.client_id, resumed, restored, "session established");
        Ok(())
    }

    /// Connected → Reconnecting after a link loss. Returns whether the lost
    /// link had been healthy, or `None` when the session is no longer
    /// connected (closed meanwhile).
    fn link_lost(&self, loss: LinkLoss) -> Option<bool> {
        let mut core = self.lock();
        if core.state != SessionState::Connected {
            return None;
        }
        // dropped without a Disconnect frame so the broker fires the will
        let healthy = core.link.take().is_some_and(|link| link.is_healthy());
        core.inflight.drop_requests();
        let dropped = core.registry.drop_transient();
        self.transition(&mut core, SessionState::Reconnecting);
        drop(core);

        let (kind, detail) = match loss {
            LinkLoss::KeepAliveTimeout => (ErrorKind::KeepAliveTimeout, "keep-alive timed out"),
            LinkLoss::Transport => (ErrorKind::Connection, "link lost"),
            LinkLoss::BrokerDisconnect => (ErrorKind::Connection, "broker closed the connection"),
        };
        warn!(client_id = %self.client_id, healthy, dropped, "{detail}");
        self.notifier.error(kind, detail);
        Some(healthy)
    }

    /// Retry budget exhausted.
    fn abandon(&self, attempts: u32) {
        let mut core = self.lock();
        if self.transition(&mut core, SessionState::Closed) {
            self.teardown(&mut core, false);
            error!(client_id = %self.client_id, attempts, "giving up on reconnecting");
            self.notifier.error(
                ErrorKind::ConnectionAbandoned,
                format!("no healthy connection after {attempts} reconnect attempts"),
            );
        }
    }

    /// Releases everything a closed session holds. A graceful teardown sends
    /// `Disconnect` so the broker discards the will.
    pub(super) fn teardown(&self, core: &mut Core, graceful: bool) {
        if let Some(link) = core.link.take() {
            if graceful {
                link.close();
            }
        }
        let abandoned = core.inflight.abandon_all();
        if abandoned > 0 {
            warn!(abandoned, "unfinished exchanges abandoned on close");
        }
        core.registry.clear();
    }
}
