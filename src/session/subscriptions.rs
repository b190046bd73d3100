use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::client::Subscriber;
use crate::delivery::inflight::PendingRequest;
use crate::protocol::{Frame, PacketId, QoS};
use crate::registry::TopicFilter;
use crate::session::{Core, Session, SessionState};
use crate::transport::Transport;
use crate::utils::error::SubError;

impl<T: Transport> Session<T> {
    /// Subscribes the session itself; deliveries arrive as
    /// [`Event::Message`](crate::session::Event::Message).
    ///
    /// Returns the effective QoS: the broker's grant capped at `qos` when
    /// connected, otherwise `qos` itself and the subscription is sent on the
    /// next connection.
    pub async fn subscribe(&self, filter: &str, qos: QoS) -> Result<QoS, SubError> {
        self.add_subscription(filter, qos, self.default_subscriber.clone(), true)
            .await
    }

    /// Subscribes a custom handler. The entry survives reconnects.
    pub async fn subscribe_with(
        &self,
        filter: &str,
        qos: QoS,
        subscriber: Subscriber,
    ) -> Result<QoS, SubError> {
        self.add_subscription(filter, qos, subscriber, true).await
    }

    /// Like [`subscribe_with`](Self::subscribe_with), but the entry is
    /// dropped when the link is lost.
    pub async fn subscribe_transient(
        &self,
        filter: &str,
        qos: QoS,
        subscriber: Subscriber,
    ) -> Result<QoS, SubError> {
        self.add_subscription(filter, qos, subscriber, false).await
    }

    async fn add_subscription(
        &self,
        filter: &str,
        qos: QoS,
        subscriber: Subscriber,
        persist: bool,
    ) -> Result<QoS, SubError> {
        let subscriber_id = subscriber.id.clone();
        let (packet_id, reply) = {
            let mut core = self.relay.lock();
            if core.state.is_terminal() {
                return Err(SubError::Closed);
            }
            let requested = core.registry.subscribe(filter, qos, subscriber, persist)?;
            if core.state != SessionState::Connected {
                debug!(filter, "subscription queued until connected");
                return Ok(requested);
            }

            let Some(packet_id) = core.inflight.allocate_id() else {
                core.registry.unsubscribe(filter, &subscriber_id);
                return Err(SubError::NoPacketIdentifiers);
            };
            // the broker holds one subscription per filter; never ask it to
            // downgrade the other local entries
            let wire_qos = core.registry.requested_qos(filter).unwrap_or(qos);
            let filters = vec![(filter.to_string(), wire_qos)];
            let (tx, rx) = oneshot::channel();
            core.inflight.add_request(
                packet_id,
                PendingRequest::Subscribe {
                    filters: filters.clone(),
                    reply: Some(tx),
                },
            );
            if let Err(err) = core.send(Frame::Subscribe { packet_id, filters }) {
                // link is going down; the entry is restored on reconnect
                core.inflight.take_request(packet_id);
                debug!(filter, "subscribe not sent: {err}");
                return Ok(requested);
            }
            (packet_id, rx)
        };

        match tokio::time::timeout(self.relay.config.ack_timeout, reply).await {
            Ok(Ok(granted)) => match granted.first().copied().flatten() {
                Some(granted) => {
                    info!(filter, requested = %qos, %granted, "subscription acknowledged");
                    Ok(qos.min(granted))
                }
                None => Err(SubError::Rejected {
                    filter: filter.to_string(),
                }),
            },
            // request dropped with the link
            Ok(Err(_)) => match self.state() {
                SessionState::Closed => Err(SubError::Closed),
                _ => Ok(qos),
            },
            Err(_) => {
                let mut core = self.relay.lock();
                core.inflight.take_request(packet_id);
                core.registry.unsubscribe(filter, &subscriber_id);
                warn!(filter, packet_id, "subscription not acknowledged in time");
                Err(SubError::AckTimeout {
                    filter: filter.to_string(),
                })
            }
        }
    }

    /// Removes the session's own subscription on `filter`.
    pub async fn unsubscribe(&self, filter: &str) -> Result<(), SubError> {
        let subscriber_id = self.default_subscriber.id.clone();
        self.unsubscribe_with(filter, &subscriber_id).await
    }

    /// Removes one subscriber from `filter`. The broker is only told once no
    /// local subscriber remains on the filter.
    pub async fn unsubscribe_with(&self, filter: &str, subscriber_id: &str) -> Result<(), SubError> {
        TopicFilter::parse(filter)?;

        let pending = {
            let mut core = self.relay.lock();
            if core.state.is_terminal() {
                return Err(SubError::Closed);
            }
            if !core.registry.unsubscribe(filter, subscriber_id) {
                debug!(filter, subscriber_id, "no such subscription");
                return Ok(());
            }
            if core.registry.has_filter(filter) {
                return Ok(());
            }
            request_unsubscribe(&mut core, vec![filter.to_string()])?
        };

        if let Some(pending) = pending {
            self.await_unsuback(pending).await;
        }
        info!(filter, "unsubscribed");
        Ok(())
    }

    /// Drops `subscriber_id` from every filter it is on. Filters left without
    /// a local subscriber are unsubscribed at the broker in one request.
    ///
    /// Returns the filters the subscriber was removed from.
    pub async fn remove_subscriber(&self, subscriber_id: &str) -> Result<Vec<String>, SubError> {
        let (removed, pending) = {
            let mut core = self.relay.lock();
            if core.state.is_terminal() {
                return Err(SubError::Closed);
            }
            let removed = core.registry.remove_subscriber(subscriber_id);
            let orphaned: Vec<String> = removed
                .iter()
                .filter(|filter| !core.registry.has_filter(filter))
                .cloned()
                .collect();
            let pending = if orphaned.is_empty() {
                None
            } else {
                request_unsubscribe(&mut core, orphaned)?
            };
            (removed, pending)
        };

        if let Some(pending) = pending {
            self.await_unsuback(pending).await;
        }
        info!(subscriber_id, filters = removed.len(), "subscriber removed");
        Ok(removed)
    }

    /// Best-effort wait for an UnsubAck; a timeout only drops the request.
    async fn await_unsuback(&self, (packet_id, reply): (PacketId, oneshot::Receiver<()>)) {
        if tokio::time::timeout(self.relay.config.ack_timeout, reply)
            .await
            .is_err()
        {
            self.relay.lock().inflight.take_request(packet_id);
            warn!(packet_id, "unsubscribe not acknowledged in time");
        }
    }
}

/// Queues an Unsubscribe for `filters` when connected. `None` when nothing
/// was sent; the registry no longer holds the filters, so a later link will
/// not restore them either.
fn request_unsubscribe(
    core: &mut Core,
    filters: Vec<String>,
) -> Result<Option<(PacketId, oneshot::Receiver<()>)>, SubError> {
    if core.state != SessionState::Connected {
        return Ok(None);
    }
    let packet_id = core
        .inflight
        .allocate_id()
        .ok_or(SubError::NoPacketIdentifiers)?;
    let (tx, rx) = oneshot::channel();
    core.inflight
        .add_request(packet_id, PendingRequest::Unsubscribe { reply: Some(tx) });
    if let Err(err) = core.send(Frame::Unsubscribe { packet_id, filters }) {
        core.inflight.take_request(packet_id);
        debug!(packet_id, "unsubscribe not sent: {err}");
        return Ok(None);
    }
    Ok(Some((packet_id, rx)))
}
