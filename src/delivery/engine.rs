use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::Delivery;
use crate::delivery::inflight::{PendingRequest, Stage};
use crate::protocol::{Frame, Message, PacketId, QoS};
use crate::registry::Match;
use crate::session::{Core, ErrorKind, Relay};

/// An inbound publish already routed, waiting for its handlers.
#[derive(Debug)]
struct Routed {
    message: Message,
    matches: Vec<Match>,
}

/// Applies frames read from the broker to the session core.
///
/// Driven by a single reader task, so frames are routed strictly in arrival
/// order. Handlers run on a separate dispatcher task that takes routed
/// messages in the same order and acknowledges each one after its handlers
/// return; the reader never waits for a handler, so a handler may itself
/// publish and wait for the broker's acknowledgement.
#[derive(Debug, Clone)]
pub(crate) struct DeliveryEngine {
    relay: Arc<Relay>,
    dispatcher: mpsc::UnboundedSender<Routed>,
}

impl DeliveryEngine {
    /// Spawns the dispatcher task. It stops once every engine handle is
    /// dropped and the queue is drained.
    pub fn new(relay: Arc<Relay>) -> Self {
        let (dispatcher, queue) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatcher(relay.clone(), queue));
        Self { relay, dispatcher }
    }

    pub fn handle(&self, frame: Frame) {
        match frame {
            Frame::Publish(message) => self.on_inbound(message),
            Frame::PubAck { packet_id } => self.complete(packet_id, Stage::AwaitingPubAck),
            Frame::PubRec { packet_id } => self.on_pubrec(packet_id),
            Frame::PubComp { packet_id } => self.complete(packet_id, Stage::AwaitingPubComp),
            Frame::PubRel { packet_id } => self.on_pubrel(packet_id),
            Frame::SubAck { packet_id, granted } => self.on_suback(packet_id, granted),
            Frame::UnsubAck { packet_id } => self.on_unsuback(packet_id),
            other => {
                warn!(kind = other.kind(), "unexpected frame from broker");
                self.relay
                    .notifier
                    .error(ErrorKind::Protocol, format!("unexpected {} frame", other.kind()));
            }
        }
    }

    /// Deduplicates an inbound publish, selects its subscriptions and queues
    /// it for dispatch.
    pub fn on_inbound(&self, message: Message) {
        let packet_id = message.packet_id;
        let matches = {
            let mut core = self.relay.lock();
            match (message.qos, packet_id) {
                (QoS::AtMostOnce, _) => {}
                (_, None) => {
                    drop(core);
                    warn!(topic = %message.topic, "QoS {} publish without packet id", message.qos);
                    self.relay
                        .notifier
                        .error(ErrorKind::Protocol, "publish without packet identifier");
                    return;
                }
                (QoS::AtLeastOnce, Some(id)) => {
                    if !core.inflight.begin_inbound(message.clone(), Stage::Dispatching) {
                        debug!(packet_id = id, "duplicate publish still dispatching, skipped");
                        return;
                    }
                }
                (QoS::ExactlyOnce, Some(id)) => match core.inflight.inbound_stage(id) {
                    Some(Stage::AwaitingPubRel) => {
                        debug!(packet_id = id, "duplicate QoS 2 publish, re-sending pub_rec");
                        send_or_log(&core, Frame::PubRec { packet_id: id });
                        return;
                    }
                    Some(_) => {
                        debug!(packet_id = id, "duplicate publish still dispatching, skipped");
                        return;
                    }
                    None => {
                        core.inflight.begin_inbound(message.clone(), Stage::Dispatching);
                    }
                },
            }
            core.registry.route(&message)
        };

        if matches.is_empty() {
            debug!(topic = %message.topic, "no subscription matched");
        }
        if let Err(err) = self.dispatcher.send(Routed { message, matches }) {
            warn!(topic = %err.0.message.topic, "dispatcher gone, inbound publish dropped");
        }
    }

    /// PubAck or PubComp: finishes the exchange if it is in `expected`.
    fn complete(&self, packet_id: PacketId, expected: Stage) {
        let mut core = self.relay.lock();
        match core.inflight.outbound_stage(packet_id) {
            Some(stage) if stage == expected => {
                core.inflight.complete_outbound(packet_id);
                debug!(packet_id, "outbound exchange complete");
            }
            Some(stage) => debug!(packet_id, ?stage, "acknowledgement out of sequence, ignored"),
            None => debug!(packet_id, "acknowledgement for unknown packet id, ignored"),
        }
    }

    fn on_pubrec(&self, packet_id: PacketId) {
        let mut core = self.relay.lock();
        match core.inflight.outbound_stage(packet_id) {
            Some(Stage::AwaitingPubRec) => {
                core.inflight.advance_outbound(packet_id, Stage::AwaitingPubComp);
                send_or_log(&core, Frame::PubRel { packet_id });
            }
            // the broker never saw our PubRel
            Some(Stage::AwaitingPubComp) => send_or_log(&core, Frame::PubRel { packet_id }),
            _ => debug!(packet_id, "pub_rec for unknown packet id, ignored"),
        }
    }

    fn on_pubrel(&self, packet_id: PacketId) {
        let mut core = self.relay.lock();
        if !core.inflight.complete_inbound(packet_id) {
            debug!(packet_id, "pub_rel for unknown packet id");
        }
        send_or_log(&core, Frame::PubComp { packet_id });
    }

    fn on_suback(&self, packet_id: PacketId, granted: Vec<Option<QoS>>) {
        let mut core = self.relay.lock();
        let (filters, reply) = match core.inflight.take_request(packet_id) {
            Some(PendingRequest::Subscribe { filters, reply }) => (filters, reply),
            Some(other) => {
                warn!(packet_id, "sub_ack answers a non-subscribe request");
                core.inflight.add_request(packet_id, other);
                return;
            }
            None => {
                debug!(packet_id, "sub_ack for unknown packet id, ignored");
                return;
            }
        };

        for ((filter, _), grant) in filters.iter().zip(&granted) {
            match grant {
                Some(qos) => {
                    core.registry.grant(filter, *qos);
                    info!(filter = %filter, granted = %qos, "subscribed");
                }
                None => {
                    let dropped = core.registry.reject(filter);
                    warn!(filter = %filter, dropped, "broker rejected subscription");
                }
            }
        }
        if let Some(reply) = reply {
            let _ = reply.send(granted);
        }
    }

    fn on_unsuback(&self, packet_id: PacketId) {
        let mut core = self.relay.lock();
        match core.inflight.take_request(packet_id) {
            Some(PendingRequest::Unsubscribe { reply }) => {
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            Some(other) => {
                warn!(packet_id, "unsub_ack answers a non-unsubscribe request");
                core.inflight.add_request(packet_id, other);
            }
            None => debug!(packet_id, "unsub_ack for unknown packet id, ignored"),
        }
    }
}

async fn run_dispatcher(relay: Arc<Relay>, mut queue: mpsc::UnboundedReceiver<Routed>) {
    while let Some(Routed { message, matches }) = queue.recv().await {
        dispatch(&relay, &message, matches).await;
        acknowledge(&relay, &message);
    }
    debug!("dispatcher stopped");
}

/// Runs every matched handler concurrently, each under the handler timeout.
async fn dispatch(relay: &Relay, message: &Message, matches: Vec<Match>) {
    let timeout = relay.config.handler_timeout;
    let handlers = matches.into_iter().map(|m| {
        let delivery = Delivery::from_message(message, &m.filter, m.qos, m.replay);
        let subscriber_id = m.subscriber.id.clone();
        let handled = m.subscriber.dispatch(delivery);
        async move { (subscriber_id, tokio::time::timeout(timeout, handled).await) }
    });

    for (subscriber_id, outcome) in join_all(handlers).await {
        let detail = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => format!("subscriber {subscriber_id} on {}: {err}", message.topic),
            Err(_) => format!(
                "subscriber {subscriber_id} on {} timed out after {timeout:?}",
                message.topic
            ),
        };
        warn!("{detail}");
        relay.notifier.error(ErrorKind::HandlerFailed, detail);
    }
}

/// PubAck for QoS 1, PubRec for QoS 2. Skipped when the inbound record was
/// discarded while the handlers ran.
fn acknowledge(relay: &Relay, message: &Message) {
    let Some(id) = message.packet_id else {
        return;
    };
    let mut core = relay.lock();
    let (known, ack) = match message.qos {
        QoS::AtLeastOnce => (
            core.inflight.complete_inbound(id),
            Frame::PubAck { packet_id: id },
        ),
        QoS::ExactlyOnce => (
            core.inflight.set_inbound_stage(id, Stage::AwaitingPubRel),
            Frame::PubRec { packet_id: id },
        ),
        QoS::AtMostOnce => return,
    };
    if known {
        send_or_log(&core, ack);
    } else {
        debug!(packet_id = id, "inbound record discarded before acknowledgement");
    }
}

fn send_or_log(core: &Core, frame: Frame) {
    let kind = frame.kind();
    if let Err(err) = core.send(frame) {
        debug!(kind, "dropping frame: {err}");
    }
}
