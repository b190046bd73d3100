use tokio::sync::watch;
use tracing::{debug, warn};

use crate::delivery::Stage;
use crate::protocol::{Frame, Message, PacketId, QoS};
use crate::registry::validate_topic;
use crate::session::{ErrorKind, Session, SessionState};
use crate::transport::Transport;
use crate::utils::error::PublishError;

impl<T: Transport> Session<T> {
    /// Publishes `payload` on `topic`.
    ///
    /// QoS 0 returns once the frame is queued on the link. QoS 1 and 2 wait
    /// for the full acknowledgement exchange, retransmitting with the same
    /// packet identifier after each ack timeout.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        let retries = self.relay.config.max_publish_retries;
        self.publish_with_retries(topic, payload.into(), qos, retain, retries)
            .await
    }

    pub(super) async fn publish_with_retries(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        max_retries: u32,
    ) -> Result<(), PublishError> {
        validate_topic(topic)?;
        let mut message = Message::new(topic, payload, qos, retain);

        let (packet_id, progress) = {
            let mut core = self.relay.lock();
            if core.state != SessionState::Connected {
                return Err(PublishError::NotConnected);
            }
            if qos == QoS::AtMostOnce {
                core.send(Frame::Publish(message))?;
                debug!(topic, "published at most once");
                return Ok(());
            }

            let packet_id = core
                .inflight
                .allocate_id()
                .ok_or(PublishError::NoPacketIdentifiers)?;
            message.packet_id = Some(packet_id);
            let Some(progress) = core.inflight.begin_outbound(message.clone()) else {
                return Err(PublishError::Abandoned { packet_id });
            };
            if let Err(err) = core.send(Frame::Publish(message)) {
                core.inflight.remove_outbound(packet_id);
                return Err(err.into());
            }
            (packet_id, progress)
        };
        debug!(topic, packet_id, %qos, "publish sent");

        self.await_completion(packet_id, progress, max_retries).await
    }

    /// Follows one outbound exchange until it completes, fails or is
    /// abandoned. Every stage gets a fresh ack timeout.
    async fn await_completion(
        &self,
        packet_id: PacketId,
        mut progress: watch::Receiver<Stage>,
        max_retries: u32,
    ) -> Result<(), PublishError> {
        let ack_timeout = self.relay.config.ack_timeout;
        let mut retransmissions = 0;

        loop {
            if *progress.borrow_and_update() == Stage::Complete {
                return Ok(());
            }

            match tokio::time::timeout(ack_timeout, progress.changed()).await {
                Ok(Ok(())) => continue,
                // record dropped; completion may still be the last value seen
                Ok(Err(_)) => {
                    return match *progress.borrow() {
                        Stage::Complete => Ok(()),
                        _ => Err(PublishError::Abandoned { packet_id }),
                    };
                }
                Err(_) => {}
            }

            let stage = *progress.borrow();
            warn!(packet_id, ?stage, ?ack_timeout, "acknowledgement overdue");
            self.relay.notifier.error(
                ErrorKind::AckTimeout,
                format!("packet {packet_id} waited {ack_timeout:?} in {stage:?}"),
            );

            let mut core = self.relay.lock();
            if retransmissions >= max_retries {
                // might have completed between the timeout and the lock
                if core.inflight.remove_outbound(packet_id).is_none() {
                    drop(core);
                    return match *progress.borrow() {
                        Stage::Complete => Ok(()),
                        _ => Err(PublishError::Abandoned { packet_id }),
                    };
                }
                drop(core);
                let err = PublishError::PublishFailed {
                    packet_id,
                    attempts: retransmissions,
                };
                warn!("{err}");
                self.relay
                    .notifier
                    .error(ErrorKind::PublishFailed, err.to_string());
                return Err(err);
            }

            retransmissions += 1;
            let Some(frame) = core.inflight.retransmission_for(packet_id) else {
                continue;
            };
            if core.state == SessionState::Connected {
                debug!(packet_id, kind = frame.kind(), retransmissions, "retransmitting");
                if let Err(err) = core.send(frame) {
                    debug!(packet_id, "retransmission not sent: {err}");
                }
            }
        }
    }
}
