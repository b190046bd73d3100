//! Table of QoS≥1 exchanges that have started but not finished.
//!
//! Outbound records are keyed by the packet identifier we allocated; inbound
//! records by the identifier the broker chose. The two spaces are independent.
//! Each outbound record carries a `watch` channel so the publishing task can
//! follow its progress without holding the session lock.

use std::collections::HashMap;

use tokio::sync::{oneshot, watch};

use crate::protocol::{Frame, Message, PacketId, QoS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AwaitingPubAck,
    AwaitingPubRec,
    AwaitingPubComp,
    /// Inbound message is being handed to subscribers.
    Dispatching,
    /// Inbound QoS 2 message delivered; PubRec sent.
    AwaitingPubRel,
    Complete,
}

#[derive(Debug)]
pub struct InFlightRecord {
    pub message: Message,
    pub direction: Direction,
    pub stage: Stage,
    progress: Option<watch::Sender<Stage>>,
}

/// A subscribe or unsubscribe waiting for its acknowledgement.
#[derive(Debug)]
pub(crate) enum PendingRequest {
    Subscribe {
        filters: Vec<(String, QoS)>,
        reply: Option<oneshot::Sender<Vec<Option<QoS>>>>,
    },
    Unsubscribe {
        reply: Option<oneshot::Sender<()>>,
    },
}

#[derive(Debug, Default)]
pub struct InFlight {
    outbound: HashMap<PacketId, InFlightRecord>,
    inbound: HashMap<PacketId, InFlightRecord>,
    requests: HashMap<PacketId, PendingRequest>,
    last_id: PacketId,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unfinished publish exchanges in both directions.
    pub fn len(&self) -> usize {
        self.outbound.len() + self.inbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next free identifier in `1..=65535`, skipping ones still in use.
    pub fn allocate_id(&mut self) -> Option<PacketId> {
        for _ in 0..PacketId::MAX {
            self.last_id = self.last_id.checked_add(1).unwrap_or(1);
            let id = self.last_id;
            if !self.outbound.contains_key(&id) && !self.requests.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }

    /// Starts an outbound exchange for a message that already carries its
    /// packet identifier. Returns a receiver that observes stage changes.
    pub fn begin_outbound(&mut self, message: Message) -> Option<watch::Receiver<Stage>> {
        let packet_id = message.packet_id?;
        let stage = match message.qos {
            QoS::AtMostOnce => return None,
            QoS::AtLeastOnce => Stage::AwaitingPubAck,
            QoS::ExactlyOnce => Stage::AwaitingPubRec,
        };
        let (progress, rx) = watch::channel(stage);
        self.outbound.insert(
            packet_id,
            InFlightRecord {
                message,
                direction: Direction::Outbound,
                stage,
                progress: Some(progress),
            },
        );
        Some(rx)
    }

    pub fn outbound_stage(&self, packet_id: PacketId) -> Option<Stage> {
        self.outbound.get(&packet_id).map(|r| r.stage)
    }

    pub fn advance_outbound(&mut self, packet_id: PacketId, stage: Stage) -> bool {
        let Some(record) = self.outbound.get_mut(&packet_id) else {
            return false;
        };
        record.stage = stage;
        if let Some(progress) = &record.progress {
            progress.send_replace(stage);
        }
        true
    }

    /// Removes the record and reports completion to its watcher.
    pub fn complete_outbound(&mut self, packet_id: PacketId) -> bool {
        match self.outbound.remove(&packet_id) {
            Some(record) => {
                if let Some(progress) = record.progress {
                    progress.send_replace(Stage::Complete);
                }
                true
            }
            None => false,
        }
    }

    /// Removes the record without completing it; the watcher sees the channel
    /// close.
    pub fn remove_outbound(&mut self, packet_id: PacketId) -> Option<InFlightRecord> {
        self.outbound.remove(&packet_id)
    }

    /// Frame that re-drives the exchange from its current stage.
    pub fn retransmission_for(&mut self, packet_id: PacketId) -> Option<Frame> {
        let record = self.outbound.get_mut(&packet_id)?;
        match record.stage {
            Stage::AwaitingPubAck | Stage::AwaitingPubRec => {
                record.message.dup = true;
                Some(Frame::Publish(record.message.clone()))
            }
            Stage::AwaitingPubComp => Some(Frame::PubRel { packet_id }),
            _ => None,
        }
    }

    /// Retransmissions for every outbound record, in identifier order.
    pub fn retransmissions(&mut self) -> Vec<Frame> {
        let mut ids: Vec<PacketId> = self.outbound.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.retransmission_for(id))
            .collect()
    }

    /// Records an inbound exchange; `false` if the identifier is already in
    /// flight.
    pub fn begin_inbound(&mut self, message: Message, stage: Stage) -> bool {
        let Some(packet_id) = message.packet_id else {
            return false;
        };
        if self.inbound.contains_key(&packet_id) {
            return false;
        }
        self.inbound.insert(
            packet_id,
            InFlightRecord {
                message,
                direction: Direction::Inbound,
                stage,
                progress: None,
            },
        );
        true
    }

    pub fn inbound_stage(&self, packet_id: PacketId) -> Option<Stage> {
        self.inbound.get(&packet_id).map(|r| r.stage)
    }

    /// `false` if the record is gone, e.g. discarded by a non-resumed
    /// reconnect.
    pub fn set_inbound_stage(&mut self, packet_id: PacketId, stage: Stage) -> bool {
        match self.inbound.get_mut(&packet_id) {
            Some(record) => {
                record.stage = stage;
                true
            }
            None => false,
        }
    }

    pub fn complete_inbound(&mut self, packet_id: PacketId) -> bool {
        self.inbound.remove(&packet_id).is_some()
    }

    pub(crate) fn add_request(&mut self, packet_id: PacketId, request: PendingRequest) {
        self.requests.insert(packet_id, request);
    }

    pub(crate) fn take_request(&mut self, packet_id: PacketId) -> Option<PendingRequest> {
        self.requests.remove(&packet_id)
    }

    /// Drops pending subscribe/unsubscribe requests; their waiters observe a
    /// closed reply channel.
    pub fn drop_requests(&mut self) -> usize {
        let dropped = self.requests.len();
        self.requests.clear();
        dropped
    }

    /// Discards every record and request. Returns the number of publish
    /// exchanges dropped.
    pub fn abandon_all(&mut self) -> usize {
        let abandoned = self.len();
        self.outbound.clear();
        self.inbound.clear();
        self.requests.clear();
        abandoned
    }
}
