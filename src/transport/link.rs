use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::protocol::{ConnectCode, Frame, ProtocolVersion};
use crate::transport::{ConnectOptions, Link, LinkEvent, LinkLoss, Transport};
use crate::utils::error::{ConnError, SendError};

/// Probes sent without a response before the link is declared dead.
const MAX_OUTSTANDING_PINGS: u32 = 2;

/// An established, acknowledged connection to the broker.
///
/// Owns the inbound pump and the keep-alive timer; both stop when the value
/// is dropped. Dropping without [`close`](Self::close) leaves the broker to
/// notice the loss, which is what triggers the last will.
#[derive(Debug)]
pub struct TransportSession {
    sender: mpsc::UnboundedSender<Frame>,
    session_present: bool,
    healthy: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl TransportSession {
    /// Opens a link, performs the connect handshake and starts the pump and
    /// keep-alive tasks.
    pub async fn open<T: Transport>(
        transport: &T,
        endpoint: &str,
        options: &ConnectOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LinkEvent>), ConnError> {
        let Link { sender, mut inbound } = transport.open(endpoint).await?;

        sender
            .send(options.connect_frame())
            .map_err(|_| ConnError::Closed)?;

        let timeout_millis = options.connect_timeout.as_millis() as u64;
        let ack = tokio::time::timeout(options.connect_timeout, inbound.recv())
            .await
            .map_err(|_| ConnError::Timeout { timeout_millis })?;

        let session_present = match ack {
            Some(Frame::ConnAck {
                session_present,
                code: ConnectCode::Accepted,
            }) => session_present,
            Some(Frame::ConnAck { code, .. }) => {
                return Err(refusal(code, options.protocol_version));
            }
            Some(other) => {
                return Err(ConnError::Unreachable {
                    endpoint: endpoint.to_string(),
                    reason: format!("expected conn_ack, got {}", other.kind()),
                });
            }
            None => return Err(ConnError::Closed),
        };
        debug!(endpoint, session_present, "connect handshake complete");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let outstanding = Arc::new(AtomicU32::new(0));
        let healthy = Arc::new(AtomicBool::new(false));

        let mut tasks = vec![tokio::spawn(pump(
            inbound,
            events_tx.clone(),
            outstanding.clone(),
            healthy.clone(),
        ))];
        if !options.keep_alive.is_zero() {
            tasks.push(tokio::spawn(keep_alive(
                options.keep_alive,
                sender.clone(),
                events_tx,
                outstanding,
            )));
        }

        Ok((
            Self {
                sender,
                session_present,
                healthy,
                tasks,
            },
            events_rx,
        ))
    }

    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        self.sender.send(frame).map_err(|_| SendError::Closed)
    }

    /// Whether the broker resumed stored state for this client.
    pub fn session_present(&self) -> bool {
        self.session_present
    }

    /// Set once a keep-alive round trip has completed on this link.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Graceful shutdown: the broker discards the last will.
    pub fn close(self) {
        let _ = self.sender.send(Frame::Disconnect);
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn refusal(code: ConnectCode, requested: ProtocolVersion) -> ConnError {
    match code {
        ConnectCode::BadCredentials | ConnectCode::NotAuthorized => ConnError::AuthRejected,
        ConnectCode::UnacceptableProtocolVersion => ConnError::ProtocolMismatch { requested },
        other => ConnError::Refused(other),
    }
}

async fn pump(
    mut inbound: mpsc::UnboundedReceiver<Frame>,
    events: mpsc::UnboundedSender<LinkEvent>,
    outstanding: Arc<AtomicU32>,
    healthy: Arc<AtomicBool>,
) {
    let loss = loop {
        match inbound.recv().await {
            Some(Frame::PingResp) => {
                trace!("ping response");
                outstanding.store(0, Ordering::Relaxed);
                healthy.store(true, Ordering::Relaxed);
            }
            Some(Frame::Disconnect) => break LinkLoss::BrokerDisconnect,
            Some(frame) => {
                if events.send(LinkEvent::Frame(frame)).is_err() {
                    return;
                }
            }
            None => break LinkLoss::Transport,
        }
    };
    debug!(?loss, "link lost");
    let _ = events.send(LinkEvent::Lost(loss));
}

async fn keep_alive(
    period: Duration,
    sender: mpsc::UnboundedSender<Frame>,
    events: mpsc::UnboundedSender<LinkEvent>,
    outstanding: Arc<AtomicU32>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if outstanding.load(Ordering::Relaxed) >= MAX_OUTSTANDING_PINGS {
            warn!(?period, "keep-alive probes unanswered");
            let _ = events.send(LinkEvent::Lost(LinkLoss::KeepAliveTimeout));
            return;
        }
        if sender.send(Frame::PingReq).is_err() {
            return;
        }
        outstanding.fetch_add(1, Ordering::Relaxed);
    }
}
