//! In-process transport for tests. Each successful `open` hands the test a
//! [`BrokerEnd`] through which it plays the broker.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::protocol::{ConnectCode, Frame};
use crate::transport::{Link, Transport};
use crate::utils::error::ConnError;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub(crate) struct BrokerEnd {
    pub from_client: mpsc::UnboundedReceiver<Frame>,
    pub to_client: mpsc::UnboundedSender<Frame>,
}

impl BrokerEnd {
    pub async fn recv(&mut self) -> Frame {
        tokio::time::timeout(RECV_TIMEOUT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client link closed")
    }

    /// Next frame that is not a keep-alive probe.
    pub async fn recv_non_ping(&mut self) -> Frame {
        loop {
            match self.recv().await {
                Frame::PingReq => continue,
                frame => return frame,
            }
        }
    }

    pub fn send(&self, frame: Frame) {
        self.to_client.send(frame).expect("client end dropped");
    }

    /// Reads the connect frame and accepts it.
    pub async fn accept(&mut self, session_present: bool) -> Frame {
        let connect = self.recv().await;
        assert!(matches!(connect, Frame::Connect { .. }), "got {connect:?}");
        self.send(Frame::ConnAck {
            session_present,
            code: ConnectCode::Accepted,
        });
        connect
    }

    pub async fn refuse(&mut self, code: ConnectCode) {
        let connect = self.recv().await;
        assert!(matches!(connect, Frame::Connect { .. }), "got {connect:?}");
        self.send(Frame::ConnAck {
            session_present: false,
            code,
        });
    }

    /// Answers keep-alive probes in the background until the link closes.
    pub fn answer_pings(self) -> mpsc::UnboundedReceiver<Frame> {
        let BrokerEnd {
            mut from_client,
            to_client,
        } = self;
        let (rest_tx, rest_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(frame) = from_client.recv().await {
                match frame {
                    Frame::PingReq => {
                        let _ = to_client.send(Frame::PingResp);
                    }
                    other => {
                        let _ = rest_tx.send(other);
                    }
                }
            }
        });
        rest_rx
    }
}

#[derive(Debug, Default)]
struct MockState {
    failures: VecDeque<ConnError>,
    opens: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
    brokers: mpsc::UnboundedSender<BrokerEnd>,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BrokerEnd>) {
        let (brokers, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::default(),
                brokers,
            },
            rx,
        )
    }

    /// The next `open` fails with `err` before reaching the broker.
    pub fn fail_next(&self, err: ConnError) {
        self.state.lock().unwrap().failures.push_back(err);
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }
}

impl Transport for MockTransport {
    async fn open(&self, endpoint: &str) -> Result<Link, ConnError> {
        {
            let mut state = self.state.lock().unwrap();
            state.opens += 1;
            if let Some(err) = state.failures.pop_front() {
                return Err(err);
            }
        }

        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (broker_tx, broker_rx) = mpsc::unbounded_channel();
        self.brokers
            .send(BrokerEnd {
                from_client: client_rx,
                to_client: broker_tx,
            })
            .map_err(|_| ConnError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: "mock broker gone".into(),
            })?;

        Ok(Link {
            sender: client_tx,
            inbound: broker_rx,
        })
    }
}
