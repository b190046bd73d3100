use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::protocol::Frame;
use crate::transport::{Link, Transport};
use crate::utils::error::ConnError;

/// Frames carried as JSON text messages over a WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl Transport for WebSocketTransport {
    async fn open(&self, endpoint: &str) -> Result<Link, ConnError> {
        let (ws_stream, _) =
            connect_async(endpoint)
                .await
                .map_err(|e| ConnError::Unreachable {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })?;
        debug!(endpoint, "websocket connected");

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();

        // session → broker
        let peer = endpoint.to_string();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(kind = frame.kind(), "failed to serialize frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(WsMessage::text(text)).await {
                    warn!(endpoint = %peer, "failed to send frame: {e}");
                    break;
                }
                if matches!(frame, Frame::Disconnect) {
                    let _ = ws_sender.close().await;
                    break;
                }
            }
            debug!(endpoint = %peer, "send loop closed");
        });

        // broker → session; stops as soon as the session drops its end, which
        // releases the read half and with it the socket
        let peer = endpoint.to_string();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = in_tx.closed() => {
                        debug!(endpoint = %peer, "link dropped by session");
                        break;
                    }
                    msg = ws_receiver.next() => msg,
                };
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!(endpoint = %peer, "websocket error: {e}");
                        break;
                    }
                    None => break,
                };
                if msg.is_close() {
                    break;
                }
                if !msg.is_text() {
                    continue;
                }
                let Ok(text) = msg.to_text() else {
                    continue;
                };
                match serde_json::from_str::<Frame>(text) {
                    Ok(frame) => {
                        if in_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(endpoint = %peer, "invalid frame: {err} | {text}"),
                }
            }
            debug!(endpoint = %peer, "receive loop closed");
        });

        Ok(Link {
            sender: out_tx,
            inbound: in_rx,
        })
    }
}
