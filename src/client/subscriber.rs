//! Subscriber handles
//!
//! `Subscriber` models one consumer of routed messages. It holds an id, which
//! together with the topic filter forms the registry's uniqueness key, and the
//! handler that messages are dispatched to. Cloning a `Subscriber` shares the
//! handler.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{Message, QoS};

pub type SubscriberId = String;

/// One copy of an inbound message, as seen by one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
    /// `min(subscription QoS, publish QoS)`
    pub qos: QoS,
    pub retain: bool,
    /// Retained value replayed right after subscribing, not a live publish.
    pub replay: bool,
    /// Filter of the subscription this copy was routed through.
    pub filter: String,
    pub timestamp: i64,
}

impl Delivery {
    pub(crate) fn from_message(message: &Message, filter: &str, qos: QoS, replay: bool) -> Self {
        Self {
            topic: message.topic.clone(),
            payload: message.payload.clone(),
            qos,
            retain: message.retain,
            replay,
            filter: filter.to_string(),
            timestamp: message.timestamp,
        }
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("subscriber channel closed")]
    Closed,

    #[error("handler failed: {0}")]
    Failed(String),
}

/// Receives deliveries for a subscriber.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>>;
}

struct ChannelHandler {
    sender: mpsc::Sender<Delivery>,
}

impl Handler for ChannelHandler {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>> {
        let sender = self.sender.clone();
        Box::pin(async move { sender.send(delivery).await.map_err(|_| HandlerError::Closed) })
    }
}

struct UnboundedHandler {
    sender: mpsc::UnboundedSender<Delivery>,
}

impl Handler for UnboundedHandler {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>> {
        let sent = self.sender.send(delivery).map_err(|_| HandlerError::Closed);
        Box::pin(async move { sent })
    }
}

struct FnHandler<F> {
    f: F,
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin((self.f)(delivery))
    }
}

#[derive(Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    handler: Arc<dyn Handler>,
}

impl Subscriber {
    pub fn new(id: impl Into<SubscriberId>, handler: impl Handler) -> Self {
        Self {
            id: id.into(),
            handler: Arc::new(handler),
        }
    }

    /// Subscriber backed by a bounded channel. A full channel applies
    /// backpressure to dispatch, up to the handler timeout.
    pub fn channel(id: impl Into<SubscriberId>, capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (sender, rx) = mpsc::channel(capacity);
        (Self::new(id, ChannelHandler { sender }), rx)
    }

    pub fn unbounded(id: impl Into<SubscriberId>) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (sender, rx) = mpsc::unbounded_channel();
        (Self::new(id, UnboundedHandler { sender }), rx)
    }

    pub fn from_fn<F, Fut>(id: impl Into<SubscriberId>, f: F) -> Self
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self::new(id, FnHandler { f })
    }

    pub(crate) fn dispatch(&self, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>> {
        self.handler.handle(delivery)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("handler", &"dyn Handler")
            .finish()
    }
}
