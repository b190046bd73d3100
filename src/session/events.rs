use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::client::Delivery;
use crate::session::SessionState;

/// Everything a session reports to its listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Delivery to the session's default subscriber.
    Message(Delivery),
    StateChanged {
        old: SessionState,
        new: SessionState,
    },
    Error {
        kind: ErrorKind,
        detail: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    AuthRejected,
    KeepAliveTimeout,
    ConnectionAbandoned,
    AckTimeout,
    PublishFailed,
    HandlerFailed,
    InFlightDiscarded,
    /// The broker sent something out of sequence.
    Protocol,
}

/// Fan-out of events to every registered listener. Listeners whose receiver
/// is gone are dropped on the next emit.
#[derive(Debug, Clone, Default)]
pub(crate) struct Notifier {
    listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<Event>>>>,
}

impl Notifier {
    pub fn listen(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn emit(&self, event: Event) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|listener| listener.send(event.clone()).is_ok());
    }

    pub fn error(&self, kind: ErrorKind, detail: impl Into<String>) {
        self.emit(Event::Error {
            kind,
            detail: detail.into(),
        });
    }
}
