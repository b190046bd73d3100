//! The `client` module defines the subscriber side of the relay.
//!
//! A [`Subscriber`] pairs a unique identifier with a [`Handler`] that receives
//! [`Delivery`] values. Handlers may be channel-backed or arbitrary async
//! closures; the delivery engine runs them under a bounded timeout.

pub mod subscriber;

pub use subscriber::{Delivery, Handler, HandlerError, Subscriber, SubscriberId};
