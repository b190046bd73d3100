//! The `delivery` module runs the QoS acknowledgement exchanges.
//!
//! [`InFlight`] tracks every QoS 1/2 exchange that has started but not
//! finished, in both directions, plus subscribe/unsubscribe requests waiting
//! for their acknowledgement. [`DeliveryEngine`](engine::DeliveryEngine)
//! applies inbound frames to it: fanning publishes out to subscribers,
//! answering with the right acknowledgement and advancing outbound records.

pub(crate) mod engine;
pub mod inflight;

pub(crate) use engine::DeliveryEngine;
pub use inflight::{Direction, InFlight, InFlightRecord, Stage};
