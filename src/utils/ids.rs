//! Identifier sources.
//!
//! Client ids and subscriber ids are minted through [`IdSource`] so tests can
//! swap the random default for a deterministic sequence.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

pub trait IdSource: Send + Sync {
    /// Returns a fresh identifier starting with `prefix`.
    fn next_id(&self, prefix: &str) -> String;
}

/// Random identifiers: `prefix` followed by eight hex digits of a v4 UUID.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdSource for UuidIds {
    fn next_id(&self, prefix: &str) -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("{prefix}{}", &hex[..8])
    }
}

/// Deterministic identifiers: `prefix` followed by a counter starting at 1.
#[derive(Debug, Default)]
pub struct SequentialIds {
    counter: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdSource for SequentialIds {
    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}{n}")
    }
}
