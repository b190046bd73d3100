//! Subscription registry
//!
//! Maps validated topic filters to the subscribers interested in them. Entries
//! are keyed by `(filter, subscriber id)`; subscribing the same pair again
//! replaces the entry.
//!
//! Each entry moves through three states:
//! - `Pending`: requested but not yet acknowledged by the broker; receives nothing
//! - `Replaying`: acknowledged; retained messages are tagged as replay
//! - `Live`: a non-retained message has been routed; retained values are live state
//!
//! Callers synchronize access (the session keeps the registry behind its core
//! lock).

pub mod filter;
pub mod trie;

use std::collections::BTreeMap;

use crate::client::Subscriber;
use crate::protocol::{Message, QoS};
use crate::utils::error::SubError;

pub use filter::{TopicFilter, validate_topic};
use trie::FilterTrie;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Pending,
    Replaying,
    Live,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub filter: String,
    pub subscriber: Subscriber,
    pub requested: QoS,
    /// QoS granted by the broker, once acknowledged.
    pub granted: Option<QoS>,
    /// Restored after a reconnect; transient entries are dropped on link loss.
    pub persist: bool,
    pub status: SubscriptionStatus,
}

impl Subscription {
    pub fn effective_qos(&self) -> QoS {
        self.granted
            .map_or(self.requested, |granted| granted.min(self.requested))
    }
}

/// A subscription selected for one inbound message.
#[derive(Debug, Clone)]
pub struct Match {
    pub subscriber: Subscriber,
    pub filter: String,
    /// `min(effective subscription QoS, message QoS)`
    pub qos: QoS,
    pub replay: bool,
}

#[derive(Debug, Default)]
pub struct Registry {
    trie: FilterTrie<Vec<Subscription>>,
    len: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds or replaces the entry for `(filter, subscriber.id)`.
    ///
    /// Returns the QoS currently in effect, which is the requested QoS until
    /// the broker grants one.
    pub fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
        subscriber: Subscriber,
        persist: bool,
    ) -> Result<QoS, SubError> {
        let parsed = TopicFilter::parse(filter)?;
        let slot = self.trie.entry(&parsed);

        let subscription = Subscription {
            filter: parsed.as_str().to_string(),
            subscriber,
            requested: qos,
            granted: None,
            persist,
            status: SubscriptionStatus::Pending,
        };
        let effective = subscription.effective_qos();

        match slot
            .iter_mut()
            .find(|s| s.subscriber.id == subscription.subscriber.id)
        {
            Some(existing) => *existing = subscription,
            None => {
                slot.push(subscription);
                self.len += 1;
            }
        }
        Ok(effective)
    }

    /// Removes the entry for `(filter, subscriber_id)`; returns whether one existed.
    pub fn unsubscribe(&mut self, filter: &str, subscriber_id: &str) -> bool {
        let Ok(parsed) = TopicFilter::parse(filter) else {
            return false;
        };
        let removed = self
            .trie
            .update(&parsed, |slot| {
                let before = slot.len();
                slot.retain(|s| s.subscriber.id != subscriber_id);
                before - slot.len()
            })
            .unwrap_or(0);
        self.len -= removed;
        removed > 0
    }

    /// Whether any subscriber remains on exactly `filter`.
    pub fn has_filter(&self, filter: &str) -> bool {
        TopicFilter::parse(filter)
            .ok()
            .and_then(|parsed| self.trie.get(&parsed).map(|slot| !slot.is_empty()))
            .unwrap_or(false)
    }

    /// Highest QoS requested by any entry on exactly `filter`. The broker
    /// keeps one subscription per filter, so this is what it must be asked for.
    pub fn requested_qos(&self, filter: &str) -> Option<QoS> {
        let parsed = TopicFilter::parse(filter).ok()?;
        self.trie
            .get(&parsed)?
            .iter()
            .map(|s| s.requested)
            .max()
    }

    pub fn get(&self, filter: &str, subscriber_id: &str) -> Option<&Subscription> {
        let parsed = TopicFilter::parse(filter).ok()?;
        self.trie
            .get(&parsed)?
            .iter()
            .find(|s| s.subscriber.id == subscriber_id)
    }

    /// Records the broker's grant for `filter` and opens the replay window of
    /// every entry on it. Returns the number of entries updated.
    pub fn grant(&mut self, filter: &str, granted: QoS) -> usize {
        let Ok(parsed) = TopicFilter::parse(filter) else {
            return 0;
        };
        self.trie
            .update(&parsed, |slot| {
                for s in slot.iter_mut() {
                    s.granted = Some(granted);
                    s.status = SubscriptionStatus::Replaying;
                }
                slot.len()
            })
            .unwrap_or(0)
    }

    /// Drops the still-pending entries on `filter` after a broker refusal.
    pub fn reject(&mut self, filter: &str) -> usize {
        let Ok(parsed) = TopicFilter::parse(filter) else {
            return 0;
        };
        let removed = self
            .trie
            .update(&parsed, |slot| {
                let before = slot.len();
                slot.retain(|s| s.status != SubscriptionStatus::Pending);
                before - slot.len()
            })
            .unwrap_or(0);
        self.len -= removed;
        removed
    }

    /// Read-only lookup: every acknowledged subscription matching `topic`.
    pub fn matches(&self, topic: &str) -> Vec<Match> {
        self.trie
            .matches(topic)
            .into_iter()
            .flatten()
            .filter(|s| s.status != SubscriptionStatus::Pending)
            .map(|s| Match {
                subscriber: s.subscriber.clone(),
                filter: s.filter.clone(),
                qos: s.effective_qos(),
                replay: false,
            })
            .collect()
    }

    /// Selects the subscriptions that receive `message` and advances their
    /// replay windows.
    pub fn route(&mut self, message: &Message) -> Vec<Match> {
        let mut selected = Vec::new();
        for slot in self.trie.matches_mut(&message.topic) {
            for s in slot.iter_mut() {
                let replay = match s.status {
                    SubscriptionStatus::Pending => continue,
                    SubscriptionStatus::Replaying if message.retain => true,
                    SubscriptionStatus::Replaying => {
                        s.status = SubscriptionStatus::Live;
                        false
                    }
                    SubscriptionStatus::Live => false,
                };
                selected.push(Match {
                    subscriber: s.subscriber.clone(),
                    filter: s.filter.clone(),
                    qos: s.effective_qos().min(message.qos),
                    replay,
                });
            }
        }
        selected
    }

    /// Filters to send to the broker when a link comes up, each with the
    /// highest QoS requested on it.
    pub fn filters_to_restore(&self) -> Vec<(String, QoS)> {
        let mut filters: BTreeMap<String, QoS> = BTreeMap::new();
        for s in self.trie.slots().into_iter().flatten() {
            filters
                .entry(s.filter.clone())
                .and_modify(|qos| *qos = (*qos).max(s.requested))
                .or_insert(s.requested);
        }
        filters.into_iter().collect()
    }

    /// Removes entries not flagged to persist across reconnects.
    pub fn drop_transient(&mut self) -> usize {
        self.retain(|s| s.persist)
    }

    /// Removes every entry of one subscriber. Returns the filters it was
    /// removed from, in order.
    pub fn remove_subscriber(&mut self, subscriber_id: &str) -> Vec<String> {
        let mut filters = Vec::new();
        self.trie.for_each_mut(|slot| {
            slot.retain(|s| {
                if s.subscriber.id == subscriber_id {
                    filters.push(s.filter.clone());
                    false
                } else {
                    true
                }
            });
        });
        self.len -= filters.len();
        filters.sort();
        filters
    }

    pub fn clear(&mut self) {
        self.trie.clear();
        self.len = 0;
    }

    fn retain(&mut self, keep: impl Fn(&Subscription) -> bool) -> usize {
        let mut removed = 0;
        self.trie.for_each_mut(|slot| {
            let before = slot.len();
            slot.retain(|s| keep(s));
            removed += before - slot.len();
        });
        self.len -= removed;
        removed
    }
}

#[cfg(test)]
mod tests;
