use super::filter::{TopicFilter, validate_topic};
use super::{Registry, SubscriptionStatus};
use crate::client::Subscriber;
use crate::protocol::{Message, QoS};
use crate::utils::error::{SubError, TopicError};

fn subscriber(id: &str) -> Subscriber {
    Subscriber::unbounded(id).0
}

fn live(registry: &mut Registry, filter: &str, qos: QoS, id: &str) {
    registry.subscribe(filter, qos, subscriber(id), true).unwrap();
    registry.grant(filter, qos);
}

fn matched_filters(registry: &Registry, topic: &str) -> Vec<String> {
    let mut filters: Vec<String> = registry.matches(topic).into_iter().map(|m| m.filter).collect();
    filters.sort();
    filters
}

#[test]
fn test_filter_grammar() {
    assert!(TopicFilter::parse("sensors/+/temperature").is_ok());
    assert!(TopicFilter::parse("#").is_ok());
    assert!(TopicFilter::parse("a//b").is_ok());
    assert_eq!(TopicFilter::parse(""), Err(TopicError::Empty));
    assert_eq!(
        TopicFilter::parse("sensors/#/x"),
        Err(TopicError::HashNotLast { level: 1 })
    );
    assert_eq!(
        TopicFilter::parse("sensors/temp+"),
        Err(TopicError::PartialWildcard {
            level: 1,
            segment: "temp+".into()
        })
    );
    assert_eq!(TopicFilter::parse("a\0b"), Err(TopicError::Nul));
}

#[test]
fn test_topic_grammar() {
    assert!(validate_topic("sensors/temperature").is_ok());
    assert_eq!(
        validate_topic("sensors/+"),
        Err(TopicError::WildcardInTopic { wildcard: '+' })
    );
    assert_eq!(
        validate_topic("sensors/#"),
        Err(TopicError::WildcardInTopic { wildcard: '#' })
    );
    assert_eq!(validate_topic(""), Err(TopicError::Empty));
}

#[test]
fn test_single_and_multi_level_wildcards() {
    let mut registry = Registry::new();
    live(&mut registry, "sensors/+", QoS::AtLeastOnce, "plus");
    live(&mut registry, "sensors/#", QoS::AtLeastOnce, "hash");

    assert_eq!(
        matched_filters(&registry, "sensors/temperature"),
        vec!["sensors/#", "sensors/+"]
    );
    assert_eq!(matched_filters(&registry, "sensors/a/b"), vec!["sensors/#"]);
    // `#` includes the parent level
    assert_eq!(matched_filters(&registry, "sensors"), vec!["sensors/#"]);
    assert!(matched_filters(&registry, "commands/led").is_empty());
}

#[test]
fn test_dollar_topics_need_literal_first_level() {
    let mut registry = Registry::new();
    live(&mut registry, "#", QoS::AtMostOnce, "all");
    live(&mut registry, "+/broker/uptime", QoS::AtMostOnce, "plus");
    live(&mut registry, "$SYS/#", QoS::AtMostOnce, "sys");

    assert_eq!(matched_filters(&registry, "$SYS/broker/uptime"), vec!["$SYS/#"]);
    assert_eq!(
        matched_filters(&registry, "app/broker/uptime"),
        vec!["#", "+/broker/uptime"]
    );
}

#[test]
fn test_trie_agrees_with_linear_matcher() {
    let filters = [
        "a/+/c", "a/#", "+/+/+", "#", "a/b/c", "a/b", "+", "a/+", "$SYS/#", "+/b/#", "a//c",
    ];
    let topics = [
        "a/b/c", "a/b", "a", "a/x/c", "b/b/c", "a/b/c/d", "$SYS/x", "a//c", "x",
    ];

    let mut registry = Registry::new();
    for (i, f) in filters.iter().enumerate() {
        live(&mut registry, f, QoS::AtMostOnce, &format!("s{i}"));
    }

    for topic in topics {
        let mut expected: Vec<String> = filters
            .iter()
            .filter(|f| TopicFilter::parse(f).unwrap().matches(topic))
            .map(|f| f.to_string())
            .collect();
        expected.sort();
        assert_eq!(matched_filters(&registry, topic), expected, "topic {topic}");
    }
}

#[test]
fn test_invalid_filter_is_not_inserted() {
    let mut registry = Registry::new();
    let result = registry.subscribe("a/#/b", QoS::AtMostOnce, subscriber("s"), true);
    assert!(matches!(result, Err(SubError::InvalidFilter(_))));
    assert!(registry.is_empty());
}

#[test]
fn test_same_pair_replaces_entry() {
    let mut registry = Registry::new();
    registry
        .subscribe("a/b", QoS::AtMostOnce, subscriber("s"), true)
        .unwrap();
    registry
        .subscribe("a/b", QoS::ExactlyOnce, subscriber("s"), true)
        .unwrap();
    registry
        .subscribe("a/b", QoS::AtLeastOnce, subscriber("t"), true)
        .unwrap();

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.get("a/b", "s").unwrap().requested, QoS::ExactlyOnce);
}

#[test]
fn test_effective_qos_is_minimum() {
    let mut registry = Registry::new();
    registry
        .subscribe("a/+", QoS::ExactlyOnce, subscriber("s"), true)
        .unwrap();
    registry.grant("a/+", QoS::AtLeastOnce);

    let msg = Message::new("a/b", "x", QoS::ExactlyOnce, false);
    let routed = registry.route(&msg);
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].qos, QoS::AtLeastOnce);

    let msg = Message::new("a/b", "x", QoS::AtMostOnce, false);
    assert_eq!(registry.route(&msg)[0].qos, QoS::AtMostOnce);
}

#[test]
fn test_pending_entries_receive_nothing() {
    let mut registry = Registry::new();
    registry
        .subscribe("a/b", QoS::AtLeastOnce, subscriber("s"), true)
        .unwrap();

    let msg = Message::new("a/b", "x", QoS::AtLeastOnce, true);
    assert!(registry.route(&msg).is_empty());
    assert!(registry.matches("a/b").is_empty());
}

#[test]
fn test_replay_window_closes_on_first_live_message() {
    let mut registry = Registry::new();
    live(&mut registry, "a/+/c", QoS::AtLeastOnce, "s");

    let retained = Message::new("a/b/c", "old", QoS::AtLeastOnce, true);
    let live_msg = Message::new("a/b/c", "new", QoS::AtLeastOnce, false);

    assert!(registry.route(&retained)[0].replay);
    assert!(!registry.route(&live_msg)[0].replay);
    assert_eq!(
        registry.get("a/+/c", "s").unwrap().status,
        SubscriptionStatus::Live
    );
    // retained values after live traffic are live state, not replay
    assert!(!registry.route(&retained)[0].replay);
}

#[test]
fn test_unsubscribe_prunes_and_reports() {
    let mut registry = Registry::new();
    live(&mut registry, "a/+/c", QoS::AtLeastOnce, "s");
    live(&mut registry, "a/+/c", QoS::AtLeastOnce, "t");

    assert!(registry.unsubscribe("a/+/c", "s"));
    assert!(!registry.unsubscribe("a/+/c", "s"));
    assert!(registry.has_filter("a/+/c"));

    assert!(registry.unsubscribe("a/+/c", "t"));
    assert!(!registry.has_filter("a/+/c"));
    assert!(registry.is_empty());
    assert!(registry.matches("a/b/c").is_empty());
}

#[test]
fn test_reject_drops_pending_only() {
    let mut registry = Registry::new();
    live(&mut registry, "a/b", QoS::AtLeastOnce, "old");
    registry
        .subscribe("a/b", QoS::AtLeastOnce, subscriber("new"), true)
        .unwrap();

    assert_eq!(registry.reject("a/b"), 1);
    assert!(registry.get("a/b", "old").is_some());
    assert!(registry.get("a/b", "new").is_none());
}

#[test]
fn test_restore_list_and_transient_cleanup() {
    let mut registry = Registry::new();
    live(&mut registry, "sensors/#", QoS::AtMostOnce, "a");
    live(&mut registry, "sensors/#", QoS::AtLeastOnce, "b");
    live(&mut registry, "commands/#", QoS::AtLeastOnce, "a");
    registry
        .subscribe("debug/#", QoS::AtMostOnce, subscriber("c"), false)
        .unwrap();

    assert_eq!(registry.drop_transient(), 1);
    assert_eq!(
        registry.filters_to_restore(),
        vec![
            ("commands/#".to_string(), QoS::AtLeastOnce),
            ("sensors/#".to_string(), QoS::AtLeastOnce),
        ]
    );

    assert_eq!(
        registry.remove_subscriber("a"),
        vec!["commands/#".to_string(), "sensors/#".to_string()]
    );
    assert_eq!(registry.len(), 1);
    assert!(!registry.has_filter("commands/#"));
    assert!(registry.has_filter("sensors/#"));
    assert!(registry.remove_subscriber("a").is_empty());

    registry.clear();
    assert!(registry.is_empty());
    assert!(registry.filters_to_restore().is_empty());
}

#[test]
fn test_requested_qos_is_highest_on_filter() {
    let mut registry = Registry::new();
    assert_eq!(registry.requested_qos("x/#"), None);

    live(&mut registry, "x/#", QoS::ExactlyOnce, "a");
    registry
        .subscribe("x/#", QoS::AtMostOnce, subscriber("b"), true)
        .unwrap();
    assert_eq!(registry.requested_qos("x/#"), Some(QoS::ExactlyOnce));

    registry.grant("x/#", QoS::ExactlyOnce);
    assert_eq!(registry.get("x/#", "a").unwrap().effective_qos(), QoS::ExactlyOnce);
    assert_eq!(registry.get("x/#", "b").unwrap().effective_qos(), QoS::AtMostOnce);
}
