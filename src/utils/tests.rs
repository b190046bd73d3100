use super::error::{ConnError, PublishError, TopicError};
use super::ids::{IdSource, SequentialIds, UuidIds};
use super::logging;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("WARNING");
    logging::init("nonsense");
}

#[test]
fn logging_filter_prefers_rust_log() {
    temp_env::with_var("RUST_LOG", None::<&str>, || {
        assert_eq!(logging::filter_for("WARNING").to_string(), "warn");
        assert_eq!(logging::filter_for("nonsense").to_string(), "info");
    });
    temp_env::with_var("RUST_LOG", Some("mqrelay=trace"), || {
        assert_eq!(logging::filter_for("error").to_string(), "mqrelay=trace");
    });
}

#[test]
fn uuid_ids_have_prefix_and_eight_hex_digits() {
    let id = UuidIds.next_id("backend_");
    assert!(id.starts_with("backend_"));
    let suffix = &id["backend_".len()..];
    assert_eq!(suffix.len(), 8);
    assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn sequential_ids_count_up() {
    let ids = SequentialIds::new();
    assert_eq!(ids.next_id("client-"), "client-1");
    assert_eq!(ids.next_id("sub-"), "sub-2");
}

#[test]
fn only_auth_and_state_errors_are_fatal() {
    assert!(!ConnError::AuthRejected.is_retryable());
    assert!(!ConnError::InvalidState(crate::session::SessionState::Closed).is_retryable());
    assert!(ConnError::Closed.is_retryable());
    assert!(ConnError::Timeout { timeout_millis: 10 }.is_retryable());
    assert!(
        ConnError::Unreachable {
            endpoint: "ws://nowhere".into(),
            reason: "refused".into()
        }
        .is_retryable()
    );
}

#[test]
fn topic_errors_convert_into_publish_errors() {
    let err: PublishError = TopicError::WildcardInTopic { wildcard: '+' }.into();
    assert_eq!(
        err.to_string(),
        "invalid publish topic: wildcard '+' is not allowed in a publish topic"
    );
}
