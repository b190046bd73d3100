use serde_json::json;

use super::packet::InvalidQoS;
use super::{ConnectCode, Credentials, Frame, LastWill, Message, QoS};

#[test]
fn test_qos_orders_by_guarantee() {
    assert_eq!(QoS::ExactlyOnce.min(QoS::AtLeastOnce), QoS::AtLeastOnce);
    assert_eq!(QoS::AtMostOnce.min(QoS::ExactlyOnce), QoS::AtMostOnce);
    assert_eq!(QoS::try_from(3), Err(InvalidQoS(3)));
}

#[test]
fn test_publish_frame_json_shape() {
    let mut msg = Message::new("sensors/temperature", "21.5", QoS::AtLeastOnce, true);
    msg.packet_id = Some(7);
    msg.timestamp = 1_725_000_000_000;

    let value = serde_json::to_value(Frame::Publish(msg)).unwrap();
    assert_eq!(value["type"], "publish");
    assert_eq!(value["topic"], "sensors/temperature");
    assert_eq!(value["qos"], 1);
    assert_eq!(value["retain"], true);
    assert_eq!(value["packet_id"], 7);
}

#[test]
fn test_frames_parse_from_json() {
    let frame: Frame = serde_json::from_value(json!({
        "type": "conn_ack",
        "session_present": false,
        "code": "bad_credentials"
    }))
    .unwrap();
    assert_eq!(
        frame,
        Frame::ConnAck {
            session_present: false,
            code: ConnectCode::BadCredentials
        }
    );

    let frame: Frame = serde_json::from_value(json!({
        "type": "sub_ack",
        "packet_id": 3,
        "granted": [1, null]
    }))
    .unwrap();
    assert_eq!(
        frame,
        Frame::SubAck {
            packet_id: 3,
            granted: vec![Some(QoS::AtLeastOnce), None]
        }
    );

    let frame: Frame = serde_json::from_value(json!({ "type": "ping_resp" })).unwrap();
    assert_eq!(frame, Frame::PingResp);
}

#[test]
fn test_invalid_qos_is_rejected_on_parse() {
    let parsed = serde_json::from_value::<Frame>(json!({
        "type": "publish",
        "topic": "a",
        "payload": [],
        "qos": 5
    }));
    assert!(parsed.is_err());
}

#[test]
fn test_last_will_builder_defaults() {
    let will = LastWill::new("backend/status", "offline");
    assert_eq!(will.qos, QoS::AtLeastOnce);
    assert!(!will.retain);

    let will = will.qos(QoS::ExactlyOnce).retain(true);
    assert_eq!(will.qos, QoS::ExactlyOnce);
    assert!(will.retain);
}

#[test]
fn test_credentials_debug_hides_password() {
    let creds = Credentials {
        username: "admin".into(),
        password: Some("password".into()),
    };
    let printed = format!("{creds:?}");
    assert!(printed.contains("admin"));
    assert!(!printed.contains("password\""));
}
