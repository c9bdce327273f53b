use super::frame::{ClientFrame, ServerFrame};
use crate::message::{Event, Message};

#[test]
fn test_subscribe_frame_wire_shape() {
    let frame = ClientFrame::Subscribe {
        topic: "/finance/orders".to_string(),
    };
    let wire = serde_json::to_value(&frame).unwrap();
    assert_eq!(wire["type"], "subscribe");
    assert_eq!(wire["topic"], "/finance/orders");
}

#[test]
fn test_publish_frame_round_trip() {
    let event = Event::new("/finance/orders").with_payload(b"fill".to_vec());
    let frame = ClientFrame::Publish {
        topic: event.destination_topic.clone(),
        message: Message::Event(event.clone()),
    };

    let wire = serde_json::to_string(&frame).unwrap();
    let parsed: ClientFrame = serde_json::from_str(&wire).unwrap();
    match parsed {
        ClientFrame::Publish { topic, message } => {
            assert_eq!(topic, "/finance/orders");
            assert_eq!(message, Message::Event(event));
        }
        other => panic!("Expected a publish frame, got {other:?}"),
    }
}

#[test]
fn test_server_frame_carries_concrete_topic() {
    let event = Event::new("/finance/orders/fills");
    let frame = ServerFrame::Message {
        topic: "/finance/orders/fills".to_string(),
        message: Message::Event(event),
    };
    let wire = serde_json::to_string(&frame).unwrap();
    let parsed: ServerFrame = serde_json::from_str(&wire).unwrap();
    let ServerFrame::Message { topic, .. } = parsed;
    assert_eq!(topic, "/finance/orders/fills");
}

#[test]
fn test_unknown_frame_is_rejected() {
    let err = serde_json::from_str::<ServerFrame>(r#"{"type":"gossip","topic":"/x"}"#);
    assert!(err.is_err());
}
