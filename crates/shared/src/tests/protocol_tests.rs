use super::*;
use chrono::TimeZone;

#[test]
fn send_message_event_parses_camel_case_payload() {
    let raw = serde_json::json!({
        "type": "send_message",
        "payload": {
            "sender": "alice",
            "room": "general",
            "message": "hi",
            "timestamp": "2024-05-01T10:00:00Z",
            "scheduledTime": "2024-05-01T10:00:05Z",
        }
    });
    let event: ClientEvent = serde_json::from_value(raw).expect("event");
    let ClientEvent::SendMessage(payload) = event else {
        panic!("expected send_message");
    };
    assert_eq!(payload.room.as_deref(), Some("general"));
    assert_eq!(
        payload.scheduled_time.and_then(WireTime::to_utc),
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 5).unwrap())
    );
}

fn parse_send(payload: serde_json::Value) -> SendMessagePayload {
    let raw = serde_json::json!({ "type": "send_message", "payload": payload });
    match serde_json::from_value(raw).expect("event") {
        ClientEvent::SendMessage(payload) => payload,
        other => panic!("expected send_message, got {other:?}"),
    }
}

#[test]
fn epoch_millis_timestamp_is_accepted() {
    let payload = parse_send(serde_json::json!({
        "sender": "alice",
        "room": "general",
        "message": "hi",
        "timestamp": 1760000000000i64,
    }));
    assert_eq!(payload.timestamp, Some(WireTime::Millis(1_760_000_000_000)));
    assert!(MessageDraft::try_from(payload).is_ok());
}

#[test]
fn unrecognised_timestamp_does_not_reject_the_send() {
    for timestamp in [
        serde_json::json!("yesterday-ish"),
        serde_json::json!({"seconds": 1}),
        serde_json::json!(null),
    ] {
        let payload = parse_send(serde_json::json!({
            "sender": "alice",
            "room": "general",
            "message": "hi",
            "timestamp": timestamp,
        }));
        assert_eq!(payload.timestamp, None);
        assert_eq!(MessageDraft::try_from(payload).expect("draft").body, "hi");
    }
}

#[test]
fn scheduled_time_accepts_millis_and_rfc3339() {
    let deadline = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
    let as_millis = parse_send(serde_json::json!({
        "sender": "alice",
        "room": "general",
        "message": "later",
        "scheduledTime": deadline.timestamp_millis(),
    }));
    let as_text = parse_send(serde_json::json!({
        "sender": "alice",
        "room": "general",
        "message": "later",
        "scheduledTime": "2030-01-02T03:04:05Z",
    }));

    let from_millis = MessageDraft::try_from(as_millis).expect("millis draft");
    let from_text = MessageDraft::try_from(as_text).expect("rfc3339 draft");
    assert_eq!(from_millis.scheduled_for, Some(deadline));
    assert_eq!(from_millis, from_text);
}

#[test]
fn out_of_range_scheduled_time_is_a_validation_error() {
    let err = MessageDraft::try_from(SendMessagePayload {
        sender: "alice".into(),
        room: Some("general".into()),
        message: Some("never".into()),
        scheduled_time: Some(WireTime::Millis(i64::MAX)),
        ..Default::default()
    })
    .expect_err("out of range");
    assert_eq!(err, ValidationError::InvalidScheduledTime);
}

#[test]
fn register_user_payload_is_a_bare_string() {
    let event: ClientEvent =
        serde_json::from_str(r#"{"type":"register_user","payload":"bob"}"#).expect("event");
    assert!(matches!(event, ClientEvent::RegisterUser(name) if name == "bob"));
}

#[test]
fn draft_conversion_trims_and_prefers_room() {
    let draft = MessageDraft::try_from(SendMessagePayload {
        sender: "  alice ".into(),
        room: Some("general".into()),
        receiver: Some("bob".into()),
        message: Some(" hi ".into()),
        ..Default::default()
    })
    .expect("draft");
    assert_eq!(draft.sender, "alice");
    assert_eq!(draft.body, "hi");
    assert_eq!(draft.destination, Destination::room("general"));
}

#[test]
fn empty_room_string_falls_back_to_receiver() {
    let draft = MessageDraft::try_from(SendMessagePayload {
        sender: "alice".into(),
        room: Some("".into()),
        receiver: Some("bob".into()),
        message: Some("psst".into()),
        ..Default::default()
    })
    .expect("draft");
    assert_eq!(draft.destination, Destination::direct("bob"));
}

#[test]
fn draft_conversion_rejects_missing_destination_and_content() {
    let no_target = MessageDraft::try_from(SendMessagePayload {
        sender: "alice".into(),
        message: Some("hi".into()),
        ..Default::default()
    })
    .expect_err("no destination");
    assert_eq!(no_target, ValidationError::MissingDestination);

    let no_content = MessageDraft::try_from(SendMessagePayload {
        sender: "alice".into(),
        room: Some("general".into()),
        message: Some("   ".into()),
        media: Some("".into()),
        ..Default::default()
    })
    .expect_err("no content");
    assert_eq!(no_content, ValidationError::EmptyContent);
}

#[test]
fn media_only_message_is_valid() {
    let draft = MessageDraft::try_from(SendMessagePayload {
        sender: "alice".into(),
        receiver: Some("bob".into()),
        media: Some("https://cdn.example/cat.png".into()),
        ..Default::default()
    })
    .expect("draft");
    assert!(draft.body.is_empty());
    assert_eq!(draft.media.as_deref(), Some("https://cdn.example/cat.png"));
}

#[test]
fn message_serializes_flat_destination() {
    let message = Message {
        id: MessageId(7),
        sender: "alice".into(),
        body: "hi".into(),
        media: None,
        destination: Destination::direct("bob"),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        scheduled_for: None,
        delivered_to: vec!["alice".into()],
        seen_by: vec![],
    };
    let value = serde_json::to_value(ServerEvent::ReceiveMessage(message.clone())).expect("json");
    assert_eq!(value["type"], "receive_message");
    assert_eq!(value["payload"]["receiver"], "bob");
    assert_eq!(value["payload"]["message"], "hi");
    assert_eq!(value["payload"]["deliveredTo"][0], "alice");
    assert!(value["payload"].get("room").is_none());

    let back: Message = serde_json::from_value(value["payload"].clone()).expect("message");
    assert_eq!(back, message);
}

#[test]
fn receipt_update_uses_message_id_field() {
    let value = serde_json::to_value(ServerEvent::MessageSeenUpdate(ReceiptUpdate {
        message_id: MessageId(3),
        username: "carol".into(),
    }))
    .expect("json");
    assert_eq!(
        value,
        serde_json::json!({
            "type": "message_seen_update",
            "payload": { "messageId": 3, "username": "carol" }
        })
    );
}

#[test]
fn counterpart_resolves_other_participant() {
    let message = Message {
        id: MessageId(1),
        sender: "alice".into(),
        body: "hi".into(),
        media: None,
        destination: Destination::direct("bob"),
        created_at: Utc::now(),
        scheduled_for: None,
        delivered_to: vec![],
        seen_by: vec![],
    };
    assert_eq!(message.counterpart("bob"), Some("alice"));
    assert_eq!(message.counterpart("alice"), Some("bob"));
}
