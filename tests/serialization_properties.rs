//! Property tests for the room event wire format and its storage form.

use proptest::prelude::*;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use interview_rooms_realtime::adapters::serialization::JsonEventSerializer;
use interview_rooms_realtime::domain::foundation::{EventId, RoomId, Timestamp, UserId};
use interview_rooms_realtime::domain::room_event::{RoomEvent, StorageEvent};

fn arb_uuid() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

/// Payloads never include a bare `null`: on the wire it means "no value".
fn arb_value() -> impl Strategy<Value = Option<JsonValue>> {
    prop_oneof![
        Just(None),
        any::<bool>().prop_map(|b| Some(json!(b))),
        any::<i64>().prop_map(|n| Some(json!(n))),
        ".*".prop_map(|s| Some(json!(s))),
        (".{0,12}", any::<bool>()).prop_map(|(content, flag)| {
            Some(json!({ "Content": content, "Enabled": flag, "Nested": [1, 2, null] }))
        }),
    ]
}

fn arb_event() -> impl Strategy<Value = RoomEvent> {
    (
        arb_uuid(),
        arb_uuid(),
        "[a-z][a-z-]{0,24}",
        any::<bool>(),
        0i64..4_102_444_800_000_000,
        proptest::option::of(arb_uuid()),
        arb_value(),
    )
        .prop_map(
            |(id, room, event_type, stateful, micros, creator, value)| RoomEvent {
                id: EventId::from_uuid(id),
                room_id: RoomId::from_uuid(room),
                event_type,
                stateful,
                created_at: Timestamp::from_unix_micros(micros),
                created_by_id: creator.map(UserId::from_uuid),
                value,
            },
        )
}

proptest! {
    #[test]
    fn wire_format_round_trips(event in arb_event()) {
        let serializer = JsonEventSerializer::new();
        let text = serializer.serialize(&event).unwrap();
        let decoded: RoomEvent = serializer.deserialize(&text).unwrap();
        prop_assert_eq!(decoded, event);
    }

    #[test]
    fn wire_format_always_carries_every_field(event in arb_event()) {
        let text = JsonEventSerializer::new().serialize(&event).unwrap();
        let object: JsonValue = serde_json::from_str(&text).unwrap();
        for field in ["Id", "RoomId", "Type", "Stateful", "CreatedAt", "CreatedById", "Value"] {
            prop_assert!(object.get(field).is_some(), "missing {}", field);
        }
    }

    #[test]
    fn storage_form_round_trips(event in arb_event()) {
        let stored = StorageEvent::from(&event);
        prop_assert_eq!(stored.id, event.id);
        prop_assert_eq!(stored.to_room_event().unwrap(), event);
    }
}
