//! The room event envelope.
//!
//! A `RoomEvent` is what every client ultimately receives: a typed,
//! timestamped record of something that happened in a room. The `Type`
//! string is the discriminator clients use to choose a decoder for
//! `Value`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::foundation::{EventId, RoomId, Timestamp, UserId};

use super::payload::PayloadBuilder;

/// Immutable event envelope broadcast to room participants.
///
/// The wire form uses PascalCase field names. `CreatedById` and `Value`
/// are always present, as explicit `null` when absent, so clients can
/// rely on the shape. Unknown incoming fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoomEvent {
    /// Unique ID for this event instance.
    pub id: EventId,

    /// Room the event belongs to.
    pub room_id: RoomId,

    /// Discriminator, e.g. `"reaction"` or `"code"`.
    #[serde(rename = "Type")]
    pub event_type: String,

    /// Durable room state rather than a fire-and-forget notification.
    pub stateful: bool,

    /// When the event was created (UTC, non-decreasing within a process).
    pub created_at: Timestamp,

    /// Originating user, if any.
    #[serde(default)]
    pub created_by_id: Option<UserId>,

    /// Type-erased payload.
    #[serde(default)]
    pub value: Option<JsonValue>,
}

impl RoomEvent {
    /// Starts building an event for a room.
    pub fn builder(room_id: RoomId, event_type: impl Into<String>) -> RoomEventBuilder {
        RoomEventBuilder {
            room_id,
            event_type: event_type.into(),
            stateful: false,
            created_by_id: None,
            value: None,
        }
    }

    /// Deserialize the payload into a concrete type.
    ///
    /// Returns `None` when the payload is absent or has a different shape.
    pub fn value_as<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        self.value
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// True when the event carries no payload.
    pub fn is_notification(&self) -> bool {
        self.value.is_none()
    }
}

/// Builder for [`RoomEvent`].
///
/// `build` stamps a fresh id and a process-monotonic `CreatedAt`.
#[derive(Debug, Clone)]
pub struct RoomEventBuilder {
    room_id: RoomId,
    event_type: String,
    stateful: bool,
    created_by_id: Option<UserId>,
    value: Option<JsonValue>,
}

impl RoomEventBuilder {
    /// Marks the event as durable room state.
    pub fn stateful(mut self) -> Self {
        self.stateful = true;
        self
    }

    /// Records the originating user.
    pub fn created_by(mut self, user_id: UserId) -> Self {
        self.created_by_id = Some(user_id);
        self
    }

    /// Serializes a payload generically.
    ///
    /// A JSON `null` is treated as "no payload".
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(payload)?;
        self.value = (!value.is_null()).then_some(value);
        Ok(self)
    }

    /// Uses a payload type's own builder instead of generic serialization.
    pub fn built_payload<P: PayloadBuilder + ?Sized>(mut self, payload: &P) -> Self {
        let value = payload.build_payload();
        self.value = (!value.is_null()).then_some(value);
        self
    }

    /// Sets an already type-erased payload.
    pub fn raw_payload(mut self, value: Option<JsonValue>) -> Self {
        self.value = value.filter(|v| !v.is_null());
        self
    }

    /// Finalizes the event.
    pub fn build(self) -> RoomEvent {
        RoomEvent {
            id: EventId::new(),
            room_id: self.room_id,
            event_type: self.event_type,
            stateful: self.stateful,
            created_at: Timestamp::monotonic_now(),
            created_by_id: self.created_by_id,
            value: self.value,
        }
    }
}
