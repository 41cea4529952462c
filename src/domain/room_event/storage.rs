//! Persisted projection of a room event.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{EventId, RoomId, Timestamp, UserId};

use super::RoomEvent;

/// A room event as kept by the hot store and the durable archive.
///
/// Identical to [`RoomEvent`] except that the payload is already
/// serialized to a JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub id: EventId,
    pub room_id: RoomId,
    pub event_type: String,
    pub stateful: bool,
    pub created_at: Timestamp,
    pub created_by_id: Option<UserId>,
    pub payload: Option<String>,
}

impl StorageEvent {
    /// Projects a room event into its storage form.
    pub fn from_room_event(event: &RoomEvent) -> Self {
        Self {
            id: event.id,
            room_id: event.room_id,
            event_type: event.event_type.clone(),
            stateful: event.stateful,
            created_at: event.created_at,
            created_by_id: event.created_by_id,
            payload: event.value.as_ref().map(|value| value.to_string()),
        }
    }

    /// Rebuilds the room event, parsing the stored payload.
    pub fn to_room_event(&self) -> Result<RoomEvent, serde_json::Error> {
        let value = self
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(RoomEvent {
            id: self.id,
            room_id: self.room_id,
            event_type: self.event_type.clone(),
            stateful: self.stateful,
            created_at: self.created_at,
            created_by_id: self.created_by_id,
            value,
        })
    }
}

impl From<&RoomEvent> for StorageEvent {
    fn from(event: &RoomEvent) -> Self {
        Self::from_room_event(event)
    }
}
