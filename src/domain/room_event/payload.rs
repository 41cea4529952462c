//! Payload construction for room events.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::domain::foundation::UserId;
use crate::domain::participant::ParticipantType;

/// A payload that knows how to render its own wire value.
///
/// Payload types without a builder are serialized generically through
/// `serde`; implement this when the client-facing shape differs from the
/// Rust shape.
pub trait PayloadBuilder: Send + Sync {
    /// Produce the JSON value placed in the event's `Value` field.
    fn build_payload(&self) -> JsonValue;
}

/// Payload of `participant-joined` / `participant-left` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: UserId,
    pub participant_type: ParticipantType,
}

impl PayloadBuilder for PresencePayload {
    fn build_payload(&self) -> JsonValue {
        json!({
            "UserId": self.user_id,
            "ParticipantType": self.participant_type,
        })
    }
}

/// Payload of a `video-chat-signal-received` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub from: UserId,
    pub signal: JsonValue,
}

impl PayloadBuilder for SignalPayload {
    fn build_payload(&self) -> JsonValue {
        json!({
            "From": self.from,
            "Signal": self.signal,
        })
    }
}
