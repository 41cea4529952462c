//! WebSocket message protocol types.
//!
//! Clients send `{ "Type": string, "Value": any | null }` frames. Servers
//! send the [`RoomEvent`](crate::domain::room_event::RoomEvent) envelope
//! directly; there is no server-side wrapper.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::foundation::UserId;

/// Inbound frame from a client.
///
/// Unknown fields are ignored. A missing `Value` is the same as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundFrame {
    /// Message type; matched case-sensitively against handler registrations.
    #[serde(rename = "Type")]
    pub message_type: String,

    #[serde(default)]
    pub value: Option<JsonValue>,
}

/// Inbound message types understood by the built-in handlers.
pub mod message_types {
    pub const REACTION: &str = "reaction";
    pub const CODE: &str = "code";
    pub const CODE_STATE_REQUEST: &str = "code-state-request";
    pub const SCREEN_SHARE_TOGGLE: &str = "screen-share-toggle";
    pub const VIDEO_CHAT_SIGNAL: &str = "video-chat-signal";
    pub const PING: &str = "ping";
}

/// `reaction` payload.
///
/// Clients send either the bare reaction (`"Value": "👍"`) or an object
/// (`"Value": {"Reaction": "clap"}`). The event keeps the shape it came in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReactionMessage {
    Bare(String),
    Detailed {
        #[serde(rename = "Reaction")]
        reaction: String,
    },
}

impl ReactionMessage {
    pub fn reaction(&self) -> &str {
        match self {
            ReactionMessage::Bare(reaction) => reaction,
            ReactionMessage::Detailed { reaction } => reaction,
        }
    }
}

/// `code` payload: the full editor content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CodeMessage {
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// `screen-share-toggle` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScreenShareToggleMessage {
    pub enabled: bool,
}

/// Payload of the `screen-share-changed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScreenShareChanged {
    pub user_id: UserId,
    pub enabled: bool,
}

/// `video-chat-signal` payload: an opaque signal for one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VideoChatSignalMessage {
    pub target_user_id: UserId,
    pub signal: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_frame_parses_pascal_case() {
        let frame: InboundFrame =
            serde_json::from_value(json!({"Type": "reaction", "Value": {"Reaction": "clap"}}))
                .unwrap();
        assert_eq!(frame.message_type, "reaction");
        assert_eq!(frame.value, Some(json!({"Reaction": "clap"})));
    }

    #[test]
    fn missing_or_null_value_is_none() {
        let missing: InboundFrame = serde_json::from_value(json!({"Type": "ping"})).unwrap();
        let null: InboundFrame =
            serde_json::from_value(json!({"Type": "ping", "Value": null})).unwrap();
        assert!(missing.value.is_none());
        assert!(null.value.is_none());
    }

    #[test]
    fn unknown_frame_fields_are_ignored() {
        let frame: InboundFrame =
            serde_json::from_value(json!({"Type": "code", "Value": null, "Extra": 1})).unwrap();
        assert_eq!(frame.message_type, "code");
    }

    #[test]
    fn reaction_accepts_bare_string_and_object() {
        let bare: ReactionMessage = serde_json::from_value(json!("👍")).unwrap();
        let detailed: ReactionMessage =
            serde_json::from_value(json!({"Reaction": "clap"})).unwrap();

        assert_eq!(bare.reaction(), "👍");
        assert_eq!(detailed.reaction(), "clap");
        assert_eq!(serde_json::to_value(&bare).unwrap(), json!("👍"));
        assert_eq!(serde_json::to_value(&detailed).unwrap(), json!({"Reaction": "clap"}));
    }

    #[test]
    fn empty_reaction_object_is_not_a_reaction() {
        assert!(serde_json::from_value::<ReactionMessage>(json!({})).is_err());
        assert!(serde_json::from_value::<ReactionMessage>(json!(42)).is_err());
    }

    #[test]
    fn signal_message_keeps_opaque_signal() {
        let target = UserId::new();
        let message: VideoChatSignalMessage = serde_json::from_value(json!({
            "TargetUserId": target,
            "Signal": {"type": "offer", "sdp": "v=0"}
        }))
        .unwrap();
        assert_eq!(message.target_user_id, target);
        assert_eq!(message.signal["type"], "offer");
    }
}
