//! Room events: the envelope, its storage projection, payload builders
//! and routing vocabulary.

mod event;
mod payload;
mod routing;
mod storage;

pub use event::{RoomEvent, RoomEventBuilder};
pub use payload::{PayloadBuilder, PresencePayload, SignalPayload};
pub use routing::{Audience, RoutingKey, Topic};
pub use storage::StorageEvent;

/// Event type strings produced by this service.
pub mod event_types {
    pub const REACTION: &str = "reaction";
    pub const CODE: &str = "code";
    pub const SCREEN_SHARE_CHANGED: &str = "screen-share-changed";
    pub const VIDEO_CHAT_SIGNAL_RECEIVED: &str = "video-chat-signal-received";
    pub const PARTICIPANT_JOINED: &str = "participant-joined";
    pub const PARTICIPANT_LEFT: &str = "participant-left";
    pub const PONG: &str = "pong";
}
