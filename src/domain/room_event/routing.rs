//! Addressing: who receives an event, and which bus channel carries it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{RoomId, UserId};

/// Recipients of an event within its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum Audience {
    /// Every connection in the room.
    Room,
    /// Every connection in the room except those of one user (the sender).
    RoomExcept(UserId),
    /// Only the connections of one user.
    User(UserId),
}

impl Audience {
    /// Whether a connection owned by `user_id` should receive the event.
    pub fn includes(&self, user_id: &UserId) -> bool {
        match self {
            Audience::Room => true,
            Audience::RoomExcept(excluded) => excluded != user_id,
            Audience::User(target) => target == user_id,
        }
    }
}

/// Sub-channel of a room on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    RoomEvents,
    VideoChat,
    ScreenShare,
}

impl Topic {
    /// Every topic a node subscribes to for a room it serves.
    pub const ALL: [Topic; 3] = [Topic::RoomEvents, Topic::VideoChat, Topic::ScreenShare];

    /// Topic that carries events of the given type.
    pub fn for_event_type(event_type: &str) -> Self {
        if event_type.starts_with("video-chat") {
            Topic::VideoChat
        } else if event_type.starts_with("screen-share") {
            Topic::ScreenShare
        } else {
            Topic::RoomEvents
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::RoomEvents => "room-events",
            Topic::VideoChat => "video-chat",
            Topic::ScreenShare => "screen-share",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a bus channel.
///
/// Always built through [`RoutingKey::new`] so publish and subscribe
/// sides produce the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey(String);

impl RoutingKey {
    const PREFIX: &'static str = "interview-room";

    pub fn new(room_id: &RoomId, topic: Topic) -> Self {
        Self(format!("{}:{}:{}", Self::PREFIX, room_id, topic))
    }

    /// Key for the topic an event of this type travels on.
    pub fn for_event(room_id: &RoomId, event_type: &str) -> Self {
        Self::new(room_id, Topic::for_event_type(event_type))
    }

    /// Parses a channel name produced by [`RoutingKey::new`].
    pub fn parse(raw: &str) -> Option<(RoomId, Topic)> {
        let mut parts = raw.splitn(3, ':');
        if parts.next()? != Self::PREFIX {
            return None;
        }
        let room_id = parts.next()?.parse().ok()?;
        let topic = match parts.next()? {
            "room-events" => Topic::RoomEvents,
            "video-chat" => Topic::VideoChat,
            "screen-share" => Topic::ScreenShare,
            _ => return None,
        };
        Some((room_id, topic))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
