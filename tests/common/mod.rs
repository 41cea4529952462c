//! Shared fixtures: several nodes behind one in-memory broker.
//!
//! Every node of a [`Cluster`] shares the hot store, archive, room
//! directory and participant records, as processes sharing Redis and a
//! database would. Only the connection registry is per node.

#![allow(dead_code)]

pub mod fake_redis;

use std::sync::Arc;
use std::time::Duration;

use interview_rooms_realtime::adapters::archive::InMemoryEventArchive;
use interview_rooms_realtime::adapters::auth::MockSessionValidator;
use interview_rooms_realtime::adapters::bus::InMemoryEventBus;
use interview_rooms_realtime::adapters::hot_store::InMemoryHotEventStore;
use interview_rooms_realtime::adapters::rooms::{
    InMemoryParticipantRepository, InMemoryRoomDirectory,
};
use interview_rooms_realtime::adapters::websocket::SessionConfig;
use interview_rooms_realtime::domain::foundation::{AuthenticatedUser, RoomId, UserId};
use interview_rooms_realtime::domain::participant::RoomAccess;
use interview_rooms_realtime::ports::ServerId;
use interview_rooms_realtime::{NodeBackends, RealtimeNode};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(2);

/// How long to wait before concluding that nothing arrives.
pub const QUIET: Duration = Duration::from_millis(150);

pub struct Cluster {
    pub bus: InMemoryEventBus,
    pub hot_store: Arc<InMemoryHotEventStore>,
    pub archive: Arc<InMemoryEventArchive>,
    pub rooms: Arc<InMemoryRoomDirectory>,
    pub participants: Arc<InMemoryParticipantRepository>,
    pub validator: Arc<MockSessionValidator>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            bus: InMemoryEventBus::new(),
            hot_store: Arc::new(InMemoryHotEventStore::new()),
            archive: Arc::new(InMemoryEventArchive::new()),
            rooms: Arc::new(InMemoryRoomDirectory::new()),
            participants: Arc::new(InMemoryParticipantRepository::new()),
            validator: Arc::new(MockSessionValidator::new()),
        }
    }

    pub async fn open_room(&self) -> RoomId {
        let room = RoomId::new();
        self.rooms.upsert(RoomAccess::open(room)).await;
        room
    }

    /// Registers a user whose access token is `token`.
    pub fn user(&self, token: &str) -> UserId {
        let id = UserId::new();
        self.validator
            .add_token(token, AuthenticatedUser::new(id, Some(token.to_string())));
        id
    }

    pub fn node(&self, name: &str) -> RealtimeNode {
        RealtimeNode::new(
            ServerId::new(name),
            NodeBackends {
                hot_store: self.hot_store.clone(),
                bus: Arc::new(self.bus.clone()),
                archive: self.archive.clone(),
                validator: self.validator.clone(),
                rooms: self.rooms.clone(),
                participants: self.participants.clone(),
            },
            SessionConfig::default(),
        )
    }
}
