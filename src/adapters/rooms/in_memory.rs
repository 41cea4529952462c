//! In-memory participant repository and room directory.
//!
//! Stand-ins for the room CRUD service's storage, used by the binary when
//! it runs standalone and by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::foundation::{RoomId, UserId};
use crate::domain::participant::{Participant, RoomAccess};
use crate::ports::{ParticipantRepository, ParticipantStoreError, RoomDirectory};

/// Participants keyed by `(room, user)`.
///
/// `insert` checks and writes under one lock, so concurrent admissions of
/// the same user create one record.
#[derive(Default)]
pub struct InMemoryParticipantRepository {
    participants: RwLock<HashMap<(RoomId, UserId), Participant>>,
}

impl InMemoryParticipantRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of participant records in a room.
    pub async fn count_in_room(&self, room_id: &RoomId) -> usize {
        self.participants
            .read()
            .await
            .keys()
            .filter(|(room, _)| room == room_id)
            .count()
    }
}

#[async_trait]
impl ParticipantRepository for InMemoryParticipantRepository {
    async fn find(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<Option<Participant>, ParticipantStoreError> {
        Ok(self
            .participants
            .read()
            .await
            .get(&(*room_id, *user_id))
            .cloned())
    }

    async fn insert(&self, participant: &Participant) -> Result<(), ParticipantStoreError> {
        let mut participants = self.participants.write().await;
        let key = (participant.room_id, participant.user_id);
        if participants.contains_key(&key) {
            return Err(ParticipantStoreError::AlreadyExists);
        }
        participants.insert(key, participant.clone());
        Ok(())
    }
}

/// Room access rules keyed by room id.
#[derive(Default)]
pub struct InMemoryRoomDirectory {
    rooms: RwLock<HashMap<RoomId, RoomAccess>>,
    open_unknown: bool,
}

impl InMemoryRoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory that treats every unknown room as open to everyone.
    pub fn open_unknown_rooms() -> Self {
        Self {
            open_unknown: true,
            ..Self::default()
        }
    }

    /// Adds or replaces a room.
    pub async fn upsert(&self, access: RoomAccess) {
        self.rooms.write().await.insert(access.room_id, access);
    }
}

#[async_trait]
impl RoomDirectory for InMemoryRoomDirectory {
    async fn room_access(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<RoomAccess>, ParticipantStoreError> {
        let access = self.rooms.read().await.get(room_id).cloned();
        Ok(access.or_else(|| self.open_unknown.then(|| RoomAccess::open(*room_id))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::participant::ParticipantType;

    #[tokio::test]
    async fn second_insert_for_same_user_is_rejected() {
        let repo = InMemoryParticipantRepository::new();
        let room = RoomId::new();
        let user = UserId::new();

        repo.insert(&Participant::new(room, user, ParticipantType::Viewer))
            .await
            .unwrap();
        let second = repo
            .insert(&Participant::new(room, user, ParticipantType::Viewer))
            .await;

        assert!(matches!(second, Err(ParticipantStoreError::AlreadyExists)));
        assert_eq!(repo.count_in_room(&room).await, 1);
    }

    #[tokio::test]
    async fn find_returns_inserted_participant() {
        let repo = InMemoryParticipantRepository::new();
        let participant = Participant::new(RoomId::new(), UserId::new(), ParticipantType::Expert);
        repo.insert(&participant).await.unwrap();

        let found = repo
            .find(&participant.room_id, &participant.user_id)
            .await
            .unwrap();
        assert_eq!(found, Some(participant));
    }

    #[tokio::test]
    async fn directory_returns_upserted_room() {
        let directory = InMemoryRoomDirectory::new();
        let room = RoomId::new();
        directory.upsert(RoomAccess::open(room)).await;

        assert!(directory.room_access(&room).await.unwrap().is_some());
        assert!(directory.room_access(&RoomId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_directory_admits_unknown_rooms() {
        let directory = InMemoryRoomDirectory::open_unknown_rooms();
        let room = RoomId::new();

        let access = directory.room_access(&room).await.unwrap().unwrap();
        assert_eq!(access.room_id, room);
        assert!(access.status.accepts_connections());
    }
}
