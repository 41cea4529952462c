//! Participant and room lookups used during admission.
//!
//! Both are owned by the room CRUD service; only the calls admission
//! needs are modelled here.

use async_trait::async_trait;

use crate::domain::foundation::{RoomId, UserId};
use crate::domain::participant::{Participant, RoomAccess};

/// Errors from participant and room storage.
#[derive(Debug, thiserror::Error)]
pub enum ParticipantStoreError {
    /// A participant already exists for this `(room, user)` pair.
    #[error("Participant already exists")]
    AlreadyExists,

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Port for participant records.
#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    /// Find the participant for a user in a room.
    async fn find(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<Option<Participant>, ParticipantStoreError>;

    /// Insert a new participant.
    ///
    /// Must fail with [`ParticipantStoreError::AlreadyExists`] rather than
    /// create a second record for the same `(room, user)` pair.
    async fn insert(&self, participant: &Participant) -> Result<(), ParticipantStoreError>;
}

/// Port for reading room access rules.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Access view of a room, or `None` if it does not exist.
    async fn room_access(&self, room_id: &RoomId)
        -> Result<Option<RoomAccess>, ParticipantStoreError>;
}
