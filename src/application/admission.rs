//! AdmitParticipantHandler - Decides whether a user may open a connection
//! to a room, and resolves their participant record.

use std::sync::Arc;

use crate::domain::foundation::{AuthenticatedUser, RoomId};
use crate::domain::participant::Participant;
use crate::ports::{ParticipantRepository, ParticipantStoreError, RoomDirectory};

/// Command to admit a user to a room.
#[derive(Debug, Clone)]
pub struct AdmitParticipantCommand {
    pub room_id: RoomId,
    pub user: AuthenticatedUser,
}

/// Why admission was refused.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("Room is closed: {0}")]
    RoomClosed(RoomId),

    #[error("User may not join this room")]
    Forbidden,

    #[error("Admission backend unavailable: {0}")]
    Unavailable(String),
}

impl From<ParticipantStoreError> for AdmissionError {
    fn from(err: ParticipantStoreError) -> Self {
        AdmissionError::Unavailable(err.to_string())
    }
}

/// A user cleared to join a room, before anything is written.
#[derive(Debug, Clone)]
pub enum Admission {
    /// The user already has a participant record in the room.
    Existing(Participant),
    /// The record still has to be created.
    New(Participant),
}

/// Handler for admissions.
///
/// Admission is idempotent: a reconnecting user gets their existing
/// participant record, and concurrent first connections of one user
/// converge on a single record.
///
/// It runs in two steps so callers can refuse a request between the
/// read-only [`check`](Self::check) and the [`complete`](Self::complete)
/// that records the participant.
pub struct AdmitParticipantHandler {
    rooms: Arc<dyn RoomDirectory>,
    participants: Arc<dyn ParticipantRepository>,
}

impl AdmitParticipantHandler {
    pub fn new(
        rooms: Arc<dyn RoomDirectory>,
        participants: Arc<dyn ParticipantRepository>,
    ) -> Self {
        Self {
            rooms,
            participants,
        }
    }

    pub async fn handle(
        &self,
        cmd: AdmitParticipantCommand,
    ) -> Result<Participant, AdmissionError> {
        let admission = self.check(&cmd).await?;
        self.complete(admission).await
    }

    /// Decide whether the user may join, without writing anything.
    pub async fn check(&self, cmd: &AdmitParticipantCommand) -> Result<Admission, AdmissionError> {
        let room_id = cmd.room_id;
        let user_id = cmd.user.id;

        // 1. Room must exist and be open
        let access = self
            .rooms
            .room_access(&room_id)
            .await?
            .ok_or(AdmissionError::RoomNotFound(room_id))?;
        if !access.status.accepts_connections() {
            return Err(AdmissionError::RoomClosed(room_id));
        }

        // 2. Reuse the existing record
        if let Some(existing) = self.participants.find(&room_id, &user_id).await? {
            return Ok(Admission::Existing(existing));
        }

        // 3. Resolve the role
        let participant_type = access
            .resolve_participant_type(&user_id)
            .ok_or(AdmissionError::Forbidden)?;
        Ok(Admission::New(Participant::new(
            room_id,
            user_id,
            participant_type,
        )))
    }

    /// Record the participant of a checked admission, if it is new.
    pub async fn complete(&self, admission: Admission) -> Result<Participant, AdmissionError> {
        let participant = match admission {
            Admission::Existing(existing) => return Ok(existing),
            Admission::New(participant) => participant,
        };

        match self.participants.insert(&participant).await {
            Ok(()) => {
                tracing::info!(
                    room_id = %participant.room_id,
                    user_id = %participant.user_id,
                    participant_type = %participant.participant_type,
                    "Participant created"
                );
                Ok(participant)
            }
            Err(ParticipantStoreError::AlreadyExists) => self
                .participants
                .find(&participant.room_id, &participant.user_id)
                .await?
                .ok_or_else(|| {
                    AdmissionError::Unavailable("participant vanished after conflict".to_string())
                }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rooms::{InMemoryParticipantRepository, InMemoryRoomDirectory};
    use crate::domain::foundation::UserId;
    use crate::domain::participant::{ParticipantType, RoomAccess, RoomStatus};

    async fn setup(
        access: RoomAccess,
    ) -> (AdmitParticipantHandler, Arc<InMemoryParticipantRepository>) {
        let rooms = Arc::new(InMemoryRoomDirectory::new());
        rooms.upsert(access).await;
        let participants = Arc::new(InMemoryParticipantRepository::new());
        (
            AdmitParticipantHandler::new(rooms, participants.clone()),
            participants,
        )
    }

    fn command(room_id: RoomId, user_id: UserId) -> AdmitParticipantCommand {
        AdmitParticipantCommand {
            room_id,
            user: AuthenticatedUser::new(user_id, None),
        }
    }

    #[tokio::test]
    async fn unknown_room_is_refused() {
        let (handler, _) = setup(RoomAccess::open(RoomId::new())).await;
        let result = handler.handle(command(RoomId::new(), UserId::new())).await;
        assert!(matches!(result, Err(AdmissionError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn closed_room_is_refused() {
        let room = RoomId::new();
        let (handler, _) = setup(RoomAccess::open(room).with_status(RoomStatus::Closed)).await;
        let result = handler.handle(command(room, UserId::new())).await;
        assert!(matches!(result, Err(AdmissionError::RoomClosed(_))));
    }

    #[tokio::test]
    async fn uninvited_user_cannot_join_private_room() {
        let room = RoomId::new();
        let (handler, participants) = setup(RoomAccess::open(room).private()).await;
        let result = handler.handle(command(room, UserId::new())).await;
        assert!(matches!(result, Err(AdmissionError::Forbidden)));
        assert_eq!(participants.count_in_room(&room).await, 0);
    }

    #[tokio::test]
    async fn reconnect_reuses_participant() {
        let room = RoomId::new();
        let expert = UserId::new();
        let (handler, participants) = setup(RoomAccess::open(room).with_expert(expert)).await;

        let first = handler.handle(command(room, expert)).await.unwrap();
        let second = handler.handle(command(room, expert)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.participant_type, ParticipantType::Expert);
        assert_eq!(participants.count_in_room(&room).await, 1);
    }

    #[tokio::test]
    async fn check_writes_nothing_until_completed() {
        let room = RoomId::new();
        let (handler, participants) = setup(RoomAccess::open(room)).await;
        let cmd = command(room, UserId::new());

        let admission = handler.check(&cmd).await.unwrap();
        assert!(matches!(admission, Admission::New(_)));
        assert_eq!(participants.count_in_room(&room).await, 0);

        let participant = handler.complete(admission).await.unwrap();
        assert_eq!(participants.count_in_room(&room).await, 1);
        assert!(matches!(
            handler.check(&cmd).await.unwrap(),
            Admission::Existing(existing) if existing.id == participant.id
        ));
    }
}
