//! Room participants and the connection lifecycle vocabulary.
//!
//! Rooms themselves are owned by the room CRUD service; this module only
//! models the slice of a room the real-time layer needs for admission.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{ParticipantId, RoomId, Timestamp, UserId};

mod connection;

pub use connection::{Connection, ConnectionDetail, OutboundFrame, QueueError};

/// Role of a connected user in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantType {
    Viewer,
    Expert,
    Examinee,
}

impl fmt::Display for ParticipantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParticipantType::Viewer => "viewer",
            ParticipantType::Expert => "expert",
            ParticipantType::Examinee => "examinee",
        };
        f.write_str(s)
    }
}

/// A user's membership record in a room.
///
/// Exactly one exists per `(room_id, user_id)`; reconnects reuse it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub participant_type: ParticipantType,
    pub created_at: Timestamp,
}

impl Participant {
    pub fn new(room_id: RoomId, user_id: UserId, participant_type: ParticipantType) -> Self {
        Self {
            id: ParticipantId::new(),
            room_id,
            user_id,
            participant_type,
            created_at: Timestamp::now(),
        }
    }
}

/// Lifecycle status of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    New,
    Active,
    Review,
    Closed,
}

impl RoomStatus {
    /// Whether new connections may join.
    pub fn accepts_connections(&self) -> bool {
        !matches!(self, RoomStatus::Closed)
    }
}

/// The admission-relevant view of a room.
#[derive(Debug, Clone)]
pub struct RoomAccess {
    pub room_id: RoomId,
    pub status: RoomStatus,
    pub is_private: bool,
    pub experts: HashSet<UserId>,
    pub examinees: HashSet<UserId>,
    pub invited: HashSet<UserId>,
}

impl RoomAccess {
    /// A public, active room with no assigned roles.
    pub fn open(room_id: RoomId) -> Self {
        Self {
            room_id,
            status: RoomStatus::Active,
            is_private: false,
            experts: HashSet::new(),
            examinees: HashSet::new(),
            invited: HashSet::new(),
        }
    }

    pub fn with_expert(mut self, user_id: UserId) -> Self {
        self.experts.insert(user_id);
        self
    }

    pub fn with_examinee(mut self, user_id: UserId) -> Self {
        self.examinees.insert(user_id);
        self
    }

    pub fn with_invited(mut self, user_id: UserId) -> Self {
        self.invited.insert(user_id);
        self
    }

    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }

    pub fn with_status(mut self, status: RoomStatus) -> Self {
        self.status = status;
        self
    }

    /// Role the user takes in this room, or `None` if they may not enter.
    ///
    /// Experts win over examinees when a user holds both assignments.
    pub fn resolve_participant_type(&self, user_id: &UserId) -> Option<ParticipantType> {
        if self.experts.contains(user_id) {
            return Some(ParticipantType::Expert);
        }
        if self.examinees.contains(user_id) {
            return Some(ParticipantType::Examinee);
        }
        if self.is_private && !self.invited.contains(user_id) {
            return None;
        }
        Some(ParticipantType::Viewer)
    }
}

/// States of one connection, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Admitting,
    Connected,
    Reading,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether moving to `next` is a legal transition.
    ///
    /// Any non-terminal state may jump to `Closing` on error.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Admitting, Connected)
                | (Connected, Reading)
                | (Reading, Closing)
                | (Closing, Closed)
                | (Admitting, Closing)
                | (Connected, Closing)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}
