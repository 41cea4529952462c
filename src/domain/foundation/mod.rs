//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers and error types that form the
//! vocabulary of the interview-room real-time layer.

mod auth;
mod errors;
mod ids;
mod timestamp;

pub use auth::{AuthError, AuthenticatedUser};
pub use errors::{DomainError, ErrorCode};
pub use ids::{ConnectionId, EventId, ParticipantId, RoomId, UserId};
pub use timestamp::Timestamp;
