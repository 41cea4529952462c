//! Domain layer containing the real-time vocabulary.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors, auth)
//! - `room_event` - Event envelope, storage projection, routing
//! - `participant` - Participants, room access rules, connection states

pub mod foundation;
pub mod participant;
pub mod room_event;
