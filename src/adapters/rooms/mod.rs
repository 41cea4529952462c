//! Room and participant storage adapters.

mod in_memory;

pub use in_memory::{InMemoryParticipantRepository, InMemoryRoomDirectory};
