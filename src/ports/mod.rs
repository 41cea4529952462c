//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the real-time core and the outside world. Adapters implement these ports.
//!
//! ## Event Ports
//!
//! - `HotEventStore` - Recent, replayable events (chunked scans)
//! - `EventArchive` - Durable storage the hot tier drains into
//! - `EventBus` - Cross-process fan-out keyed by routing key
//!
//! ## Connection Ports
//!
//! - `ConnectionListener` - Connect/disconnect notifications
//! - `ParticipantRepository` / `RoomDirectory` - Admission lookups
//! - `SessionValidator` - Token validation at the admission endpoint

mod connection_listener;
mod event_archive;
mod event_bus;
mod hot_event_store;
mod participant_repository;
mod session_validator;

pub use connection_listener::ConnectionListener;
pub use event_archive::{ArchiveError, EventArchive};
pub use event_bus::{
    BusCallback, BusError, BusMessage, BusNotification, EventBus, ServerId, Subscription,
};
pub use hot_event_store::{
    latest_matching, scan_chunks, EventChunks, EventFilter, HotEventStore, HotStoreError,
    ScanOrder, ScanPage,
};
pub use participant_repository::{ParticipantRepository, ParticipantStoreError, RoomDirectory};
pub use session_validator::SessionValidator;
