//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the real-time core to external systems:
//! - `serialization` - JSON envelope encoding
//! - `hot_store` - Recent events (in-memory, no-op, Redis)
//! - `bus` - Cross-process pub/sub (no-op, in-memory broker, Redis)
//! - `archive` - Durable events (in-memory, PostgreSQL)
//! - `rooms` - Room access and participant records
//! - `auth` - Access token validation
//! - `websocket` - Sockets, registry, dispatch and the HTTP upgrade

pub mod archive;
pub mod auth;
pub mod bus;
pub mod hot_store;
pub mod rooms;
pub mod serialization;
pub mod websocket;
