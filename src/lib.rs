//! Interview Rooms Realtime - Event distribution for live interview rooms
//!
//! Participants of a room hold WebSocket connections to one of several
//! processes. Inbound messages are dispatched to typed handlers, resulting
//! room events are delivered to local sockets, recorded in a hot store and
//! published on a bus so that other processes reach their own sockets. A
//! background archiver moves aged events into durable storage.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod node;
pub mod ports;

pub use node::{LocalClient, NodeBackends, RealtimeNode};
