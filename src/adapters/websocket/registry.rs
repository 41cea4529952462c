//! Process-wide registry of live connections, partitioned by room.
//!
//! # Architecture
//!
//! ```text
//! Room: room-123       Room: room-456
//! ├── connection-a     ├── connection-d
//! ├── connection-b     └── connection-e
//! └── connection-c
//! ```
//!
//! The registry holds `Weak` references only. The connection handler owns
//! each connection; once it drops, the entry is skipped and pruned.
//!
//! # Thread Safety
//!
//! The room map lock is held only to find or create a room's partition.
//! Lookups and updates in different rooms never contend.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;

use crate::domain::foundation::{ConnectionId, DomainError, RoomId};
use crate::domain::participant::{Connection, ConnectionDetail};
use crate::ports::ConnectionListener;

type RoomConnections = Arc<RwLock<HashMap<ConnectionId, Weak<Connection>>>>;

/// Registry of connections served by this process.
#[derive(Default)]
pub struct ConnectionRegistry {
    rooms: RwLock<HashMap<RoomId, RoomConnections>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn room(&self, room_id: &RoomId) -> Option<RoomConnections> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room_id)
            .cloned()
    }

    /// Add a connection to its room.
    ///
    /// The insert happens while the room map is locked, so it cannot land
    /// in a partition that `unregister` is removing.
    pub fn register(&self, connection: &Arc<Connection>) {
        let weak = Arc::downgrade(connection);
        {
            let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(room) = rooms.get(&connection.room_id()) {
                room.write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(connection.id(), weak);
                return;
            }
        }

        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        rooms
            .entry(connection.room_id())
            .or_default()
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection.id(), weak);
    }

    /// Remove a connection, dropping its room when empty.
    pub fn unregister(&self, connection: &Connection) {
        let room_id = connection.room_id();
        let Some(room) = self.room(&room_id) else {
            return;
        };

        let now_empty = {
            let mut connections = room.write().unwrap_or_else(PoisonError::into_inner);
            connections.remove(&connection.id());
            connections.retain(|_, weak| weak.strong_count() > 0);
            connections.is_empty()
        };

        if now_empty {
            let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
            // Re-check under the map lock; a join may have raced in
            let still_empty = rooms.get(&room_id).map_or(false, |room| {
                room.read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_empty()
            });
            if still_empty {
                rooms.remove(&room_id);
            }
        }
    }

    /// Live connections in a room, or `None` if the room has none.
    pub fn try_get_connections(&self, room_id: &RoomId) -> Option<Vec<Arc<Connection>>> {
        let room = self.room(room_id)?;
        let live: Vec<Arc<Connection>> = room
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(Weak::upgrade)
            .collect();

        (!live.is_empty()).then_some(live)
    }

    /// Count of live connections in a room.
    pub fn connection_count(&self, room_id: &RoomId) -> usize {
        self.try_get_connections(room_id).map_or(0, |c| c.len())
    }

    /// Count of live connections across all rooms.
    pub fn total_connection_count(&self) -> usize {
        let rooms: Vec<RoomConnections> = self
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        rooms
            .iter()
            .map(|room| {
                room.read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .filter(|weak| weak.strong_count() > 0)
                    .count()
            })
            .sum()
    }

    /// Rooms with at least one registered connection.
    pub fn active_rooms(&self) -> Vec<RoomId> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}

#[async_trait]
impl ConnectionListener for ConnectionRegistry {
    async fn on_connect(&self, detail: &ConnectionDetail) -> Result<(), DomainError> {
        self.register(&detail.connection);
        Ok(())
    }

    async fn on_disconnect(&self, detail: &ConnectionDetail) -> Result<(), DomainError> {
        self.unregister(&detail.connection);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ConnectionRegistry"
    }
}
