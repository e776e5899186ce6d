//! Room directory
//!
//! Maps room ids to their running coordinators, starting one on first use.
//! The directory only holds weak handles: a room's task stops once no request
//! or channel is using it, and the next access starts a fresh one from the
//! registry.

use super::coordinator::{RoomCoordinator, RoomHandle, WeakRoomHandle};
use super::registry::{validate_room_id, RoomRegistry};
use crate::utils::error::AppResult;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Shared handle to the room directory
pub type SharedRooms = Arc<Rooms>;

/// Rooms with a running coordinator
pub struct Rooms {
    registry: Arc<dyn RoomRegistry>,
    handles: Arc<DashMap<String, WeakRoomHandle>>,
}

impl Rooms {
    pub fn new(registry: Arc<dyn RoomRegistry>) -> SharedRooms {
        Arc::new(Self {
            registry,
            handles: Arc::new(DashMap::new()),
        })
    }

    /// Handle for `room_id`, starting its coordinator if none is running
    pub fn room(&self, room_id: &str) -> AppResult<RoomHandle> {
        validate_room_id(room_id)?;

        match self.handles.entry(room_id.to_string()) {
            Entry::Occupied(mut slot) => {
                if let Some(handle) = slot.get().upgrade() {
                    return Ok(handle);
                }
                let handle = self.start(room_id);
                slot.insert(handle.downgrade());
                Ok(handle)
            }
            Entry::Vacant(slot) => {
                let handle = self.start(room_id);
                slot.insert(handle.downgrade());
                Ok(handle)
            }
        }
    }

    /// Spawn a coordinator and drop its directory entry once it stops
    fn start(&self, room_id: &str) -> RoomHandle {
        let (handle, task) = RoomCoordinator::new(room_id, self.registry.clone()).spawn();

        let handles = Arc::clone(&self.handles);
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                tracing::error!("Room {} task failed: {}", room_id, e);
            }
            handles.remove_if(&room_id, |_, weak| !weak.is_alive());
        });

        handle
    }

    /// Number of rooms with a directory entry
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
