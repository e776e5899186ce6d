//! Room coordination
//!
//! - Schema types for voices, rosters and timelines
//! - RoomRegistry trait with file and memory stores
//! - RoomCoordinator, one task per room
//! - Rooms directory to find or start a room's coordinator

pub mod coordinator;
pub mod registry;
pub mod rooms;
pub mod schema;

pub use coordinator::{ConnectionId, ConnectionSender, RoomCoordinator, RoomHandle};
pub use registry::{FileRegistry, MemoryRegistry, RoomRegistry};
pub use rooms::{Rooms, SharedRooms};
pub use schema::{BeatEvent, Participant, Timeline, Voice, VoiceGrouping};
