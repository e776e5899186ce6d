//! Room registry read/write operations
//!
//! Durable storage for a room's two slots, the roster and the timeline.
//! On disk a room is a directory under the data root containing:
//! - roster.json: Participants and their assigned voices
//! - timeline.json: Flat list of beat events
//!
//! Every call is atomic on its own. Read-then-write sequences are the
//! caller's problem; see `RoomCoordinator`.

use super::schema::{Participant, Timeline};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const ROSTER_FILE: &str = "roster.json";
const TIMELINE_FILE: &str = "timeline.json";

/// Registry-related errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid room id: {0:?}")]
    InvalidRoomId(String),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Room-scoped key/value storage
#[async_trait]
pub trait RoomRegistry: Send + Sync {
    /// Current roster, empty if never written
    async fn get_roster(&self, room_id: &str) -> RegistryResult<Vec<Participant>>;

    /// Replace the whole roster
    async fn put_roster(&self, room_id: &str, roster: &[Participant]) -> RegistryResult<()>;

    /// Current timeline, empty if never written
    async fn get_timeline(&self, room_id: &str) -> RegistryResult<Timeline>;

    /// Replace the whole timeline
    async fn put_timeline(&self, room_id: &str, timeline: &Timeline) -> RegistryResult<()>;
}

/// Reject ids that cannot name a room
pub fn validate_room_id(room_id: &str) -> RegistryResult<()> {
    if room_id.is_empty() || room_id == "." || room_id == ".." {
        return Err(RegistryError::InvalidRoomId(room_id.to_string()));
    }
    Ok(())
}

// =============================================================================
// File Registry
// =============================================================================

/// Registry persisted as JSON files, one directory per room
#[derive(Debug, Clone)]
pub struct FileRegistry {
    root: PathBuf,
}

impl FileRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding a room's slots
    pub fn room_dir(&self, room_id: &str) -> RegistryResult<PathBuf> {
        validate_room_id(room_id)?;
        Ok(self.root.join(urlencoding::encode(room_id).as_ref()))
    }

    async fn read<T>(&self, room_id: &str, file: &'static str) -> RegistryResult<T>
    where
        T: DeserializeOwned + Default + Send + 'static,
    {
        let path = self.room_dir(room_id)?.join(file);
        tokio::task::spawn_blocking(move || read_slot(&path)).await?
    }

    async fn write(
        &self,
        room_id: &str,
        file: &'static str,
        content: Vec<u8>,
    ) -> RegistryResult<()> {
        let dir = self.room_dir(room_id)?;
        tokio::task::spawn_blocking(move || write_slot(&dir, file, &content)).await?
    }
}

/// Read a slot file, treating a missing file as an empty slot
fn read_slot<T: DeserializeOwned + Default>(path: &Path) -> RegistryResult<T> {
    if !path.exists() {
        return Ok(T::default());
    }

    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write a slot file through a temp file so readers never see a partial slot
fn write_slot(dir: &Path, file: &str, content: &[u8]) -> RegistryResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }

    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(content)?;
    staged.as_file().sync_all()?;
    staged.persist(dir.join(file)).map_err(|e| e.error)?;

    tracing::debug!("Wrote {} in {:?}", file, dir);

    Ok(())
}

#[async_trait]
impl RoomRegistry for FileRegistry {
    async fn get_roster(&self, room_id: &str) -> RegistryResult<Vec<Participant>> {
        self.read(room_id, ROSTER_FILE).await
    }

    async fn put_roster(&self, room_id: &str, roster: &[Participant]) -> RegistryResult<()> {
        let content = serde_json::to_vec_pretty(roster)?;
        self.write(room_id, ROSTER_FILE, content).await
    }

    async fn get_timeline(&self, room_id: &str) -> RegistryResult<Timeline> {
        self.read(room_id, TIMELINE_FILE).await
    }

    async fn put_timeline(&self, room_id: &str, timeline: &Timeline) -> RegistryResult<()> {
        let content = serde_json::to_vec_pretty(timeline)?;
        self.write(room_id, TIMELINE_FILE, content).await
    }
}

// =============================================================================
// Memory Registry
// =============================================================================

#[derive(Debug, Default, Clone)]
struct RoomSlots {
    roster: Vec<Participant>,
    timeline: Timeline,
}

/// Registry kept in process memory; contents are lost on exit
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    rooms: RwLock<HashMap<String, RoomSlots>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomRegistry for MemoryRegistry {
    async fn get_roster(&self, room_id: &str) -> RegistryResult<Vec<Participant>> {
        validate_room_id(room_id)?;
        Ok(self
            .rooms
            .read()
            .get(room_id)
            .map(|slots| slots.roster.clone())
            .unwrap_or_default())
    }

    async fn put_roster(&self, room_id: &str, roster: &[Participant]) -> RegistryResult<()> {
        validate_room_id(room_id)?;
        self.rooms.write().entry(room_id.to_string()).or_default().roster = roster.to_vec();
        Ok(())
    }

    async fn get_timeline(&self, room_id: &str) -> RegistryResult<Timeline> {
        validate_room_id(room_id)?;
        Ok(self
            .rooms
            .read()
            .get(room_id)
            .map(|slots| slots.timeline.clone())
            .unwrap_or_default())
    }

    async fn put_timeline(&self, room_id: &str, timeline: &Timeline) -> RegistryResult<()> {
        validate_room_id(room_id)?;
        self.rooms.write().entry(room_id.to_string()).or_default().timeline = timeline.clone();
        Ok(())
    }
}
