//! Server configuration
//!
//! Read from command-line flags, falling back to `BEAT_ROOM_*` environment
//! variables.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::room::{FileRegistry, MemoryRegistry, RoomRegistry};

#[derive(Debug, Clone, Parser)]
#[command(name = "beat-room")]
#[command(about = "Room server for collaborative beat sequencing", long_about = None)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(short, long, env = "BEAT_ROOM_BIND", default_value = "127.0.0.1:1999")]
    pub bind: SocketAddr,

    /// Directory holding persisted rooms
    #[arg(short, long, env = "BEAT_ROOM_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Keep rooms in memory only
    #[arg(long, env = "BEAT_ROOM_IN_MEMORY")]
    pub in_memory: bool,
}

impl ServerConfig {
    /// Build the registry this configuration asks for
    pub fn registry(&self) -> Arc<dyn RoomRegistry> {
        if self.in_memory {
            tracing::warn!("Using in-memory registry, rooms will not survive a restart");
            Arc::new(MemoryRegistry::new())
        } else {
            tracing::info!("Persisting rooms under {:?}", self.data_dir);
            Arc::new(FileRegistry::new(&self.data_dir))
        }
    }
}
