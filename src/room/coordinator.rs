//! Room coordinator
//!
//! Owns one room: assigns voices, merges submitted segments into the timeline
//! and fans updates out to the room's open channels.
//!
//! A coordinator runs as a single task fed by a command queue, so every
//! registry read-modify-write for its room is serialized.

use super::registry::RoomRegistry;
use super::schema::{pick_voice, segment_voice, BeatEvent, Participant, Voice, VoiceGrouping};
use crate::utils::error::{AppError, AppResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Identity of one open channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Outbound half of a channel. Each item is one JSON text frame.
pub type ConnectionSender = mpsc::UnboundedSender<String>;

/// Manages a single room's roster, timeline and channels
pub struct RoomCoordinator {
    room_id: String,

    /// Durable room state
    registry: Arc<dyn RoomRegistry>,

    /// Open channels on this room
    connections: HashMap<ConnectionId, ConnectionSender>,
}

impl RoomCoordinator {
    /// Create a coordinator for `room_id`
    pub fn new(room_id: impl Into<String>, registry: Arc<dyn RoomRegistry>) -> Self {
        Self {
            room_id: room_id.into(),
            registry,
            connections: HashMap::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Number of open channels
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Assign `name` a voice, or return the one it already holds
    pub async fn join(&mut self, name: &str) -> AppResult<Voice> {
        let mut roster = self.registry.get_roster(&self.room_id).await?;

        let Some((voice, is_new)) = pick_voice(&roster, name) else {
            tracing::info!("Room {} is full, turning away {}", self.room_id, name);
            return Err(AppError::CapacityExceeded);
        };

        if is_new {
            roster.push(Participant::new(name, voice));
            self.registry.put_roster(&self.room_id, &roster).await?;
            tracing::info!("Assigned {} to {} in room {}", voice, name, self.room_id);
        } else {
            tracing::debug!("{} rejoined room {} as {}", name, self.room_id, voice);
        }

        Ok(voice)
    }

    /// Register a channel and send it the current snapshot.
    ///
    /// Only the new channel hears about it.
    pub async fn connect(&mut self, id: ConnectionId, sender: ConnectionSender) -> AppResult<()> {
        let timeline = self.registry.get_timeline(&self.room_id).await?;
        let snapshot = serde_json::to_string(&timeline.grouped())?;

        tracing::debug!(
            "Sending snapshot of {} events to {} in room {}",
            timeline.len(),
            id,
            self.room_id
        );

        if sender.send(snapshot).is_err() {
            tracing::debug!("Channel {} closed before its snapshot was sent", id);
            return Ok(());
        }

        self.connections.insert(id, sender);
        tracing::info!(
            "Channel {} opened on room {} ({} open)",
            id,
            self.room_id,
            self.connections.len()
        );
        Ok(())
    }

    /// Forget a channel. The roster is untouched.
    pub fn disconnect(&mut self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            tracing::info!(
                "Channel {} closed on room {} ({} open)",
                id,
                self.room_id,
                self.connections.len()
            );
        }
    }

    /// Replace one voice's contribution and tell every other channel.
    ///
    /// Returns the voice that was replaced, or `None` for an empty segment,
    /// which is ignored.
    pub async fn submit_segment(
        &mut self,
        sender: ConnectionId,
        events: Vec<BeatEvent>,
    ) -> AppResult<Option<Voice>> {
        let Some(voice) = segment_voice(&events)? else {
            tracing::debug!("Ignoring empty segment from {}", sender);
            return Ok(None);
        };

        let mut timeline = self.registry.get_timeline(&self.room_id).await?;
        timeline.replace_voice(voice, &events);
        self.registry.put_timeline(&self.room_id, &timeline).await?;

        let mut update = VoiceGrouping::new();
        update.insert(voice, events);
        let payload = serde_json::to_string(&update)?;

        let delivered = self.broadcast(&payload, sender);
        tracing::debug!(
            "Merged {} segment from {} in room {}, sent to {} channels",
            voice,
            sender,
            self.room_id,
            delivered
        );

        Ok(Some(voice))
    }

    /// Send `payload` to every open channel except `exclude`.
    ///
    /// Channels whose receiver is gone are dropped.
    fn broadcast(&mut self, payload: &str, exclude: ConnectionId) -> usize {
        let mut delivered = 0;
        let room_id = &self.room_id;
        self.connections.retain(|id, tx| {
            if *id == exclude {
                return true;
            }
            if tx.send(payload.to_string()).is_ok() {
                delivered += 1;
                true
            } else {
                tracing::warn!("Dropping dead channel {} on room {}", id, room_id);
                false
            }
        });
        delivered
    }

    /// Move the coordinator onto its own task.
    ///
    /// The task runs until every `RoomHandle` for it is dropped and its
    /// queue is drained. Weak handles do not keep it alive.
    pub fn spawn(self) -> (RoomHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = RoomHandle {
            room_id: self.room_id.clone(),
            tx,
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoomCommand>) {
        tracing::debug!("Room {} started", self.room_id);

        while let Some(command) = rx.recv().await {
            match command {
                RoomCommand::Join { name, reply } => {
                    let _ = reply.send(self.join(&name).await);
                }
                RoomCommand::Connect { id, sender, reply } => {
                    let _ = reply.send(self.connect(id, sender).await);
                }
                RoomCommand::Disconnect { id } => self.disconnect(id),
                RoomCommand::Submit { sender, events, reply } => {
                    let result = self.submit_segment(sender, events).await;
                    if let Err(e) = &result {
                        tracing::warn!(
                            "Rejected segment from {} in room {}: {}",
                            sender,
                            self.room_id,
                            e
                        );
                    }
                    let _ = reply.send(result);
                }
            }
        }

        tracing::debug!("Room {} stopped", self.room_id);
    }
}

/// Requests queued to a room's task
enum RoomCommand {
    Join {
        name: String,
        reply: oneshot::Sender<AppResult<Voice>>,
    },
    Connect {
        id: ConnectionId,
        sender: ConnectionSender,
        reply: oneshot::Sender<AppResult<()>>,
    },
    Disconnect {
        id: ConnectionId,
    },
    Submit {
        sender: ConnectionId,
        events: Vec<BeatEvent>,
        reply: oneshot::Sender<AppResult<Option<Voice>>>,
    },
}

/// Cloneable address of a running room. Keeps the room's task alive.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: String,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Address that does not keep the room's task alive
    pub fn downgrade(&self) -> WeakRoomHandle {
        WeakRoomHandle {
            room_id: self.room_id.clone(),
            tx: self.tx.downgrade(),
        }
    }

    pub async fn join(&self, name: impl Into<String>) -> AppResult<Voice> {
        let name = name.into();
        self.request(|reply| RoomCommand::Join { name, reply }).await
    }

    pub async fn connect(&self, id: ConnectionId, sender: ConnectionSender) -> AppResult<()> {
        self.request(|reply| RoomCommand::Connect { id, sender, reply }).await
    }

    pub fn disconnect(&self, id: ConnectionId) {
        let _ = self.tx.send(RoomCommand::Disconnect { id });
    }

    pub async fn submit_segment(
        &self,
        sender: ConnectionId,
        events: Vec<BeatEvent>,
    ) -> AppResult<Option<Voice>> {
        self.request(|reply| RoomCommand::Submit { sender, events, reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<AppResult<T>>) -> RoomCommand,
    ) -> AppResult<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| AppError::RoomUnavailable(self.room_id.clone()))?;
        response
            .await
            .map_err(|_| AppError::RoomUnavailable(self.room_id.clone()))?
    }
}

/// Non-owning address of a room
#[derive(Clone)]
pub struct WeakRoomHandle {
    room_id: String,
    tx: mpsc::WeakUnboundedSender<RoomCommand>,
}

impl WeakRoomHandle {
    /// Strong handle, or `None` once the room's task has let go of its queue
    pub fn upgrade(&self) -> Option<RoomHandle> {
        self.tx.upgrade().map(|tx| RoomHandle {
            room_id: self.room_id.clone(),
            tx,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.upgrade().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::registry::MemoryRegistry;
    use crate::room::schema::Timeline;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn coordinator() -> (RoomCoordinator, Arc<MemoryRegistry>) {
        let registry = Arc::new(MemoryRegistry::new());
        (RoomCoordinator::new("lobby", registry.clone()), registry)
    }

    async fn open(room: &mut RoomCoordinator) -> (ConnectionId, UnboundedReceiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        room.connect(id, tx).await.unwrap();
        (id, rx)
    }

    fn next_json(rx: &mut UnboundedReceiver<String>) -> serde_json::Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    fn kick(beats: &[u32]) -> Vec<BeatEvent> {
        beats.iter().map(|b| BeatEvent::new(*b, Voice::Kick)).collect()
    }

    #[tokio::test]
    async fn test_distinct_names_get_distinct_voices() {
        let (mut room, registry) = coordinator();

        let mut voices = Vec::new();
        for name in ["alice", "bob", "carol", "dave"] {
            voices.push(room.join(name).await.unwrap());
        }
        assert_eq!(voices, Voice::ALL.to_vec());

        let roster = registry.get_roster("lobby").await.unwrap();
        assert_eq!(roster.len(), 4);
    }

    #[tokio::test]
    async fn test_rejoin_is_idempotent() {
        let (mut room, registry) = coordinator();

        assert_eq!(room.join("alice").await.unwrap(), Voice::Kick);
        assert_eq!(room.join("bob").await.unwrap(), Voice::Hihat);
        assert_eq!(room.join("alice").await.unwrap(), Voice::Kick);

        assert_eq!(registry.get_roster("lobby").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_full_room_rejects_new_names() {
        let (mut room, registry) = coordinator();
        for name in ["alice", "bob", "carol", "dave"] {
            room.join(name).await.unwrap();
        }
        let before = registry.get_roster("lobby").await.unwrap();

        assert!(matches!(room.join("erin").await, Err(AppError::CapacityExceeded)));
        assert_eq!(registry.get_roster("lobby").await.unwrap(), before);

        // Existing members still get their voice back
        assert_eq!(room.join("dave").await.unwrap(), Voice::Cowbell);
    }

    #[tokio::test]
    async fn test_resubmission_replaces_voice() {
        let (mut room, registry) = coordinator();
        let sender = ConnectionId::new();

        room.submit_segment(sender, vec![BeatEvent::new(2, Voice::Hihat)]).await.unwrap();
        room.submit_segment(sender, kick(&[0, 4])).await.unwrap();
        room.submit_segment(sender, kick(&[1])).await.unwrap();

        let timeline = registry.get_timeline("lobby").await.unwrap();
        assert_eq!(timeline.voice_events(Voice::Kick), kick(&[1]));
        assert_eq!(timeline.voice_events(Voice::Hihat), vec![BeatEvent::new(2, Voice::Hihat)]);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let (mut room, _) = coordinator();
        let (alice, mut alice_rx) = open(&mut room).await;
        let (_bob, mut bob_rx) = open(&mut room).await;
        let (_carol, mut carol_rx) = open(&mut room).await;
        for rx in [&mut alice_rx, &mut bob_rx, &mut carol_rx] {
            assert_eq!(next_json(rx), json!({}));
        }

        let voice = room.submit_segment(alice, kick(&[0, 4])).await.unwrap();
        assert_eq!(voice, Some(Voice::Kick));

        let expected = json!({
            "kick": [{ "beat": 0, "sound": "kick" }, { "beat": 4, "sound": "kick" }]
        });
        assert_eq!(next_json(&mut bob_rx), expected);
        assert_eq!(next_json(&mut carol_rx), expected);
        assert!(alice_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_snapshot_goes_only_to_new_channel() {
        let (mut room, _) = coordinator();
        let (alice, mut alice_rx) = open(&mut room).await;
        alice_rx.try_recv().unwrap();

        room.submit_segment(alice, kick(&[0, 4])).await.unwrap();
        room.submit_segment(alice, vec![BeatEvent::new(3, Voice::Snare)]).await.unwrap();

        let (_bob, mut bob_rx) = open(&mut room).await;
        assert_eq!(
            next_json(&mut bob_rx),
            json!({
                "kick": [{ "beat": 0, "sound": "kick" }, { "beat": 4, "sound": "kick" }],
                "snare": [{ "beat": 3, "sound": "snare" }],
            })
        );
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_segment_is_ignored() {
        let (mut room, registry) = coordinator();
        registry
            .put_timeline("lobby", &Timeline::new(kick(&[0])))
            .await
            .unwrap();
        let (alice, _alice_rx) = open(&mut room).await;
        let (_bob, mut bob_rx) = open(&mut room).await;
        bob_rx.try_recv().unwrap();

        assert_eq!(room.submit_segment(alice, Vec::new()).await.unwrap(), None);
        assert!(bob_rx.try_recv().is_err());
        assert_eq!(registry.get_timeline("lobby").await.unwrap().events(), kick(&[0]).as_slice());
    }

    #[tokio::test]
    async fn test_mixed_segment_rejected_without_side_effects() {
        let (mut room, registry) = coordinator();
        let (alice, _alice_rx) = open(&mut room).await;
        let (_bob, mut bob_rx) = open(&mut room).await;
        bob_rx.try_recv().unwrap();

        let mixed = vec![BeatEvent::new(0, Voice::Kick), BeatEvent::new(1, Voice::Snare)];
        assert!(matches!(
            room.submit_segment(alice, mixed).await,
            Err(AppError::MalformedRequest(_))
        ));
        assert!(registry.get_timeline("lobby").await.unwrap().is_empty());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_channels_are_pruned() {
        let (mut room, _) = coordinator();
        let (alice, _alice_rx) = open(&mut room).await;
        let (_bob, bob_rx) = open(&mut room).await;
        drop(bob_rx);
        assert_eq!(room.connection_count(), 2);

        room.submit_segment(alice, kick(&[0])).await.unwrap();
        assert_eq!(room.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_roster() {
        let (mut room, registry) = coordinator();
        room.join("alice").await.unwrap();
        let (alice, _rx) = open(&mut room).await;

        room.disconnect(alice);
        assert_eq!(room.connection_count(), 0);
        assert_eq!(registry.get_roster("lobby").await.unwrap().len(), 1);
        assert_eq!(room.join("alice").await.unwrap(), Voice::Kick);
    }

    #[tokio::test]
    async fn test_session_walkthrough_through_handle() {
        let registry = Arc::new(MemoryRegistry::new());
        let (room, _) = RoomCoordinator::new("jam", registry).spawn();

        assert_eq!(room.join("alice").await.unwrap(), Voice::Kick);
        assert_eq!(room.join("bob").await.unwrap(), Voice::Hihat);

        let alice = ConnectionId::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        room.connect(alice, alice_tx).await.unwrap();
        assert_eq!(next_json(&mut alice_rx), json!({}));

        room.submit_segment(alice, kick(&[0, 4])).await.unwrap();

        let bob = ConnectionId::new();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        room.connect(bob, bob_tx).await.unwrap();
        assert_eq!(
            next_json(&mut bob_rx),
            json!({ "kick": [{ "beat": 0, "sound": "kick" }, { "beat": 4, "sound": "kick" }] })
        );

        room.submit_segment(bob, vec![BeatEvent::new(2, Voice::Hihat)]).await.unwrap();
        assert_eq!(next_json(&mut alice_rx), json!({ "hihat": [{ "beat": 2, "sound": "hihat" }] }));
        assert!(alice_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_joins_never_share_a_voice() {
        let registry = Arc::new(MemoryRegistry::new());
        let (room, _) = RoomCoordinator::new("race", registry.clone()).spawn();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let room = room.clone();
            tasks.push(tokio::spawn(async move { room.join(format!("player-{i}")).await }));
        }

        let mut voices = Vec::new();
        let mut full = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(voice) => voices.push(voice),
                Err(AppError::CapacityExceeded) => full += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        voices.sort();
        assert_eq!(voices, Voice::ALL.to_vec());
        assert_eq!(full, 4);
        assert_eq!(registry.get_roster("race").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_segments_are_not_lost() {
        let registry = Arc::new(MemoryRegistry::new());
        let (room, _) = RoomCoordinator::new("race", registry.clone()).spawn();

        let mut tasks = Vec::new();
        for voice in Voice::ALL {
            let room = room.clone();
            tasks.push(tokio::spawn(async move {
                room.submit_segment(ConnectionId::new(), vec![BeatEvent::new(1, voice)]).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let timeline = registry.get_timeline("race").await.unwrap();
        assert_eq!(timeline.grouped().len(), Voice::ALL.len());
    }

    #[tokio::test]
    async fn test_task_stops_when_last_handle_drops() {
        let registry = Arc::new(MemoryRegistry::new());
        let (room, task) = RoomCoordinator::new("lobby", registry.clone()).spawn();
        let weak = room.downgrade();

        let other = weak.upgrade().unwrap();
        drop(room);
        assert_eq!(other.join("alice").await.unwrap(), Voice::Kick);
        drop(other);

        task.await.unwrap();
        assert!(!weak.is_alive());
        assert_eq!(registry.get_roster("lobby").await.unwrap().len(), 1);
    }
}
