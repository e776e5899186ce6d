//! Room schema definitions
//!
//! These types match the JSON exchanged with the browser client and the
//! layout of the persisted room slots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::utils::error::{AppError, AppResult};

// =============================================================================
// Voice Types
// =============================================================================

/// A percussion voice a participant can control.
///
/// Declaration order is the canonical assignment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Kick,
    Hihat,
    Snare,
    Cowbell,
}

impl Voice {
    /// Every voice, in assignment order
    pub const ALL: [Voice; 4] = [Voice::Kick, Voice::Hihat, Voice::Snare, Voice::Cowbell];

    /// Wire name of this voice
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Kick => "kick",
            Voice::Hihat => "hihat",
            Voice::Snare => "snare",
            Voice::Cowbell => "cowbell",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Roster Types
// =============================================================================

/// A named member of a room's roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub name: String,
    pub assigned_voice: Voice,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn new(name: impl Into<String>, assigned_voice: Voice) -> Self {
        Self {
            name: name.into(),
            assigned_voice,
            joined_at: Some(Utc::now()),
        }
    }
}

/// Body of a join request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub name: String,
}

/// Body of a successful join response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub sound: Voice,
}

/// Pick the voice for `name`.
///
/// Returns the voice already held by `name`, otherwise the first voice in
/// canonical order nobody holds. `None` means the room is full.
pub fn pick_voice(roster: &[Participant], name: &str) -> Option<(Voice, bool)> {
    if let Some(existing) = roster.iter().find(|p| p.name == name) {
        return Some((existing.assigned_voice, false));
    }

    Voice::ALL
        .into_iter()
        .find(|voice| !roster.iter().any(|p| p.assigned_voice == *voice))
        .map(|voice| (voice, true))
}

// =============================================================================
// Timeline Types
// =============================================================================

/// "This voice sounds at this step"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub beat: u32,
    #[serde(rename = "sound")]
    pub voice: Voice,
}

impl BeatEvent {
    pub fn new(beat: u32, voice: Voice) -> Self {
        Self { beat, voice }
    }
}

/// Beat events keyed by voice, each list in submission order.
///
/// This is the shape of both the connect snapshot and segment broadcasts.
pub type VoiceGrouping = BTreeMap<Voice, Vec<BeatEvent>>;

/// The merged beat events of every voice in a room.
///
/// Stored flat; grouping happens on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeline {
    events: Vec<BeatEvent>,
}

impl Timeline {
    pub fn new(events: Vec<BeatEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[BeatEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drop every event of `voice` and append `segment` in its place.
    ///
    /// Other voices' events keep their relative order.
    pub fn replace_voice(&mut self, voice: Voice, segment: &[BeatEvent]) {
        self.events.retain(|event| event.voice != voice);
        self.events.extend_from_slice(segment);
    }

    /// Events of a single voice, in submission order
    pub fn voice_events(&self, voice: Voice) -> Vec<BeatEvent> {
        self.events
            .iter()
            .filter(|event| event.voice == voice)
            .copied()
            .collect()
    }

    /// Group the timeline by voice for snapshot delivery
    pub fn grouped(&self) -> VoiceGrouping {
        let mut grouping = VoiceGrouping::new();
        for event in &self.events {
            grouping.entry(event.voice).or_default().push(*event);
        }
        grouping
    }
}

/// Voice of a submitted segment.
///
/// `Ok(None)` for an empty segment. A segment mixing voices is rejected
/// rather than half-merged.
pub fn segment_voice(segment: &[BeatEvent]) -> AppResult<Option<Voice>> {
    let Some(first) = segment.first() else {
        return Ok(None);
    };

    if let Some(stray) = segment.iter().find(|event| event.voice != first.voice) {
        return Err(AppError::MalformedRequest(format!(
            "segment mixes voices {} and {}",
            first.voice, stray.voice
        )));
    }

    Ok(Some(first.voice))
}
