// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The persistence schema the routing graph round-trips through an external
//! store, and the built-in JSON file store.
//!
//! `parameters` columns are opaque strings: a plain device name for device
//! nodes, a JSON payload for everything else. The typed payload structs
//! below give those JSON blobs a shape.

use std::path::{Path, PathBuf};

use aircast_core::{AircastError, Result};
use serde::{Deserialize, Serialize};

/// Library track identifier (the library itself is an external collaborator).
pub type TrackId = u64;

/// Input node kinds; only hardware capture devices exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Device,
}

/// A persisted input node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    pub id: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: InputKind,
    /// The capture device name.
    pub parameters: String,
}

/// Output node kinds. Browser streams are recreated on demand by the web
/// layer and deliberately have no member here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Device,
    Icecast,
    Multiplex,
    File,
}

/// A persisted output node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: OutputKind,
    /// The id of the source bound to this output; empty when unbound.
    #[serde(default)]
    pub input_id: String,
    /// Kind-specific parameters: a device name, or one of the JSON payloads.
    pub parameters: String,
}

/// JSON payload in [`OutputRecord::parameters`] for Icecast outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcecastParams {
    pub endpoint: String,
    pub password: String,
    pub quality: u8,
    pub bit_rate: u32,
}

/// JSON payload in [`OutputRecord::parameters`] for multiplexed outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplexParams {
    /// The output id of the parent device output.
    pub parent: String,
    /// Slice width in channels.
    pub channels: u16,
    /// First output channel of the slice.
    pub offset: u16,
}

/// JSON payload in [`OutputRecord::parameters`] for rolling-file outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileParams {
    pub base_path: String,
    pub quality: u8,
    pub bit_rate: u32,
}

/// A persisted mixer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixerRecord {
    pub id: String,
    pub display_name: String,
    pub output_channels: u16,
}

/// A persisted mixer channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixerChannelRecord {
    pub id: String,
    pub mixer_id: String,
    /// The id of the source feeding this channel; empty when unbound.
    #[serde(default)]
    pub input_id: String,
    pub volume: f32,
}

/// Live-player transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Playing,
    Paused,
}

/// What happens when a queued track finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackMode {
    /// Advance to the next queued track.
    PlayNext,
    /// Pause the player after this track.
    PauseAfter,
    /// Replay this track.
    Loop,
}

/// A persisted live player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: String,
    pub name: String,
    pub state: PlayerState,
    #[serde(default)]
    pub jingle_playlist_id: Option<String>,
    #[serde(default)]
    pub jingle_count: Option<u32>,
    #[serde(default)]
    pub jingle_plays: u32,
}

/// One queued track of a live player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerTrackRecord {
    pub player_id: String,
    pub track_id: TrackId,
    pub index: u32,
    pub mode: TrackMode,
}

/// The complete persisted graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudioState {
    #[serde(default)]
    pub inputs: Vec<InputRecord>,
    #[serde(default)]
    pub outputs: Vec<OutputRecord>,
    #[serde(default)]
    pub mixers: Vec<MixerRecord>,
    #[serde(default)]
    pub mixer_channels: Vec<MixerChannelRecord>,
    #[serde(default)]
    pub players: Vec<PlayerRecord>,
    #[serde(default)]
    pub player_tracks: Vec<PlayerTrackRecord>,
}

/// The external store the controller round-trips [`StudioState`] through.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<StudioState>;
    fn save(&self, state: &StudioState) -> Result<()>;
}

/// A JSON file store; the built-in [`StateStore`] implementation.
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf() }
    }
}

impl StateStore for JsonStore {
    fn load(&self) -> Result<StudioState> {
        if !self.path.exists() {
            return Ok(StudioState::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| AircastError::Persist(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| AircastError::Persist(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, state: &StudioState) -> Result<()> {
        let raw = serde_json::to_string_pretty(state)
            .map_err(|e| AircastError::Persist(e.to_string()))?;
        std::fs::write(&self.path, raw)
            .map_err(|e| AircastError::Persist(format!("{}: {e}", self.path.display())))
    }
}
