// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Persist-and-restore round trips over a hardware-free graph.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::PathBuf;
use std::sync::Arc;

use aircast_core::{AircastError, Result, StudioConfig};
use aircast_engine::{
    JsonStore, PlayerState, StateStore, Studio, StudioState, TrackMode, TrackResolver,
};

fn resolver() -> Arc<dyn TrackResolver> {
    Arc::new(|track: u64| -> Result<PathBuf> {
        Err(AircastError::Validation(format!("test library has no track {track}")))
    })
}

fn config() -> StudioConfig {
    StudioConfig { frames_per_block: 64, ..StudioConfig::default() }
}

/// Build a graph of two mixers (one feeding a channel of the other), a file
/// output bound to the top mixer, and a live player with queued tracks.
fn build_graph(studio: &Studio, dir: &std::path::Path) {
    let main = studio.add_mixer("Main desk", 2).unwrap();
    let submix = studio.add_mixer("Phone submix", 1).unwrap();

    let channel = studio.add_mixer_channel(&main).unwrap();
    studio.set_mixer_channel_input(&main, &channel, Some(&submix)).unwrap();
    studio.set_mixer_channel_volume(&main, &channel, 0.75).unwrap();

    let player = studio.add_player("Overnight").unwrap();
    studio
        .set_player_tracks(
            &player,
            vec![(11, TrackMode::PlayNext), (12, TrackMode::Loop), (13, TrackMode::PauseAfter)],
        )
        .unwrap();

    let recording = studio
        .add_file_output("Aircheck", dir.join("aircheck.mp3").to_str().unwrap(), 7, 64)
        .unwrap();
    studio.set_output_input(&recording, Some(&main)).unwrap();
}

#[test]
fn test_restore_reproduces_node_and_edge_set() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("state.json");

    let studio =
        Studio::new(config(), Box::new(JsonStore::new(&store_path)), resolver()).unwrap();
    build_graph(&studio, dir.path());
    let persisted = studio.snapshot();
    drop(studio);

    let restored =
        Studio::restore(config(), Box::new(JsonStore::new(&store_path)), resolver()).unwrap();

    // The node set and the edge set round-trip.
    assert_eq!(restored.snapshot(), persisted);

    let mixers = restored.list_mixers();
    assert_eq!(mixers.len(), 2);
    let main = mixers.iter().find(|m| m.display_name == "Main desk").unwrap();
    assert_eq!(main.output_channels, 2);
    assert_eq!(main.channel_ids.len(), 1);

    let outputs = restored.list_outputs();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].kind, "file");
    assert_eq!(outputs[0].input_id.as_deref(), Some(main.id.as_str()));

    let players = restored.list_players();
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].state, PlayerState::Paused);
    assert_eq!(players[0].queued_tracks, 3);

    // Restoring again from the restored snapshot is a fixed point.
    restored.save().unwrap();
    let again =
        Studio::restore(config(), Box::new(JsonStore::new(&store_path)), resolver()).unwrap();
    assert_eq!(again.snapshot(), persisted);
}

#[test]
fn test_delete_refused_while_in_use() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("state.json");
    let studio =
        Studio::new(config(), Box::new(JsonStore::new(&store_path)), resolver()).unwrap();
    build_graph(&studio, dir.path());

    let mixers = studio.list_mixers();
    let main = mixers.iter().find(|m| m.display_name == "Main desk").unwrap();
    let submix = mixers.iter().find(|m| m.display_name == "Phone submix").unwrap();

    // The submix feeds a channel of the main desk; the main desk feeds the
    // file output.
    assert!(matches!(studio.delete_mixer(&submix.id), Err(AircastError::InUse(_))));
    assert!(matches!(studio.delete_mixer(&main.id), Err(AircastError::InUse(_))));

    // Unbinding the chain makes deletion possible.
    let outputs = studio.list_outputs();
    studio.set_output_input(&outputs[0].id, None).unwrap();
    studio.delete_mixer(&main.id).unwrap();
    studio.delete_mixer(&submix.id).unwrap();
    assert!(studio.list_mixers().is_empty());
}

struct FailingStore;

impl StateStore for FailingStore {
    fn load(&self) -> Result<StudioState> {
        Ok(StudioState::default())
    }

    fn save(&self, _state: &StudioState) -> Result<()> {
        Err(AircastError::Persist("store unavailable".to_string()))
    }
}

#[test]
fn test_failed_save_leaves_graph_unchanged() {
    let studio = Studio::new(config(), Box::new(FailingStore), resolver()).unwrap();
    assert!(matches!(studio.add_mixer("Main desk", 2), Err(AircastError::Persist(_))));
    assert!(studio.list_mixers().is_empty());
    assert!(matches!(studio.add_player("Overnight"), Err(AircastError::Persist(_))));
    assert!(studio.list_players().is_empty());
}

#[test]
fn test_cycle_refused_across_mixers() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("state.json");
    let studio =
        Studio::new(config(), Box::new(JsonStore::new(&store_path)), resolver()).unwrap();

    let a = studio.add_mixer("A", 2).unwrap();
    let b = studio.add_mixer("B", 2).unwrap();
    let a_channel = studio.add_mixer_channel(&a).unwrap();
    let b_channel = studio.add_mixer_channel(&b).unwrap();

    studio.set_mixer_channel_input(&a, &a_channel, Some(&b)).unwrap();
    // B already feeds A; the reverse subscription would close a loop.
    assert!(matches!(
        studio.set_mixer_channel_input(&b, &b_channel, Some(&a)),
        Err(AircastError::Validation(_))
    ));
}
