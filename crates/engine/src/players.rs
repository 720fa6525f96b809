// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Live players: a playlist node plus a queued track list with per-track
//! advancement modes.
//!
//! Track ids belong to the music library, which is an external collaborator;
//! a [`TrackResolver`] turns an id into a playable path.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use aircast_core::{Result, StudioConfig};
use aircast_nodes::Playlist;

use crate::persist::{PlayerRecord, PlayerState, PlayerTrackRecord, TrackId, TrackMode};

/// Resolves a library track id to a playable file path.
pub trait TrackResolver: Send + Sync {
    fn resolve(&self, track: TrackId) -> Result<PathBuf>;
}

impl<F> TrackResolver for F
where
    F: Fn(TrackId) -> Result<PathBuf> + Send + Sync,
{
    fn resolve(&self, track: TrackId) -> Result<PathBuf> {
        self(track)
    }
}

struct PlayerInner {
    name: String,
    playing: bool,
    tracks: Vec<(TrackId, TrackMode)>,
    jingle_playlist_id: Option<String>,
    jingle_count: Option<u32>,
    jingle_plays: u32,
}

struct PlayerShared {
    id: String,
    playlist: Arc<Playlist>,
    resolver: Arc<dyn TrackResolver>,
    inner: Mutex<PlayerInner>,
    /// Installed by the controller; persists state mutated by automatic
    /// advancement. Best-effort.
    persist_hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

/// A live player: state, track queue, and the playlist node feeding audio.
pub struct LivePlayer {
    shared: Arc<PlayerShared>,
}

impl LivePlayer {
    /// Create a paused, empty player.
    pub fn new(
        id: &str,
        name: &str,
        config: &StudioConfig,
        resolver: Arc<dyn TrackResolver>,
    ) -> Self {
        let playlist = Arc::new(Playlist::new(config));
        playlist.pause();
        let shared = Arc::new(PlayerShared {
            id: id.to_string(),
            playlist: Arc::clone(&playlist),
            resolver,
            inner: Mutex::new(PlayerInner {
                name: name.to_string(),
                playing: false,
                tracks: Vec::new(),
                jingle_playlist_id: None,
                jingle_count: None,
                jingle_plays: 0,
            }),
            persist_hook: Mutex::new(None),
        });

        let weak: Weak<PlayerShared> = Arc::downgrade(&shared);
        playlist.set_next_callback(Some(Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.track_finished();
            }
        })));

        Self { shared }
    }

    /// Recreate a player from its persisted record and track queue.
    pub fn restore(
        record: &PlayerRecord,
        tracks: Vec<(TrackId, TrackMode)>,
        config: &StudioConfig,
        resolver: Arc<dyn TrackResolver>,
    ) -> Self {
        let player = Self::new(&record.id, &record.name, config, resolver);
        {
            let mut inner = player.shared.lock_inner();
            inner.tracks = tracks;
            inner.jingle_playlist_id.clone_from(&record.jingle_playlist_id);
            inner.jingle_count = record.jingle_count;
            inner.jingle_plays = record.jingle_plays;
        }
        if record.state == PlayerState::Playing {
            player.set_state(PlayerState::Playing);
        } else {
            player.shared.load_head_track();
        }
        player
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn name(&self) -> String {
        self.shared.lock_inner().name.clone()
    }

    pub fn set_name(&self, name: &str) {
        self.shared.lock_inner().name = name.to_string();
    }

    /// The playlist node feeding this player's audio (a PCM producer).
    pub fn playlist(&self) -> &Arc<Playlist> {
        &self.shared.playlist
    }

    /// Install the controller's persistence callback.
    pub fn set_persist_hook(&self, hook: Option<Box<dyn Fn() + Send + Sync>>) {
        *self.shared.persist_hook.lock().unwrap_or_else(PoisonError::into_inner) = hook;
    }

    pub fn state(&self) -> PlayerState {
        if self.shared.lock_inner().playing {
            PlayerState::Playing
        } else {
            PlayerState::Paused
        }
    }

    /// Start or pause playback.
    pub fn set_state(&self, state: PlayerState) {
        let playing = state == PlayerState::Playing;
        self.shared.lock_inner().playing = playing;
        if playing {
            self.shared.load_head_track();
            self.shared.playlist.play();
        } else {
            self.shared.playlist.pause();
        }
    }

    pub fn tracks(&self) -> Vec<(TrackId, TrackMode)> {
        self.shared.lock_inner().tracks.clone()
    }

    /// Replace the queued track list.
    ///
    /// A changed head track is loaded immediately; an emptied queue clears
    /// the current file.
    pub fn set_tracks(&self, tracks: Vec<(TrackId, TrackMode)>) {
        let (old_head, new_head) = {
            let mut inner = self.shared.lock_inner();
            let old_head = inner.tracks.first().map(|(track, _)| *track);
            inner.tracks = tracks;
            (old_head, inner.tracks.first().map(|(track, _)| *track))
        };
        match new_head {
            Some(track) if old_head != Some(track) => self.shared.load_track(track),
            Some(_) => {},
            None => self.shared.playlist.clear(),
        }
    }

    /// Persistence record for this player.
    pub fn record(&self) -> PlayerRecord {
        let inner = self.shared.lock_inner();
        PlayerRecord {
            id: self.shared.id.clone(),
            name: inner.name.clone(),
            state: if inner.playing { PlayerState::Playing } else { PlayerState::Paused },
            jingle_playlist_id: inner.jingle_playlist_id.clone(),
            jingle_count: inner.jingle_count,
            jingle_plays: inner.jingle_plays,
        }
    }

    /// Persistence records for the queued tracks.
    pub fn track_records(&self) -> Vec<PlayerTrackRecord> {
        let inner = self.shared.lock_inner();
        inner
            .tracks
            .iter()
            .enumerate()
            .map(|(index, (track, mode))| {
                #[allow(clippy::cast_possible_truncation)]
                let index = index as u32;
                PlayerTrackRecord {
                    player_id: self.shared.id.clone(),
                    track_id: *track,
                    index,
                    mode: *mode,
                }
            })
            .collect()
    }
}

impl PlayerShared {
    fn lock_inner(&self) -> MutexGuard<'_, PlayerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve and load a track into the playlist.
    fn load_track(&self, track: TrackId) {
        match self.resolver.resolve(track) {
            Ok(path) => {
                if let Err(e) = self.playlist.set_file(&path) {
                    tracing::warn!(player = %self.id, track, "failed to load track: {e}");
                }
            },
            Err(e) => {
                tracing::warn!(player = %self.id, track, "failed to resolve track: {e}");
            },
        }
    }

    /// Load the head of the queue, if any.
    fn load_head_track(&self) {
        let head = self.lock_inner().tracks.first().map(|(track, _)| *track);
        if let Some(track) = head {
            self.load_track(track);
        }
    }

    /// End-of-track: advance according to the head track's mode.
    fn track_finished(&self) {
        enum Action {
            Replay(TrackId),
            Next(Option<TrackId>),
            Pause,
        }

        let action = {
            let mut inner = self.lock_inner();
            match inner.tracks.first().copied() {
                None => {
                    inner.playing = false;
                    Action::Pause
                },
                Some((track, TrackMode::Loop)) => Action::Replay(track),
                Some((_, TrackMode::PlayNext)) => {
                    inner.tracks.remove(0);
                    Action::Next(inner.tracks.first().map(|(track, _)| *track))
                },
                Some((_, TrackMode::PauseAfter)) => {
                    inner.playing = false;
                    Action::Pause
                },
            }
        };

        match action {
            Action::Replay(track) | Action::Next(Some(track)) => self.load_track(track),
            Action::Next(None) => {},
            Action::Pause => self.playlist.pause(),
        }

        let hook = self.persist_hook.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hook) = hook.as_ref() {
            hook();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use aircast_core::AircastError;

    fn unresolvable() -> Arc<dyn TrackResolver> {
        Arc::new(|track: TrackId| -> Result<PathBuf> {
            Err(AircastError::Validation(format!("no library for track {track}")))
        })
    }

    #[test]
    fn test_starts_paused_and_empty() {
        let player =
            LivePlayer::new("p1", "Overnight", &StudioConfig::default(), unresolvable());
        assert_eq!(player.state(), PlayerState::Paused);
        assert!(player.tracks().is_empty());
        assert_eq!(player.record().state, PlayerState::Paused);
    }

    #[test]
    fn test_track_records_are_ordered() {
        let player = LivePlayer::new("p1", "Overnight", &StudioConfig::default(), unresolvable());
        player.set_tracks(vec![
            (5, TrackMode::PlayNext),
            (9, TrackMode::Loop),
            (2, TrackMode::PauseAfter),
        ]);
        let records = player.track_records();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| (r.index, r.track_id)).collect::<Vec<_>>(),
            vec![(0, 5), (1, 9), (2, 2)]
        );
        assert_eq!(records[1].mode, TrackMode::Loop);
    }

    #[test]
    fn test_restore_keeps_queue_and_state() {
        let record = PlayerRecord {
            id: "p1".to_string(),
            name: "Overnight".to_string(),
            state: PlayerState::Paused,
            jingle_playlist_id: Some("jp".to_string()),
            jingle_count: Some(3),
            jingle_plays: 1,
        };
        let player = LivePlayer::restore(
            &record,
            vec![(7, TrackMode::PlayNext)],
            &StudioConfig::default(),
            unresolvable(),
        );
        assert_eq!(player.tracks(), vec![(7, TrackMode::PlayNext)]);
        assert_eq!(player.record(), record);
    }
}
