// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A sequencing node that manages one file player at a time.
//!
//! The playlist forwards the current file's PCM to its own subscribers, so
//! downstream consumers keep a stable producer across track changes. On
//! end-of-track a user-supplied next-track callback runs; it is expected to
//! call [`Playlist::set_file`] again.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use aircast_core::{
    next_node_id, Fanout, NodeId, PcmBlock, PcmProducer, Result, StudioConfig,
};

use super::file::FilePlayer;

/// Callback invoked when the current file finishes.
pub type NextTrackCallback = Arc<dyn Fn() + Send + Sync>;

struct PlaylistState {
    file: Option<Arc<FilePlayer>>,
    paused: bool,
    next_callback: Option<NextTrackCallback>,
}

struct PlaylistShared {
    id: NodeId,
    fanout: Fanout<PcmBlock>,
    state: Mutex<PlaylistState>,
}

/// A consumer/producer node sequencing file players.
pub struct Playlist {
    config: StudioConfig,
    shared: Arc<PlaylistShared>,
}

impl Playlist {
    pub fn new(config: &StudioConfig) -> Self {
        let id = next_node_id();
        Self {
            config: config.clone(),
            shared: Arc::new(PlaylistShared {
                id,
                fanout: Fanout::new(id),
                state: Mutex::new(PlaylistState { file: None, paused: false, next_callback: None }),
            }),
        }
    }

    /// Install the callback that picks the next track.
    pub fn set_next_callback(&self, callback: Option<NextTrackCallback>) {
        self.shared.lock_state().next_callback = callback;
    }

    /// Replace the current file and start it playing (unless paused).
    pub fn set_file(&self, path: &Path) -> Result<()> {
        self.detach_current();

        let player = Arc::new(FilePlayer::open(path, &self.config)?);

        // Forward the file's PCM to the playlist's own subscribers.
        let forward: Weak<PlaylistShared> = Arc::downgrade(&self.shared);
        player.subscribe_consumer(
            self.shared.id,
            Box::new(move |block: &PcmBlock| {
                if let Some(shared) = forward.upgrade() {
                    shared.fanout.publish(block);
                }
            }),
        )?;

        let on_end: Weak<PlaylistShared> = Arc::downgrade(&self.shared);
        player.set_end_callback(Some(Box::new(move || {
            if let Some(shared) = on_end.upgrade() {
                shared.track_finished();
            }
        })));

        let paused = {
            let mut state = self.shared.lock_state();
            state.file = Some(Arc::clone(&player));
            state.paused
        };
        if !paused {
            player.play();
        }
        Ok(())
    }

    /// Drop the current file without a replacement.
    pub fn clear(&self) {
        self.detach_current();
    }

    /// Seconds into the current file.
    pub fn current_time(&self) -> f64 {
        self.shared.lock_state().file.as_ref().map_or(0.0, |file| file.position())
    }

    /// Resume playback of the current file.
    pub fn play(&self) {
        let file = {
            let mut state = self.shared.lock_state();
            state.paused = false;
            state.file.clone()
        };
        if let Some(file) = file {
            let on_end: Weak<PlaylistShared> = Arc::downgrade(&self.shared);
            file.set_end_callback(Some(Box::new(move || {
                if let Some(shared) = on_end.upgrade() {
                    shared.track_finished();
                }
            })));
            file.play();
        }
    }

    /// Pause playback, keeping the current file for later resume.
    pub fn pause(&self) {
        let file = {
            let mut state = self.shared.lock_state();
            state.paused = true;
            state.file.clone()
        };
        if let Some(file) = file {
            file.set_end_callback(None);
            file.pause();
        }
    }

    /// Stop the current file and rewind it.
    pub fn stop(&self) {
        let file = self.shared.lock_state().file.clone();
        if let Some(file) = file {
            file.set_end_callback(None);
            if let Err(e) = file.stop() {
                tracing::warn!("failed to rewind stopped file: {e}");
            }
        }
    }

    fn detach_current(&self) {
        let previous = self.shared.lock_state().file.take();
        if let Some(file) = previous {
            file.set_end_callback(None);
            if let Err(e) = file.stop() {
                tracing::warn!("failed to stop previous file: {e}");
            }
            file.pcm().clear();
        }
    }
}

impl PcmProducer for Playlist {
    fn node_id(&self) -> NodeId {
        self.shared.id
    }

    /// The channel count follows the current file; stereo while idle.
    fn channels(&self) -> u16 {
        self.shared.lock_state().file.as_ref().map_or(2, |file| file.channels())
    }

    fn pcm(&self) -> &Fanout<PcmBlock> {
        &self.shared.fanout
    }
}

impl PlaylistShared {
    fn lock_state(&self) -> MutexGuard<'_, PlaylistState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// End-of-track: drop the finished file, then hand control to the
    /// next-track callback (outside the state lock, since it will re-enter
    /// `set_file`).
    fn track_finished(&self) {
        let callback = {
            let mut state = self.lock_state();
            state.file = None;
            state.next_callback.clone()
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}
