// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The rolling MP3 file sink.
//!
//! Wraps an MP3 encoder and writes its output to `<stem>_YYYYMMDD-HHMMSS.mp3`
//! next to the configured base path. The first block opens a file; a new one
//! is opened whenever the wall-clock elapsed since the current file's open
//! exceeds the roll interval, and whenever the input changes.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use aircast_core::{NodeId, PcmProducer, Result, StudioConfig};
use bytes::Bytes;

use crate::codecs::mp3::Mp3Encoder;

/// Naming and rotation of the output files, separate from the encoder so the
/// file discipline is testable without audio.
pub struct RollingWriter {
    base: PathBuf,
    roll_interval: Duration,
    current: Option<(File, Instant)>,
}

impl RollingWriter {
    pub fn new(base: &Path, roll_interval: Duration) -> Self {
        Self { base: base.to_path_buf(), roll_interval, current: None }
    }

    /// The base path the timestamp is added to.
    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// The file name for a recording starting now.
    fn target_path(&self) -> PathBuf {
        let timestamp = chrono::Local::now().format("_%Y%m%d-%H%M%S");
        let stem = self.base.file_stem().and_then(|s| s.to_str()).unwrap_or("recording");
        let extension = match self.base.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("mp3") => format!(".{ext}"),
            Some(ext) => format!(".{ext}.mp3"),
            None => ".mp3".to_string(),
        };
        let file_name = format!("{stem}{timestamp}{extension}");
        self.base.parent().map_or_else(|| PathBuf::from(&file_name), |dir| dir.join(&file_name))
    }

    /// Close the current file so the next write opens a fresh one.
    pub fn roll(&mut self) {
        if self.current.take().is_some() {
            tracing::info!(base = %self.base.display(), "recording file rolled");
        }
    }

    /// Append encoded bytes, opening or rotating the file as needed.
    pub fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let expired = self
            .current
            .as_ref()
            .is_some_and(|(_, opened)| opened.elapsed() > self.roll_interval);
        if expired {
            self.roll();
        }
        if self.current.is_none() {
            let path = self.target_path();
            let file = File::create(&path)?;
            tracing::info!(path = %path.display(), "recording file opened");
            self.current = Some((file, Instant::now()));
        }
        if let Some((file, _)) = &mut self.current {
            file.write_all(bytes)?;
        }
        Ok(())
    }

    /// Close any open file.
    pub fn close(&mut self) {
        self.current.take();
    }
}

struct AttachedInput {
    source: Arc<dyn PcmProducer>,
}

/// An MP3 writer that rotates output files on a wall-clock interval.
pub struct RollingFile {
    encoder: Arc<Mp3Encoder>,
    writer: Arc<Mutex<RollingWriter>>,
    write_subscription: aircast_core::SubscriberId,
    input: Mutex<Option<AttachedInput>>,
}

impl RollingFile {
    /// Create a sink recording to `<base>_YYYYMMDD-HHMMSS.mp3`.
    pub fn new(base: &Path, quality: u8, bit_rate: u32, config: &StudioConfig) -> Result<Self> {
        use aircast_core::EncodedProducer as _;

        let encoder = Arc::new(Mp3Encoder::new(quality, bit_rate, config.sample_rate)?);
        let writer = Arc::new(Mutex::new(RollingWriter::new(
            base,
            Duration::from_secs(config.roll_interval_secs),
        )));

        let weak: Weak<Mutex<RollingWriter>> = Arc::downgrade(&writer);
        let write_subscription = encoder.encoded().subscribe(Box::new(move |bytes: &Bytes| {
            if let Some(writer) = weak.upgrade() {
                let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = writer.write(bytes) {
                    tracing::warn!("recording write failed, dropping block: {e}");
                }
            }
        }));

        Ok(Self { encoder, writer, write_subscription, input: Mutex::new(None) })
    }

    /// The node identity of the wrapped encoder.
    pub fn node_id(&self) -> NodeId {
        use aircast_core::EncodedProducer as _;
        self.encoder.node_id()
    }

    /// The base path recordings are named from.
    pub fn base_path(&self) -> PathBuf {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner).base_path().to_path_buf()
    }

    fn lock_input(&self) -> MutexGuard<'_, Option<AttachedInput>> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The producer currently recorded, if any.
    pub fn input_id(&self) -> Option<NodeId> {
        self.lock_input().as_ref().map(|attached| attached.source.node_id())
    }

    /// Set the audio source to record (or clear with `None`). A new source
    /// starts a new file.
    pub fn set_input(&self, source: Option<Arc<dyn PcmProducer>>) -> Result<()> {
        {
            let input = self.lock_input();
            if input.as_ref().map(|attached| attached.source.node_id())
                == source.as_ref().map(|s| s.node_id())
            {
                return Ok(());
            }
        }
        self.encoder.set_input(source.clone())?;
        *self.lock_input() = source.map(|source| AttachedInput { source });
        self.writer.lock().unwrap_or_else(PoisonError::into_inner).roll();
        Ok(())
    }

    /// Stop recording: detach the encoder and close any open file.
    pub fn close(&self) {
        use aircast_core::EncodedProducer as _;
        self.encoder.encoded().unsubscribe(self.write_subscription);
        if self.lock_input().take().is_some() {
            if let Err(e) = self.encoder.set_input(None) {
                tracing::warn!("failed to detach encoder on close: {e}");
            }
        }
        self.writer.lock().unwrap_or_else(PoisonError::into_inner).close();
    }
}
