// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The file player: a compressed audio file exposed as a real-time PCM
//! producer at the file's native channel count.
//!
//! A dedicated worker thread decodes ahead, slices the stream into exact
//! blocks, and sleeps so that `frames_emitted / sample_rate` tracks the wall
//! clock from a fixed anchor. Pausing stops the worker at the next block
//! boundary and retains the decode position; stopping rewinds. Seeking never
//! emits: it reopens the file when the target lies behind the current
//! position and then discards decoded frames until the target is reached.
//!
//! Decoder failure is fatal to the producer: it detaches its subscribers,
//! stops, and fires the end-of-track callback so a playlist advances instead
//! of hanging.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use aircast_core::{
    next_node_id, AircastError, Fanout, NodeId, PcmBlock, PcmProducer, Result, StudioConfig,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// End-of-track callback type.
pub type EndCallback = Box<dyn FnMut() + Send>;

struct DecodeState {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_buf: Option<SampleBuffer<i16>>,
    pending: VecDeque<i16>,
}

struct StreamProps {
    channels: u16,
    sample_rate: u32,
    duration_secs: f64,
}

struct PlayerShared {
    id: NodeId,
    path: PathBuf,
    channels: u16,
    sample_rate: u32,
    frames_per_block: usize,
    playing: AtomicBool,
    /// Frames published or skipped since the start of the file.
    frames_emitted: AtomicU64,
    fanout: Fanout<PcmBlock>,
    end_callback: Mutex<Option<EndCallback>>,
    decode: Mutex<DecodeState>,
}

/// A time-paced PCM producer reading from a compressed audio file.
pub struct FilePlayer {
    shared: Arc<PlayerShared>,
    duration_secs: f64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FilePlayer {
    /// Open an audio file ready to play.
    pub fn open(path: &Path, config: &StudioConfig) -> Result<Self> {
        let (decode, props) = open_decoder(path)?;
        tracing::info!(
            path = %path.display(),
            channels = props.channels,
            sample_rate = props.sample_rate,
            duration_secs = props.duration_secs,
            "opened audio file"
        );
        let id = next_node_id();
        Ok(Self {
            shared: Arc::new(PlayerShared {
                id,
                path: path.to_path_buf(),
                channels: props.channels,
                sample_rate: props.sample_rate,
                frames_per_block: config.frames_per_block,
                playing: AtomicBool::new(false),
                frames_emitted: AtomicU64::new(0),
                fanout: Fanout::new(id),
                end_callback: Mutex::new(None),
                decode: Mutex::new(decode),
            }),
            duration_secs: props.duration_secs,
            worker: Mutex::new(None),
        })
    }

    /// The path this player was opened with.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Whether the worker is currently producing.
    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    /// Start producing blocks to subscribers.
    pub fn play(&self) {
        if self.shared.playing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.join_worker();
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("aircast-file-player".to_string())
            .spawn(move || run_worker(&shared));
        match handle {
            Ok(handle) => *self.lock_worker() = Some(handle),
            Err(e) => {
                self.shared.playing.store(false, Ordering::SeqCst);
                tracing::error!(path = %self.shared.path.display(), "failed to spawn player worker: {e}");
            },
        }
    }

    /// Stop producing but retain the decode position.
    pub fn pause(&self) {
        self.shared.playing.store(false, Ordering::SeqCst);
    }

    /// Stop producing and rewind to the start of the file.
    pub fn stop(&self) -> Result<()> {
        self.shared.playing.store(false, Ordering::SeqCst);
        self.join_worker();
        if self.shared.frames_emitted.load(Ordering::SeqCst) > 0 {
            let (decode, _) = open_decoder(&self.shared.path)?;
            *self.shared.lock_decode() = decode;
            self.shared.frames_emitted.store(0, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Seek to a position in seconds.
    ///
    /// The decoder advances without emitting until the target frame; seeking
    /// backwards reopens the file first. Playback resumes afterwards if it
    /// was running.
    pub fn set_position(&self, seconds: f64) -> Result<()> {
        let was_playing = self.shared.playing.swap(false, Ordering::SeqCst);
        self.join_worker();

        let channels = usize::from(self.shared.channels);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let target_frames = (seconds.max(0.0) * f64::from(self.shared.sample_rate)).floor() as u64;
        {
            let mut decode = self.shared.lock_decode();
            let mut emitted = self.shared.frames_emitted.load(Ordering::SeqCst);
            if emitted > target_frames {
                let (fresh, _) = open_decoder(&self.shared.path)?;
                *decode = fresh;
                emitted = 0;
            }
            while emitted < target_frames {
                if decode.pending.is_empty() {
                    match decode_next(&mut decode) {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            self.shared.frames_emitted.store(emitted, Ordering::SeqCst);
                            return Err(e);
                        },
                    }
                }
                let available = decode.pending.len() / channels;
                #[allow(clippy::cast_possible_truncation)]
                let skip = available.min((target_frames - emitted) as usize);
                decode.pending.drain(..skip * channels);
                emitted += skip as u64;
            }
            self.shared.frames_emitted.store(emitted, Ordering::SeqCst);
        }

        if was_playing {
            self.play();
        }
        Ok(())
    }

    /// Seconds of audio emitted so far.
    pub fn position(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let frames = self.shared.frames_emitted.load(Ordering::SeqCst) as f64;
        frames / f64::from(self.shared.sample_rate)
    }

    /// Track length in seconds (0 when the container does not declare one).
    pub fn duration(&self) -> f64 {
        self.duration_secs
    }

    /// Install (or clear) the end-of-track callback.
    pub fn set_end_callback(&self, callback: Option<EndCallback>) {
        *self.shared.end_callback.lock().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the worker to exit. A no-op when called from the worker
    /// itself (an end-of-track callback may reach back into this player).
    fn join_worker(&self) {
        let handle = self.lock_worker().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for FilePlayer {
    fn drop(&mut self) {
        self.shared.playing.store(false, Ordering::SeqCst);
        self.join_worker();
    }
}

impl PcmProducer for FilePlayer {
    fn node_id(&self) -> NodeId {
        self.shared.id
    }

    fn channels(&self) -> u16 {
        self.shared.channels
    }

    fn pcm(&self) -> &Fanout<PcmBlock> {
        &self.shared.fanout
    }
}

impl PlayerShared {
    fn lock_decode(&self) -> MutexGuard<'_, DecodeState> {
        self.decode.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_worker(shared: &PlayerShared) {
    let channels = usize::from(shared.channels);
    let block_samples = shared.frames_per_block * channels;
    let rate = f64::from(shared.sample_rate);

    // Anchor such that frames_emitted / rate lines up with the wall clock,
    // also after a pause or seek.
    #[allow(clippy::cast_precision_loss)]
    let behind = shared.frames_emitted.load(Ordering::SeqCst) as f64 / rate;
    let anchor = Instant::now() - Duration::from_secs_f64(behind);

    loop {
        if !shared.playing.load(Ordering::SeqCst) {
            // Paused: keep the position, fire nothing.
            return;
        }

        let chunk = {
            let mut decode = shared.lock_decode();
            loop {
                if decode.pending.len() >= block_samples {
                    break;
                }
                match decode_next(&mut decode) {
                    Ok(true) => {},
                    Ok(false) => {
                        drop(decode);
                        finish(shared, None);
                        return;
                    },
                    Err(e) => {
                        drop(decode);
                        finish(shared, Some(&e));
                        return;
                    },
                }
            }
            decode.pending.drain(..block_samples).collect::<Vec<i16>>()
        };

        let frames =
            shared.frames_emitted.fetch_add(shared.frames_per_block as u64, Ordering::SeqCst)
                + shared.frames_per_block as u64;
        #[allow(clippy::cast_precision_loss)]
        let target = frames as f64 / rate;
        let elapsed = anchor.elapsed().as_secs_f64();
        if target > elapsed {
            std::thread::sleep(Duration::from_secs_f64(target - elapsed));
        }
        shared.fanout.publish(&PcmBlock::new(shared.channels, chunk));
    }
}

/// Mark the player inactive and dispatch the end-of-track callback.
fn finish(shared: &PlayerShared, error: Option<&AircastError>) {
    if let Some(e) = error {
        // Fatal: this producer detaches from its subscribers. No retry.
        tracing::error!(path = %shared.path.display(), "decode failed, stopping player: {e}");
        shared.fanout.clear();
    }
    shared.playing.store(false, Ordering::SeqCst);
    let callback = shared.end_callback.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(mut callback) = callback {
        callback();
        let mut slot = shared.end_callback.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(callback);
        }
    }
}

fn open_decoder(path: &Path) -> Result<(DecodeState, StreamProps)> {
    let file = std::fs::File::open(path)
        .map_err(|e| AircastError::DecodeFailed(format!("{}: {e}", path.display())))?;
    let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AircastError::DecodeFailed(format!("{}: {e}", path.display())))?;
    let reader = probed.format;

    let track = reader.default_track().ok_or_else(|| {
        AircastError::DecodeFailed(format!("{}: no default track", path.display()))
    })?;
    let codec_params = track.codec_params.clone();
    let track_id = track.id;

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| AircastError::DecodeFailed(format!("{}: no sample rate", path.display())))?;
    let channel_count = codec_params
        .channels
        .ok_or_else(|| AircastError::DecodeFailed(format!("{}: no channel info", path.display())))?
        .count();
    let channels = u16::try_from(channel_count).map_err(|_| {
        AircastError::DecodeFailed(format!("{}: too many channels ({channel_count})", path.display()))
    })?;

    #[allow(clippy::cast_precision_loss)]
    let duration_secs =
        codec_params.n_frames.map_or(0.0, |frames| frames as f64 / f64::from(sample_rate));

    let decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| AircastError::DecodeFailed(format!("{}: {e}", path.display())))?;

    Ok((
        DecodeState { reader, decoder, track_id, sample_buf: None, pending: VecDeque::new() },
        StreamProps { channels, sample_rate, duration_secs },
    ))
}

/// Decode the next packet into `pending`. Returns `Ok(false)` on end of
/// stream; recoverable decode errors are logged and skipped.
fn decode_next(state: &mut DecodeState) -> Result<bool> {
    loop {
        let packet = match state.reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                return Ok(false);
            },
            Err(e) => return Err(AircastError::DecodeFailed(e.to_string())),
        };
        if packet.track_id() != state.track_id {
            continue;
        }
        match state.decoder.decode(&packet) {
            Ok(audio_buf) => {
                if state.sample_buf.is_none() {
                    let spec = *audio_buf.spec();
                    let capacity = audio_buf.capacity() as u64;
                    state.sample_buf = Some(SampleBuffer::<i16>::new(capacity, spec));
                }
                if let Some(buf) = &mut state.sample_buf {
                    buf.copy_interleaved_ref(audio_buf);
                    state.pending.extend(buf.samples().iter().copied());
                }
                return Ok(true);
            },
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!("recoverable decode error, skipping packet: {e}");
            },
            Err(e) => return Err(AircastError::DecodeFailed(e.to_string())),
        }
    }
}
