// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The playback device sink.
//!
//! A bounded FIFO of PCM blocks sits between the producer callback and the
//! hardware callback. Producing into a full queue drops the oldest block
//! (old audio is stale audio; dropping it keeps glitch latency low). The
//! hardware callback assembles exactly the demanded sample count, keeping the
//! unconsumed tail of a partially drained block for the next pull and padding
//! with silence when the queue runs dry. After every pull a zero-argument
//! tick is published, giving observers an optional external clock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aircast_core::{
    next_node_id, AircastError, Fanout, NodeId, PcmBlock, PcmProducer, Result, StudioConfig,
    SubscriberId,
};
use cpal::traits::{DeviceTrait, StreamTrait};

use super::hw;

/// Queue capacity in blocks; producing beyond this drops the oldest block.
pub const QUEUE_CAPACITY: usize = 16;

/// The bounded FIFO and render logic between producer and hardware callback.
///
/// Kept separate from the device so the queue discipline is testable without
/// audio hardware.
pub struct PlaybackQueue {
    queue: VecDeque<PcmBlock>,
    /// Partially drained block and its consumed-sample offset.
    pending: Option<(PcmBlock, usize)>,
    dropped_blocks: u64,
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self { queue: VecDeque::with_capacity(QUEUE_CAPACITY), pending: None, dropped_blocks: 0 }
    }

    /// Enqueue a block, dropping the oldest when full.
    pub fn push(&mut self, block: PcmBlock) {
        if self.queue.len() == QUEUE_CAPACITY {
            self.queue.pop_front();
            self.dropped_blocks += 1;
        }
        self.queue.push_back(block);
    }

    /// Number of whole blocks currently queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.pending.is_none()
    }

    /// Total blocks dropped to overruns so far.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks
    }

    /// Fill `out` exactly, concatenating queued samples and zero-padding the
    /// tail when the queue empties first.
    pub fn render(&mut self, out: &mut [i16]) {
        let mut filled = 0;
        while filled < out.len() {
            if let Some((block, offset)) = &mut self.pending {
                let samples = block.samples();
                let take = (out.len() - filled).min(samples.len() - *offset);
                out[filled..filled + take].copy_from_slice(&samples[*offset..*offset + take]);
                filled += take;
                *offset += take;
                if *offset == samples.len() {
                    self.pending = None;
                }
            } else if let Some(block) = self.queue.pop_front() {
                self.pending = Some((block, 0));
            } else {
                break;
            }
        }
        out[filled..].fill(0);
    }
}

struct AttachedInput {
    source: Arc<dyn PcmProducer>,
    subscription: SubscriberId,
}

/// A playback device that pulls from its single attached producer.
pub struct OutputDevice {
    id: NodeId,
    name: String,
    channels: u16,
    sample_rate: u32,
    frames_per_block: u32,
    queue: Arc<Mutex<PlaybackQueue>>,
    ticks: Arc<Fanout<()>>,
    input: Mutex<Option<AttachedInput>>,
    stream: Mutex<Option<cpal::Stream>>,
}

impl OutputDevice {
    /// Open a playback device by exact name.
    pub fn new(name: &str, config: &StudioConfig) -> Result<Self> {
        let device = hw::find_output_device(name)?;
        let supported = device
            .default_output_config()
            .map_err(|_| AircastError::NotAnOutput(name.to_string()))?;
        let channels = supported.channels();
        if channels == 0 {
            return Err(AircastError::NotAnOutput(name.to_string()));
        }
        let id = next_node_id();
        #[allow(clippy::cast_possible_truncation)]
        let frames_per_block = config.frames_per_block as u32;
        Ok(Self {
            id,
            name: name.to_string(),
            channels,
            sample_rate: config.sample_rate,
            frames_per_block,
            queue: Arc::new(Mutex::new(PlaybackQueue::new())),
            ticks: Arc::new(Fanout::new(id)),
            input: Mutex::new(None),
            stream: Mutex::new(None),
        })
    }

    /// The device name this sink was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node identity of this sink.
    pub fn node_id(&self) -> NodeId {
        self.id
    }

    /// The playback channel count.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// List the available playback device names.
    pub fn devices() -> Vec<String> {
        hw::output_device_names()
    }

    fn lock_input(&self) -> MutexGuard<'_, Option<AttachedInput>> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The currently attached producer, if any.
    pub fn input_id(&self) -> Option<NodeId> {
        self.lock_input().as_ref().map(|attached| attached.source.node_id())
    }

    /// Subscribe to the per-pull tick notification.
    pub fn subscribe_ticks(&self, callback: aircast_core::Callback<()>) -> SubscriberId {
        self.ticks.subscribe(callback)
    }

    /// Remove a tick subscription.
    pub fn unsubscribe_ticks(&self, id: SubscriberId) {
        self.ticks.unsubscribe(id);
    }

    /// Attach a producer, starting the hardware stream; `clear_input` stops it.
    pub fn set_input(&self, source: Arc<dyn PcmProducer>) -> Result<()> {
        {
            let input = self.lock_input();
            if input.as_ref().map(|attached| attached.source.node_id()) == Some(source.node_id()) {
                return Ok(());
            }
        }
        self.clear_input();
        self.start_stream()?;

        let queue = Arc::clone(&self.queue);
        let subscription = source.subscribe_consumer(
            self.id,
            Box::new(move |block: &PcmBlock| {
                queue.lock().unwrap_or_else(PoisonError::into_inner).push(block.clone());
            }),
        )?;
        *self.lock_input() = Some(AttachedInput { source, subscription });
        tracing::info!(device = %self.name, "playback input attached");
        Ok(())
    }

    /// Detach the current producer and stop the hardware stream.
    pub fn clear_input(&self) {
        if let Some(attached) = self.lock_input().take() {
            attached.source.unsubscribe(attached.subscription);
            tracing::info!(device = %self.name, "playback input detached");
        }
        self.stop_stream();
    }

    fn start_stream(&self) -> Result<()> {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if stream.is_some() {
            return Ok(());
        }
        let device = hw::find_output_device(&self.name)?;
        let stream_config = cpal::StreamConfig {
            channels: self.channels,
            sample_rate: self.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(self.frames_per_block),
        };
        let supported = device
            .default_output_config()
            .map_err(|_| AircastError::NotAnOutput(self.name.clone()))?;

        let queue = Arc::clone(&self.queue);
        let ticks = Arc::clone(&self.ticks);
        let device_name = self.name.clone();
        let error_callback = move |err: cpal::StreamError| {
            // Driver status problems are logged, never raised.
            tracing::warn!(device = %device_name, "playback stream error: {err}");
        };

        let built = match supported.sample_format() {
            cpal::SampleFormat::I16 => device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    queue.lock().unwrap_or_else(PoisonError::into_inner).render(data);
                    ticks.publish(&());
                },
                error_callback,
                None,
            ),
            cpal::SampleFormat::F32 => {
                // Render into a reused i16 scratch buffer, then convert.
                let mut scratch: Vec<i16> = Vec::new();
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0);
                        queue.lock().unwrap_or_else(PoisonError::into_inner).render(&mut scratch);
                        for (out, &sample) in data.iter_mut().zip(&scratch) {
                            *out = f32::from(sample) / f32::from(i16::MAX);
                        }
                        ticks.publish(&());
                    },
                    error_callback,
                    None,
                )
            },
            other => {
                return Err(AircastError::NotAnOutput(format!(
                    "{}: unsupported sample format {other}",
                    self.name
                )))
            },
        };

        let built = built.map_err(|e| {
            AircastError::NotAnOutput(format!("{}: failed to build stream: {e}", self.name))
        })?;
        built.play().map_err(|e| {
            AircastError::NotAnOutput(format!("{}: failed to start stream: {e}", self.name))
        })?;
        tracing::info!(device = %self.name, channels = self.channels, "playback stream started");
        *stream = Some(built);
        Ok(())
    }

    fn stop_stream(&self) {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if stream.take().is_some() {
            tracing::info!(device = %self.name, "playback stream stopped");
        }
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        self.clear_input();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_bounded_and_drops_oldest() {
        let mut queue = PlaybackQueue::new();
        for value in 0..20i16 {
            queue.push(PcmBlock::new(1, vec![value; 4]));
        }
        assert_eq!(queue.len(), QUEUE_CAPACITY);
        assert_eq!(queue.dropped_blocks(), 4);

        // The oldest four blocks (0..4) were dropped; rendering starts at 4.
        let mut out = [0i16; 4];
        queue.render(&mut out);
        assert_eq!(out, [4, 4, 4, 4]);
    }

    #[test]
    fn test_underrun_pads_with_silence() {
        // One stereo block of 2048 samples against a demand of 1536 frames ×
        // 2 channels = 3072 samples: 2048 data + 1024 zeros.
        let mut queue = PlaybackQueue::new();
        queue.push(PcmBlock::new(2, vec![7i16; 2048]));

        let mut out = vec![-1i16; 3072];
        queue.render(&mut out);
        assert!(out[..2048].iter().all(|&s| s == 7));
        assert!(out[2048..].iter().all(|&s| s == 0));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_partial_block_tail_is_kept() {
        let mut queue = PlaybackQueue::new();
        queue.push(PcmBlock::new(1, vec![1, 2, 3, 4, 5, 6]));

        let mut first = [0i16; 4];
        queue.render(&mut first);
        assert_eq!(first, [1, 2, 3, 4]);

        // The remaining two samples survive into the next pull.
        let mut second = [9i16; 4];
        queue.render(&mut second);
        assert_eq!(second, [5, 6, 0, 0]);
    }

    #[test]
    fn test_render_spans_blocks() {
        let mut queue = PlaybackQueue::new();
        queue.push(PcmBlock::new(1, vec![1, 2]));
        queue.push(PcmBlock::new(1, vec![3, 4]));
        queue.push(PcmBlock::new(1, vec![5, 6]));

        let mut out = [0i16; 5];
        queue.render(&mut out);
        assert_eq!(out, [1, 2, 3, 4, 5]);
        let mut rest = [0i16; 2];
        queue.render(&mut rest);
        assert_eq!(rest, [6, 0]);
    }
}
