// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The capture device producer.
//!
//! The hardware capture callback re-chunks whatever the driver delivers into
//! exact `frames_per_block × C` blocks and publishes them. The capture stream
//! is reference-counted: it starts on the first subscriber and stops when the
//! subscriber count returns to zero. Driver status problems are logged but
//! never surfaced as failures.

use std::sync::{Arc, Mutex, PoisonError};

use aircast_core::{
    next_node_id, AircastError, Fanout, NodeId, PcmBlock, PcmCallback, PcmProducer, Result,
    StudioConfig, SubscriberId,
};
use cpal::traits::{DeviceTrait, StreamTrait};

use super::hw;

/// Re-chunks driver deliveries into exact `frames_per_block × C` blocks.
///
/// cpal does not guarantee callback sizes even with a fixed buffer size, so
/// the capture callback accumulates here and drains whole blocks. Kept
/// separate from the device so the re-chunking is testable without audio
/// hardware.
pub struct CaptureBuffer {
    channels: u16,
    block_samples: usize,
    pending: Vec<i16>,
}

impl CaptureBuffer {
    pub fn new(channels: u16, frames_per_block: usize) -> Self {
        let block_samples = frames_per_block * channels as usize;
        Self { channels, block_samples, pending: Vec::with_capacity(block_samples * 2) }
    }

    /// Append interleaved i16 samples from the driver.
    pub fn push(&mut self, samples: &[i16]) {
        self.pending.extend_from_slice(samples);
    }

    /// Append interleaved f32 samples, converting to i16 with clamping.
    pub fn push_f32(&mut self, samples: &[f32]) {
        #[allow(clippy::cast_possible_truncation)]
        self.pending.extend(samples.iter().map(|&sample| (sample.clamp(-1.0, 1.0) * 32767.0) as i16));
    }

    /// Take the next whole block, if one has accumulated.
    pub fn drain_block(&mut self) -> Option<PcmBlock> {
        if self.pending.len() < self.block_samples {
            return None;
        }
        let chunk: Vec<i16> = self.pending.drain(..self.block_samples).collect();
        Some(PcmBlock::new(self.channels, chunk))
    }

    /// Samples currently held short of a whole block boundary.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}

/// What the reference-counted activation has to do with the capture stream.
#[derive(Debug, PartialEq, Eq)]
enum StreamAction {
    Start,
    Stop,
}

/// The start-on-first-subscriber / stop-at-zero transition rule.
fn stream_action(running: bool, has_subscribers: bool) -> Option<StreamAction> {
    match (running, has_subscribers) {
        (false, true) => Some(StreamAction::Start),
        (true, false) => Some(StreamAction::Stop),
        _ => None,
    }
}

/// A hardware capture device exposed as a PCM producer.
pub struct InputDevice {
    id: NodeId,
    name: String,
    channels: u16,
    sample_rate: u32,
    frames_per_block: u32,
    fanout: Arc<Fanout<PcmBlock>>,
    stream: Mutex<Option<cpal::Stream>>,
}

impl InputDevice {
    /// Open a capture device by exact name.
    pub fn new(name: &str, config: &StudioConfig) -> Result<Self> {
        let device = hw::find_input_device(name)?;
        let supported = device
            .default_input_config()
            .map_err(|_| AircastError::NotAnInput(name.to_string()))?;
        let channels = supported.channels();
        if channels == 0 {
            return Err(AircastError::NotAnInput(name.to_string()));
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
            fanout: Arc::new(Fanout::new(id)),
            stream: Mutex::new(None),
        })
    }

    /// The device name this producer was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// List the available capture device names.
    pub fn devices() -> Vec<String> {
        hw::input_device_names()
    }

    /// Start or stop the capture stream to match the subscriber count.
    fn check_state(&self) {
        let required = self.fanout.has_subscribers();
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        match stream_action(stream.is_some(), required) {
            Some(StreamAction::Start) => match self.build_stream() {
                Ok(built) => {
                    tracing::info!(device = %self.name, channels = self.channels, "capture stream started");
                    *stream = Some(built);
                },
                Err(e) => {
                    tracing::warn!(device = %self.name, "failed to start capture stream: {e}");
                },
            },
            Some(StreamAction::Stop) => {
                stream.take();
                tracing::info!(device = %self.name, "capture stream stopped");
            },
            None => {},
        }
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let device = hw::find_input_device(&self.name)?;
        let supported = device
            .default_input_config()
            .map_err(|_| AircastError::NotAnInput(self.name.clone()))?;
        let stream_config = cpal::StreamConfig {
            channels: self.channels,
            sample_rate: self.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(self.frames_per_block),
        };

        let channels = self.channels;
        let frames_per_block = self.frames_per_block as usize;
        let fanout = Arc::clone(&self.fanout);
        let device_name = self.name.clone();
        let error_callback = move |err: cpal::StreamError| {
            tracing::warn!(device = %device_name, "capture stream error: {err}");
        };

        let built = match supported.sample_format() {
            cpal::SampleFormat::I16 => {
                let mut buffer = CaptureBuffer::new(channels, frames_per_block);
                device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        buffer.push(data);
                        while let Some(block) = buffer.drain_block() {
                            fanout.publish(&block);
                        }
                    },
                    error_callback,
                    None,
                )
            },
            cpal::SampleFormat::F32 => {
                let mut buffer = CaptureBuffer::new(channels, frames_per_block);
                device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        buffer.push_f32(data);
                        while let Some(block) = buffer.drain_block() {
                            fanout.publish(&block);
                        }
                    },
                    error_callback,
                    None,
                )
            },
            other => {
                return Err(AircastError::NotAnInput(format!(
                    "{}: unsupported sample format {other}",
                    self.name
                )))
            },
        };

        let built = built.map_err(|e| {
            AircastError::NotAnInput(format!("{}: failed to build stream: {e}", self.name))
        })?;
        built.play().map_err(|e| {
            AircastError::NotAnInput(format!("{}: failed to start stream: {e}", self.name))
        })?;
        Ok(built)
    }
}

impl PcmProducer for InputDevice {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn pcm(&self) -> &Fanout<PcmBlock> {
        &self.fanout
    }

    fn subscribe(&self, callback: PcmCallback) -> SubscriberId {
        let id = self.fanout.subscribe(callback);
        self.check_state();
        id
    }

    fn subscribe_consumer(&self, consumer: NodeId, callback: PcmCallback) -> Result<SubscriberId> {
        let id = self.fanout.subscribe_consumer(consumer, callback)?;
        self.check_state();
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.fanout.unsubscribe(id);
        self.check_state();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rechunk_carries_remainder_across_pushes() {
        // Stereo, 4 frames per block: whole blocks only, remainder kept.
        let mut buffer = CaptureBuffer::new(2, 4);
        buffer.push(&[1, 1, 2, 2, 3, 3]);
        assert!(buffer.drain_block().is_none());
        assert_eq!(buffer.pending_samples(), 6);

        buffer.push(&[4, 4, 5, 5]);
        let block = buffer.drain_block().unwrap();
        assert_eq!(block.channels(), 2);
        assert_eq!(block.samples(), &[1, 1, 2, 2, 3, 3, 4, 4]);
        assert!(buffer.drain_block().is_none());
        assert_eq!(buffer.pending_samples(), 2);
    }

    #[test]
    fn test_rechunk_splits_large_delivery() {
        let mut buffer = CaptureBuffer::new(1, 4);
        buffer.push(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);

        assert_eq!(buffer.drain_block().unwrap().samples(), &[1, 2, 3, 4]);
        assert_eq!(buffer.drain_block().unwrap().samples(), &[5, 6, 7, 8]);
        assert!(buffer.drain_block().is_none());
        assert_eq!(buffer.pending_samples(), 1);
    }

    #[test]
    fn test_f32_conversion_clamps() {
        let mut buffer = CaptureBuffer::new(1, 4);
        buffer.push_f32(&[0.0, 0.5, 2.0, -2.0]);
        let block = buffer.drain_block().unwrap();
        assert_eq!(block.samples(), &[0, 16383, 32767, -32767]);
    }

    #[test]
    fn test_activation_starts_on_first_subscriber() {
        assert_eq!(stream_action(false, true), Some(StreamAction::Start));
        // Already running with subscribers: nothing to do.
        assert_eq!(stream_action(true, true), None);
    }

    #[test]
    fn test_activation_stops_at_zero_subscribers() {
        assert_eq!(stream_action(true, false), Some(StreamAction::Stop));
        assert_eq!(stream_action(false, false), None);
    }
}
