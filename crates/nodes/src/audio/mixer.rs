// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The clocked mixer: sums arbitrary inputs onto an N-channel output with
//! per-input volume and channel re-mapping.
//!
//! The mixer has no clock of its own. Each input carries a `seen` flag; when
//! a block arrives from an input that already contributed to the current
//! cycle, the cycle is complete: the accumulator is snapshotted, published,
//! and the arriving block opens the next cycle. The cycle length is therefore
//! the slowest input's period and all streams stay phase-aligned at block
//! boundaries.
//!
//! The state lock is released around `publish` so downstream work never runs
//! under the mixer lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aircast_core::{
    next_node_id, AircastError, Fanout, NodeId, PcmBlock, PcmProducer, Result, StudioConfig,
    SubscriberId,
};

/// Volume bounds accepted by [`Mixer::set_volume`].
pub const VOLUME_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;

struct InputState {
    channels: u16,
    volume: f32,
    seen: bool,
    subscription: SubscriberId,
}

struct MixerState {
    inputs: HashMap<NodeId, InputState>,
    /// Wide accumulator; saturated to i16 when a block is snapshotted.
    accumulator: Vec<i32>,
}

struct MixerShared {
    id: NodeId,
    channels: u16,
    frames_per_block: usize,
    fanout: Fanout<PcmBlock>,
    state: Mutex<MixerState>,
}

/// A mixer that sums many input streams into a single output stream.
pub struct Mixer {
    shared: Arc<MixerShared>,
}

impl Mixer {
    /// Create a mixer with `output_channels` output channels.
    pub fn new(output_channels: u16, config: &StudioConfig) -> Result<Self> {
        if output_channels == 0 {
            return Err(AircastError::Validation(
                "mixer must have at least one output channel".to_string(),
            ));
        }
        let id = next_node_id();
        let shared = Arc::new(MixerShared {
            id,
            channels: output_channels,
            frames_per_block: config.frames_per_block,
            fanout: Fanout::new(id),
            state: Mutex::new(MixerState {
                inputs: HashMap::new(),
                accumulator: vec![0i32; config.frames_per_block * output_channels as usize],
            }),
        });
        Ok(Self { shared })
    }

    /// Attach an input. Attaching the same source twice is refused.
    pub fn add_input(&self, source: &Arc<dyn PcmProducer>) -> Result<()> {
        let source_id = source.node_id();
        if self.shared.lock_state().inputs.contains_key(&source_id) {
            return Err(AircastError::Validation(format!(
                "input {source_id} is already attached to this mixer"
            )));
        }

        // Subscribe outside the state lock: delivery runs under the source's
        // fanout lock and takes the mixer lock, so the reverse order here
        // would deadlock.
        let weak = Arc::downgrade(&self.shared);
        let subscription = source.subscribe_consumer(
            self.shared.id,
            Box::new(move |block| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_block(source_id, block);
                }
            }),
        )?;

        let mut state = self.shared.lock_state();
        if state.inputs.contains_key(&source_id) {
            drop(state);
            source.unsubscribe(subscription);
            return Err(AircastError::Validation(format!(
                "input {source_id} is already attached to this mixer"
            )));
        }
        state.inputs.insert(
            source_id,
            InputState { channels: source.channels(), volume: 1.0, seen: false, subscription },
        );
        tracing::info!(mixer = %self.shared.id, input = %source_id, "mixer input attached");
        Ok(())
    }

    /// Detach an input. The callback edge is removed first, then the record.
    pub fn remove_input(&self, source: &Arc<dyn PcmProducer>) -> Result<()> {
        let source_id = source.node_id();
        let subscription = self
            .shared
            .lock_state()
            .inputs
            .get(&source_id)
            .map(|input| input.subscription)
            .ok_or_else(|| {
                AircastError::Validation(format!("input {source_id} is not attached to this mixer"))
            })?;
        source.unsubscribe(subscription);
        self.shared.lock_state().inputs.remove(&source_id);
        tracing::info!(mixer = %self.shared.id, input = %source_id, "mixer input detached");
        Ok(())
    }

    /// Set the volume of an attached input. Values outside `[0.0, 2.0]` are
    /// refused and leave the state untouched.
    pub fn set_volume(&self, source: &Arc<dyn PcmProducer>, volume: f32) -> Result<()> {
        if !VOLUME_RANGE.contains(&volume) || !volume.is_finite() {
            return Err(AircastError::Validation(format!(
                "volume {volume} is outside the range [0.0, 2.0]"
            )));
        }
        let source_id = source.node_id();
        let mut state = self.shared.lock_state();
        let input = state.inputs.get_mut(&source_id).ok_or_else(|| {
            AircastError::Validation(format!("input {source_id} is not attached to this mixer"))
        })?;
        input.volume = volume;
        Ok(())
    }

    /// The volume currently applied to an attached input.
    pub fn volume(&self, source: &Arc<dyn PcmProducer>) -> Option<f32> {
        self.shared.lock_state().inputs.get(&source.node_id()).map(|input| input.volume)
    }

    /// Number of currently attached inputs.
    pub fn input_count(&self) -> usize {
        self.shared.lock_state().inputs.len()
    }
}

impl PcmProducer for Mixer {
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

impl MixerShared {
    fn lock_state(&self) -> MutexGuard<'_, MixerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_block(&self, source: NodeId, block: &PcmBlock) {
        let completed = {
            let mut state = self.lock_state();
            let Some(input) = state.inputs.get_mut(&source) else {
                // Removed while the block was in flight.
                return;
            };
            if input.seen {
                // Second arrival from the same input closes the cycle.
                let done = snapshot(&mut state.accumulator, self.channels);
                for (id, record) in &mut state.inputs {
                    record.seen = *id == source;
                }
                Some(done)
            } else {
                input.seen = true;
                None
            }
        };

        if let Some(block_out) = completed {
            self.fanout.publish(&block_out);
        }

        let mut state = self.lock_state();
        let Some(input) = state.inputs.get(&source) else {
            return;
        };
        let (channels_in, volume) = (input.channels, input.volume);
        let frames_per_block = self.frames_per_block;
        mix_into(
            &mut state.accumulator,
            block.samples(),
            channels_in,
            self.channels,
            volume,
            frames_per_block,
        );
    }
}

/// Convert the accumulator to a published block, saturating to i16, and zero
/// it for the next cycle.
fn snapshot(accumulator: &mut [i32], channels: u16) -> PcmBlock {
    #[allow(clippy::cast_possible_truncation)]
    let samples: Vec<i16> =
        accumulator.iter().map(|&v| v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16).collect();
    accumulator.fill(0);
    PcmBlock::new(channels, samples)
}

#[allow(clippy::cast_possible_truncation)]
fn scaled(sample: i16, volume: f32) -> i32 {
    (f32::from(sample) * volume) as i32
}

/// Remap `samples` (with `channels_in` channels) onto the `channels_out`-wide
/// accumulator, applying `volume` before the sum.
///
/// - `Cin == Cout`: identity.
/// - `Cin < Cout`: cyclic replication, where output channel `i` draws input
///   channel `i mod Cin`.
/// - `Cin > Cout`: equal fold-down, where every output channel receives the sum of
///   the input channels scaled by `Cout/Cin`.
fn mix_into(
    accumulator: &mut [i32],
    samples: &[i16],
    channels_in: u16,
    channels_out: u16,
    volume: f32,
    frames_per_block: usize,
) {
    let cin = channels_in as usize;
    let cout = channels_out as usize;
    if cin == 0 {
        return;
    }
    let frames = (samples.len() / cin).min(frames_per_block);

    if channels_in == channels_out {
        for (acc, &sample) in accumulator.iter_mut().zip(samples.iter().take(frames * cout)) {
            *acc += scaled(sample, volume);
        }
    } else if channels_in < channels_out {
        for frame in 0..frames {
            for channel in 0..cout {
                let sample = samples[frame * cin + channel % cin];
                accumulator[frame * cout + channel] += scaled(sample, volume);
            }
        }
    } else {
        let fold = f32::from(channels_out) / f32::from(channels_in);
        for frame in 0..frames {
            let mut sum = 0.0f32;
            for channel in 0..cin {
                sum += f32::from(samples[frame * cin + channel]);
            }
            #[allow(clippy::cast_possible_truncation)]
            let folded = (sum * fold * volume) as i32;
            for channel in 0..cout {
                accumulator[frame * cout + channel] += folded;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_utils::{collect_blocks, test_config, TestSource};

    fn stereo_mixer(frames: usize) -> Mixer {
        Mixer::new(2, &test_config(frames)).unwrap()
    }

    #[test]
    fn test_stereo_mix_of_two_mono_sources() {
        // Scenario: A emits constant 10000 at volume 0.5, B emits constant
        // -6000 at volume 1.0; the first completed block is -1000 everywhere.
        let mixer = stereo_mixer(4);
        let source_a: Arc<dyn PcmProducer> = Arc::new(TestSource::new(1));
        let source_b: Arc<dyn PcmProducer> = Arc::new(TestSource::new(1));
        mixer.add_input(&source_a).unwrap();
        mixer.add_input(&source_b).unwrap();
        mixer.set_volume(&source_a, 0.5).unwrap();

        let received = collect_blocks(&mixer);

        let push = |source: &Arc<dyn PcmProducer>, value: i16| {
            source.pcm().publish(&PcmBlock::new(1, vec![value; 4]));
        };
        push(&source_a, 10_000);
        push(&source_b, -6_000);
        assert!(received.lock().unwrap().is_empty());

        // Second arrival from A closes the cycle.
        push(&source_a, 10_000);
        let blocks = received.lock().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].channels(), 2);
        assert_eq!(blocks[0].samples(), vec![-1_000i16; 8].as_slice());
    }

    #[test]
    fn test_mono_to_stereo_replication() {
        let mixer = stereo_mixer(4);
        let source: Arc<dyn PcmProducer> = Arc::new(TestSource::new(1));
        mixer.add_input(&source).unwrap();

        let received = collect_blocks(&mixer);
        source.pcm().publish(&PcmBlock::new(1, vec![1, 2, 3, 4]));
        source.pcm().publish(&PcmBlock::new(1, vec![9, 9, 9, 9]));

        let blocks = received.lock().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].samples(), &[1, 1, 2, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn test_identity_remap_is_volume_scaled_copy() {
        let mixer = stereo_mixer(2);
        let source: Arc<dyn PcmProducer> = Arc::new(TestSource::new(2));
        mixer.add_input(&source).unwrap();
        mixer.set_volume(&source, 2.0).unwrap();

        let received = collect_blocks(&mixer);
        source.pcm().publish(&PcmBlock::new(2, vec![100, -100, 200, -200]));
        source.pcm().publish(&PcmBlock::new(2, vec![0, 0, 0, 0]));

        let blocks = received.lock().unwrap();
        assert_eq!(blocks[0].samples(), &[200, -200, 400, -400]);
    }

    #[test]
    fn test_fold_down_to_mono() {
        let mixer = Mixer::new(1, &test_config(2)).unwrap();
        let source: Arc<dyn PcmProducer> = Arc::new(TestSource::new(2));
        mixer.add_input(&source).unwrap();

        let received = collect_blocks(&mixer);
        source.pcm().publish(&PcmBlock::new(2, vec![1000, 3000, -500, 500]));
        source.pcm().publish(&PcmBlock::new(2, vec![0, 0, 0, 0]));

        // Each frame folds to (sum × 1/2).
        let blocks = received.lock().unwrap();
        assert_eq!(blocks[0].samples(), &[2000, 0]);
    }

    #[test]
    fn test_volume_out_of_range_rejected() {
        let mixer = stereo_mixer(4);
        let source: Arc<dyn PcmProducer> = Arc::new(TestSource::new(1));
        mixer.add_input(&source).unwrap();

        assert!(matches!(
            mixer.set_volume(&source, 2.5),
            Err(AircastError::Validation(_))
        ));
        assert!(matches!(
            mixer.set_volume(&source, -0.1),
            Err(AircastError::Validation(_))
        ));
        // The failed set did not mutate the stored volume.
        assert_eq!(mixer.volume(&source), Some(1.0));
    }

    #[test]
    fn test_duplicate_input_rejected() {
        let mixer = stereo_mixer(4);
        let source: Arc<dyn PcmProducer> = Arc::new(TestSource::new(1));
        mixer.add_input(&source).unwrap();
        assert!(matches!(mixer.add_input(&source), Err(AircastError::Validation(_))));
        assert_eq!(mixer.input_count(), 1);
    }

    #[test]
    fn test_removed_input_no_longer_contributes() {
        let mixer = stereo_mixer(4);
        let source_a: Arc<dyn PcmProducer> = Arc::new(TestSource::new(1));
        let source_b: Arc<dyn PcmProducer> = Arc::new(TestSource::new(1));
        mixer.add_input(&source_a).unwrap();
        mixer.add_input(&source_b).unwrap();
        mixer.remove_input(&source_b).unwrap();

        let received = collect_blocks(&mixer);
        source_b.pcm().publish(&PcmBlock::new(1, vec![500; 4]));
        source_a.pcm().publish(&PcmBlock::new(1, vec![100; 4]));
        source_a.pcm().publish(&PcmBlock::new(1, vec![100; 4]));

        // Only A contributed; B's block was delivered nowhere.
        let blocks = received.lock().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].samples(), vec![100i16; 8].as_slice());
        assert!(!source_b.has_subscribers());
    }

    #[test]
    fn test_each_input_contributes_exactly_once_per_cycle() {
        let mixer = Mixer::new(1, &test_config(2)).unwrap();
        let source_a: Arc<dyn PcmProducer> = Arc::new(TestSource::new(1));
        let source_b: Arc<dyn PcmProducer> = Arc::new(TestSource::new(1));
        mixer.add_input(&source_a).unwrap();
        mixer.add_input(&source_b).unwrap();

        let received = collect_blocks(&mixer);
        for _ in 0..3 {
            source_a.pcm().publish(&PcmBlock::new(1, vec![1, 1]));
            source_b.pcm().publish(&PcmBlock::new(1, vec![10, 10]));
        }

        // Two completed cycles, each holding exactly one block from each input.
        let blocks = received.lock().unwrap();
        assert_eq!(blocks.len(), 2);
        for block in blocks.iter() {
            assert_eq!(block.samples(), &[11, 11]);
        }
    }

    #[test]
    fn test_saturation_on_snapshot() {
        let mixer = Mixer::new(1, &test_config(1)).unwrap();
        let source_a: Arc<dyn PcmProducer> = Arc::new(TestSource::new(1));
        let source_b: Arc<dyn PcmProducer> = Arc::new(TestSource::new(1));
        mixer.add_input(&source_a).unwrap();
        mixer.add_input(&source_b).unwrap();
        mixer.set_volume(&source_a, 2.0).unwrap();
        mixer.set_volume(&source_b, 2.0).unwrap();

        let received = collect_blocks(&mixer);
        source_a.pcm().publish(&PcmBlock::new(1, vec![i16::MAX]));
        source_b.pcm().publish(&PcmBlock::new(1, vec![i16::MAX]));
        source_a.pcm().publish(&PcmBlock::new(1, vec![0]));

        let blocks = received.lock().unwrap();
        assert_eq!(blocks[0].samples(), &[i16::MAX]);
    }
}
