// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The multiplexer: interleaves several narrow inputs into one wide output.
//!
//! Each input owns a contiguous slice `[start, start + Cin)` of the output
//! channels. Slices may not overlap and must fit inside the output width.
//! The tick protocol is the same second-arrival rule as the mixer's; inputs
//! that have not contributed this cycle leave their slice at zero.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aircast_core::{
    next_node_id, AircastError, Fanout, NodeId, PcmBlock, PcmProducer, Result, StudioConfig,
    SubscriberId,
};

struct InputState {
    start_channel: u16,
    channels: u16,
    seen: bool,
    subscription: SubscriberId,
}

struct MultiplexState {
    inputs: HashMap<NodeId, InputState>,
    accumulator: Vec<i16>,
}

struct MultiplexShared {
    id: NodeId,
    channels: u16,
    frames_per_block: usize,
    fanout: Fanout<PcmBlock>,
    state: Mutex<MultiplexState>,
}

/// A channel interleaver writing each input into its slice of a wide output.
pub struct Multiplex {
    shared: Arc<MultiplexShared>,
}

impl Multiplex {
    /// Create a multiplexer with `output_channels` output channels.
    pub fn new(output_channels: u16, config: &StudioConfig) -> Result<Self> {
        if output_channels == 0 {
            return Err(AircastError::Validation(
                "multiplexer must have at least one output channel".to_string(),
            ));
        }
        let id = next_node_id();
        let shared = Arc::new(MultiplexShared {
            id,
            channels: output_channels,
            frames_per_block: config.frames_per_block,
            fanout: Fanout::new(id),
            state: Mutex::new(MultiplexState {
                inputs: HashMap::new(),
                accumulator: vec![0i16; config.frames_per_block * output_channels as usize],
            }),
        });
        Ok(Self { shared })
    }

    /// Attach an input whose channels occupy `[start_channel, start_channel + Cin)`.
    pub fn add_input(&self, source: &Arc<dyn PcmProducer>, start_channel: u16) -> Result<()> {
        let source_id = source.node_id();
        let channels_in = source.channels();

        {
            let state = self.shared.lock_state();
            let end = u32::from(start_channel) + u32::from(channels_in);
            if end > u32::from(self.shared.channels) {
                return Err(AircastError::Validation(format!(
                    "channels [{start_channel}, {end}) do not fit in a {}-channel output",
                    self.shared.channels
                )));
            }
            #[allow(clippy::cast_possible_truncation)]
            let end = end as u16;
            for input in state.inputs.values() {
                let other_end = input.start_channel + input.channels;
                if start_channel < other_end && input.start_channel < end {
                    return Err(AircastError::Validation(format!(
                        "channels [{start_channel}, {end}) overlap an input already mapped to [{}, {other_end})",
                        input.start_channel
                    )));
                }
            }
            if state.inputs.contains_key(&source_id) {
                return Err(AircastError::Validation(format!(
                    "input {source_id} is already attached to this multiplexer"
                )));
            }
        }

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
                "input {source_id} is already attached to this multiplexer"
            )));
        }
        state.inputs.insert(
            source_id,
            InputState { start_channel, channels: channels_in, seen: false, subscription },
        );
        tracing::info!(
            multiplex = %self.shared.id,
            input = %source_id,
            start_channel,
            "multiplex input attached"
        );
        Ok(())
    }

    /// Detach an input.
    pub fn remove_input(&self, source: &Arc<dyn PcmProducer>) -> Result<()> {
        let source_id = source.node_id();
        let subscription = self
            .shared
            .lock_state()
            .inputs
            .get(&source_id)
            .map(|input| input.subscription)
            .ok_or_else(|| {
                AircastError::Validation(format!(
                    "input {source_id} is not attached to this multiplexer"
                ))
            })?;
        source.unsubscribe(subscription);
        self.shared.lock_state().inputs.remove(&source_id);
        Ok(())
    }

    /// Number of currently attached inputs.
    pub fn input_count(&self) -> usize {
        self.shared.lock_state().inputs.len()
    }
}

impl PcmProducer for Multiplex {
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

impl MultiplexShared {
    fn lock_state(&self) -> MutexGuard<'_, MultiplexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_block(&self, source: NodeId, block: &PcmBlock) {
        let completed = {
            let mut state = self.lock_state();
            let Some(input) = state.inputs.get_mut(&source) else {
                return;
            };
            if input.seen {
                let done = PcmBlock::new(self.channels, state.accumulator.clone());
                state.accumulator.fill(0);
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
        let (start, channels_in) = (input.start_channel as usize, input.channels as usize);
        let cout = self.channels as usize;
        let samples = block.samples();
        let frames = (samples.len() / channels_in.max(1)).min(self.frames_per_block);
        for frame in 0..frames {
            for channel in 0..channels_in {
                state.accumulator[frame * cout + start + channel] =
                    samples[frame * channels_in + channel];
            }
        }
    }
}
