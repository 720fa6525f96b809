// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A rolling peak observer tapped on any PCM producer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use aircast_core::{NodeId, PcmBlock, PcmProducer, SubscriberId};

const HISTORY: usize = 100;

struct MeterState {
    peaks: [f32; HISTORY],
    head: usize,
}

struct CurrentInput {
    source: Arc<dyn PcmProducer>,
    subscription: SubscriberId,
}

/// A sound meter that listens to a producer and tracks rolling peaks.
///
/// Each block contributes `mean(|sample|) × 2` to a 100-slot ring;
/// [`Meter::level`] reads the most recent value, [`Meter::peak`] the maximum
/// over the ring.
pub struct Meter {
    state: Arc<Mutex<MeterState>>,
    input: Mutex<Option<CurrentInput>>,
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

impl Meter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MeterState { peaks: [0.0; HISTORY], head: 0 })),
            input: Mutex::new(None),
        }
    }

    fn lock_input(&self) -> MutexGuard<'_, Option<CurrentInput>> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The producer currently tapped, if any.
    pub fn input_id(&self) -> Option<NodeId> {
        self.lock_input().as_ref().map(|current| current.source.node_id())
    }

    /// Re-wire the meter onto a new source, or clear it with `None`.
    pub fn set_input(&self, source: Option<Arc<dyn PcmProducer>>) {
        let mut input = self.lock_input();
        if input.as_ref().map(|current| current.source.node_id()) == source.as_ref().map(|s| s.node_id())
        {
            return;
        }
        if let Some(previous) = input.take() {
            previous.source.unsubscribe(previous.subscription);
        }
        if let Some(source) = source {
            let state: Weak<Mutex<MeterState>> = Arc::downgrade(&self.state);
            let subscription = source.subscribe(Box::new(move |block: &PcmBlock| {
                if let Some(state) = state.upgrade() {
                    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    let next = (state.head + 1) % HISTORY;
                    state.peaks[next] = block_peak(block);
                    state.head = next;
                }
            }));
            *input = Some(CurrentInput { source, subscription });
        }
    }

    /// The peak of the last block processed.
    pub fn level(&self) -> f32 {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.peaks[state.head]
    }

    /// The maximum peak over the rolling window.
    pub fn peak(&self) -> f32 {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.peaks.iter().fold(0.0f32, |max, &value| max.max(value))
    }
}

#[allow(clippy::cast_precision_loss)]
fn block_peak(block: &PcmBlock) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum: f64 = block.samples().iter().map(|&s| f64::from(s).abs()).sum();
    (sum / block.len() as f64 * 2.0) as f32
}
