// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The browser-stream output: an MP3 encoder whose byte stream is exposed
//! for an out-of-process HTTP layer to drain. The HTTP surface itself lives
//! outside the core; this node only owns the encoding side.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aircast_core::{EncodedProducer, NodeId, PcmProducer, Result, StudioConfig};

use crate::codecs::mp3::Mp3Encoder;

/// An MP3 stream for browser listeners.
pub struct BrowserStream {
    encoder: Arc<Mp3Encoder>,
    input: Mutex<Option<Arc<dyn PcmProducer>>>,
}

impl BrowserStream {
    pub fn new(quality: u8, bit_rate: u32, config: &StudioConfig) -> Result<Self> {
        Ok(Self {
            encoder: Arc::new(Mp3Encoder::new(quality, bit_rate, config.sample_rate)?),
            input: Mutex::new(None),
        })
    }

    /// The node identity of the wrapped encoder.
    pub fn node_id(&self) -> NodeId {
        self.encoder.node_id()
    }

    /// The encoded producer an HTTP layer subscribes to.
    pub fn encoder(&self) -> &Arc<Mp3Encoder> {
        &self.encoder
    }

    fn lock_input(&self) -> MutexGuard<'_, Option<Arc<dyn PcmProducer>>> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The producer currently streamed, if any.
    pub fn input_id(&self) -> Option<NodeId> {
        self.lock_input().as_ref().map(|source| source.node_id())
    }

    /// Select the audio source to stream (or clear with `None`).
    pub fn set_input(&self, source: Option<Arc<dyn PcmProducer>>) -> Result<()> {
        self.encoder.set_input(source.clone())?;
        *self.lock_input() = source;
        Ok(())
    }

    /// Stop streaming and flush the encoder.
    pub fn close(&self) {
        self.lock_input().take();
        if let Err(e) = self.encoder.close() {
            tracing::warn!("failed to close browser stream encoder: {e}");
        }
    }
}
