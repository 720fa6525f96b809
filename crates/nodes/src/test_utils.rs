// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Test utilities shared by node tests.

use std::sync::{Arc, Mutex};

use aircast_core::{
    next_node_id, EncodedProducer, Fanout, NodeId, PcmBlock, PcmProducer, StudioConfig,
};
use bytes::Bytes;

/// A studio configuration with a small block size for tests.
pub fn test_config(frames_per_block: usize) -> StudioConfig {
    StudioConfig { frames_per_block, ..StudioConfig::default() }
}

/// A scriptable PCM producer: tests publish blocks by hand.
pub struct TestSource {
    id: NodeId,
    channels: u16,
    fanout: Fanout<PcmBlock>,
}

impl TestSource {
    pub fn new(channels: u16) -> Self {
        let id = next_node_id();
        Self { id, channels, fanout: Fanout::new(id) }
    }

    /// Publish one block of interleaved samples to all subscribers.
    pub fn push(&self, samples: Vec<i16>) {
        self.fanout.publish(&PcmBlock::new(self.channels, samples));
    }
}

impl PcmProducer for TestSource {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn pcm(&self) -> &Fanout<PcmBlock> {
        &self.fanout
    }
}

/// Subscribe a collecting sink to a PCM producer and return its storage.
#[allow(clippy::unwrap_used)]
pub fn collect_blocks<P: PcmProducer + ?Sized>(producer: &P) -> Arc<Mutex<Vec<PcmBlock>>> {
    let blocks = Arc::new(Mutex::new(Vec::new()));
    let storage = blocks.clone();
    producer.subscribe(Box::new(move |block: &PcmBlock| {
        storage.lock().unwrap().push(block.clone());
    }));
    blocks
}

/// Subscribe a collecting sink to an encoded producer and return its storage.
#[allow(clippy::unwrap_used)]
pub fn collect_bytes<P: EncodedProducer + ?Sized>(producer: &P) -> Arc<Mutex<Vec<Bytes>>> {
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let storage = chunks.clone();
    producer.subscribe(Box::new(move |bytes: &Bytes| {
        storage.lock().unwrap().push(bytes.clone());
    }));
    chunks
}
