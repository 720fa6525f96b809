// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Capability traits for graph nodes.
//!
//! A node may produce PCM, produce encoded bytes, or only consume; the
//! capability traits let the controller treat any producer uniformly behind
//! `Arc<dyn PcmProducer>` / `Arc<dyn EncodedProducer>`. Subscribe and
//! unsubscribe have provided implementations over the node's [`Fanout`];
//! nodes with activation side effects (the input device starts its capture
//! stream on first subscriber) override them.

use bytes::Bytes;

use crate::block::PcmBlock;
use crate::error::Result;
use crate::fabric::{Callback, Fanout, SubscriberId};
use crate::graph::NodeId;

/// Callback type for PCM subscribers.
pub type PcmCallback = Callback<PcmBlock>;

/// Callback type for encoded-byte subscribers.
pub type EncodedCallback = Callback<Bytes>;

/// A node that emits PCM blocks.
pub trait PcmProducer: Send + Sync {
    /// The node's graph identity.
    fn node_id(&self) -> NodeId;

    /// The channel count of every block this producer emits.
    fn channels(&self) -> u16;

    /// The producer's subscriber set.
    fn pcm(&self) -> &Fanout<PcmBlock>;

    /// Subscribe an anonymous observer.
    fn subscribe(&self, callback: PcmCallback) -> SubscriberId {
        self.pcm().subscribe(callback)
    }

    /// Subscribe a graph node, validating against cycles.
    fn subscribe_consumer(&self, consumer: NodeId, callback: PcmCallback) -> Result<SubscriberId> {
        self.pcm().subscribe_consumer(consumer, callback)
    }

    /// Remove a subscription; the callback is never invoked after return.
    fn unsubscribe(&self, id: SubscriberId) {
        self.pcm().unsubscribe(id);
    }

    /// Whether anything is currently listening to this producer.
    fn has_subscribers(&self) -> bool {
        self.pcm().has_subscribers()
    }
}

/// A node that emits encoded bytes (MP3 frames).
pub trait EncodedProducer: Send + Sync {
    /// The node's graph identity.
    fn node_id(&self) -> NodeId;

    /// The producer's subscriber set.
    fn encoded(&self) -> &Fanout<Bytes>;

    /// Subscribe an anonymous observer.
    fn subscribe(&self, callback: EncodedCallback) -> SubscriberId {
        self.encoded().subscribe(callback)
    }

    /// Remove a subscription; the callback is never invoked after return.
    fn unsubscribe(&self, id: SubscriberId) {
        self.encoded().unsubscribe(id);
    }

    /// Whether anything is currently listening to this producer.
    fn has_subscribers(&self) -> bool {
        self.encoded().has_subscribers()
    }
}
