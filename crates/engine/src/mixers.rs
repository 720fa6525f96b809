// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The channel-oriented wrapper around a mixer node.
//!
//! The REST surface manages a mixer as numbered channels, each with an
//! optional source and a volume, rather than as raw inputs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aircast_core::{AircastError, PcmProducer, Result, StudioConfig};
use aircast_nodes::audio::mixer::VOLUME_RANGE;
use aircast_nodes::Mixer;

use crate::persist::MixerChannelRecord;

/// A graph source bound by id, as resolved by the controller.
#[derive(Clone)]
pub struct SourceBinding {
    pub id: String,
    pub producer: Arc<dyn PcmProducer>,
}

struct ChannelState {
    input: Option<SourceBinding>,
    volume: f32,
}

/// A mixer handled as a set of channels.
pub struct ChannelMixer {
    mixer: Arc<Mixer>,
    channels: Mutex<BTreeMap<String, ChannelState>>,
}

impl ChannelMixer {
    pub fn new(output_channels: u16, config: &StudioConfig) -> Result<Self> {
        Ok(Self {
            mixer: Arc::new(Mixer::new(output_channels, config)?),
            channels: Mutex::new(BTreeMap::new()),
        })
    }

    /// The underlying mixer node (also the producer other nodes attach to).
    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    pub fn output_channels(&self) -> u16 {
        self.mixer.channels()
    }

    fn lock_channels(&self) -> MutexGuard<'_, BTreeMap<String, ChannelState>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a channel with the given id (unbound, unit volume).
    pub fn add_channel(&self, channel_id: &str) {
        self.lock_channels()
            .insert(channel_id.to_string(), ChannelState { input: None, volume: 1.0 });
    }

    /// Remove a channel, detaching its source first.
    pub fn remove_channel(&self, channel_id: &str) -> Result<()> {
        self.set_channel_input(channel_id, None)?;
        self.lock_channels().remove(channel_id);
        Ok(())
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.lock_channels().keys().cloned().collect()
    }

    /// Bind a source to a channel (or unbind with `None`).
    pub fn set_channel_input(&self, channel_id: &str, source: Option<SourceBinding>) -> Result<()> {
        let mut channels = self.lock_channels();
        let channel = channels.get_mut(channel_id).ok_or_else(|| {
            AircastError::Validation(format!("no such mixer channel: {channel_id}"))
        })?;
        if channel.input.as_ref().map(|binding| binding.id.as_str())
            == source.as_ref().map(|binding| binding.id.as_str())
        {
            return Ok(());
        }
        if let Some(previous) = channel.input.take() {
            self.mixer.remove_input(&previous.producer)?;
        }
        if let Some(binding) = source {
            self.mixer.add_input(&binding.producer)?;
            self.mixer.set_volume(&binding.producer, channel.volume)?;
            channel.input = Some(binding);
        }
        Ok(())
    }

    /// Set a channel's volume; applies immediately when a source is bound.
    pub fn set_channel_volume(&self, channel_id: &str, volume: f32) -> Result<()> {
        if !VOLUME_RANGE.contains(&volume) || !volume.is_finite() {
            return Err(AircastError::Validation(format!(
                "volume {volume} is outside the range [0.0, 2.0]"
            )));
        }
        let mut channels = self.lock_channels();
        let channel = channels.get_mut(channel_id).ok_or_else(|| {
            AircastError::Validation(format!("no such mixer channel: {channel_id}"))
        })?;
        if let Some(binding) = &channel.input {
            self.mixer.set_volume(&binding.producer, volume)?;
        }
        channel.volume = volume;
        Ok(())
    }

    pub fn channel_volume(&self, channel_id: &str) -> Option<f32> {
        self.lock_channels().get(channel_id).map(|channel| channel.volume)
    }

    pub fn channel_input_id(&self, channel_id: &str) -> Option<String> {
        self.lock_channels()
            .get(channel_id)
            .and_then(|channel| channel.input.as_ref().map(|binding| binding.id.clone()))
    }

    /// Persistence records for this mixer's channels.
    pub fn channel_records(&self, mixer_id: &str) -> Vec<MixerChannelRecord> {
        self.lock_channels()
            .iter()
            .map(|(id, channel)| MixerChannelRecord {
                id: id.clone(),
                mixer_id: mixer_id.to_string(),
                input_id: channel
                    .input
                    .as_ref()
                    .map(|binding| binding.id.clone())
                    .unwrap_or_default(),
                volume: channel.volume,
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use aircast_core::next_node_id;
    use aircast_core::{Fanout, NodeId, PcmBlock};

    struct FakeSource {
        id: NodeId,
        fanout: Fanout<PcmBlock>,
    }

    impl FakeSource {
        fn new() -> Self {
            let id = next_node_id();
            Self { id, fanout: Fanout::new(id) }
        }
    }

    impl PcmProducer for FakeSource {
        fn node_id(&self) -> NodeId {
            self.id
        }
        fn channels(&self) -> u16 {
            1
        }
        fn pcm(&self) -> &Fanout<PcmBlock> {
            &self.fanout
        }
    }

    fn binding(id: &str) -> SourceBinding {
        SourceBinding { id: id.to_string(), producer: Arc::new(FakeSource::new()) }
    }

    #[test]
    fn test_channel_lifecycle() {
        let config = StudioConfig::default();
        let mixer = ChannelMixer::new(2, &config).unwrap();
        mixer.add_channel("c1");
        mixer.set_channel_volume("c1", 0.5).unwrap();
        mixer.set_channel_input("c1", Some(binding("src-1"))).unwrap();

        assert_eq!(mixer.channel_input_id("c1").as_deref(), Some("src-1"));
        assert_eq!(mixer.mixer().input_count(), 1);

        let records = mixer.channel_records("m1");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].input_id, "src-1");
        assert!((records[0].volume - 0.5).abs() < f32::EPSILON);

        mixer.remove_channel("c1").unwrap();
        assert_eq!(mixer.mixer().input_count(), 0);
        assert!(mixer.channel_ids().is_empty());
    }

    #[test]
    fn test_volume_validated_even_when_unbound() {
        let mixer = ChannelMixer::new(2, &StudioConfig::default()).unwrap();
        mixer.add_channel("c1");
        assert!(mixer.set_channel_volume("c1", 3.0).is_err());
        assert_eq!(mixer.channel_volume("c1"), Some(1.0));
    }

    #[test]
    fn test_rebind_swaps_mixer_input() {
        let mixer = ChannelMixer::new(2, &StudioConfig::default()).unwrap();
        mixer.add_channel("c1");
        let first = binding("src-1");
        let second = binding("src-2");
        mixer.set_channel_input("c1", Some(first.clone())).unwrap();
        mixer.set_channel_input("c1", Some(second)).unwrap();

        assert_eq!(mixer.mixer().input_count(), 1);
        assert!(!first.producer.has_subscribers());
        assert_eq!(mixer.channel_input_id("c1").as_deref(), Some("src-2"));
    }
}
