// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The studio controller: registries of inputs, outputs, mixers and live
//! players, with every mutation round-tripped through the state store.
//!
//! Mutations are transactional with respect to the store: creations and
//! deletions persist the prospective snapshot before committing to memory,
//! bindings apply to the graph first and revert when the save fails. Either
//! way a failed save leaves the in-memory graph unchanged.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use aircast_core::{AircastError, PcmProducer, Result, StudioConfig};
use aircast_nodes::{
    BrowserStream, IcecastClient, InputDevice, Multiplex, OutputDevice, RollingFile,
};
use uuid::Uuid;

use crate::mixers::{ChannelMixer, SourceBinding};
use crate::outputs::{MultiplexedOutput, OutputNode};
use crate::persist::{
    FileParams, IcecastParams, InputKind, InputRecord, MixerRecord, MultiplexParams, OutputKind,
    OutputRecord, PlayerState, PlayerTrackRecord, StateStore, StudioState, TrackId, TrackMode,
};
use crate::players::{LivePlayer, TrackResolver};

struct InputEntry {
    id: String,
    display_name: String,
    device: Arc<InputDevice>,
}

struct OutputEntry {
    id: String,
    display_name: String,
    /// `None` for browser streams, which are not persisted.
    kind: Option<OutputKind>,
    parameters: String,
    input_id: Option<String>,
    node: OutputNode,
}

struct MixerEntry {
    id: String,
    display_name: String,
    mixer: Arc<ChannelMixer>,
}

#[derive(Default)]
struct Registries {
    inputs: Vec<InputEntry>,
    outputs: Vec<OutputEntry>,
    mixers: Vec<MixerEntry>,
    players: Vec<LivePlayer>,
}

struct StudioInner {
    config: StudioConfig,
    store: Box<dyn StateStore>,
    resolver: Arc<dyn TrackResolver>,
    registries: Mutex<Registries>,
}

/// Summary of a registered input.
#[derive(Debug, Clone)]
pub struct InputInfo {
    pub id: String,
    pub display_name: String,
    pub device_name: String,
    pub channels: u16,
}

/// Summary of a registered output.
#[derive(Debug, Clone)]
pub struct OutputInfo {
    pub id: String,
    pub display_name: String,
    pub kind: &'static str,
    pub input_id: Option<String>,
}

/// Summary of a registered mixer.
#[derive(Debug, Clone)]
pub struct MixerInfo {
    pub id: String,
    pub display_name: String,
    pub output_channels: u16,
    pub channel_ids: Vec<String>,
}

/// Summary of a registered live player.
#[derive(Debug, Clone)]
pub struct PlayerInfo {
    pub id: String,
    pub name: String,
    pub state: PlayerState,
    pub queued_tracks: usize,
}

/// The studio: the controller surface the REST/WS layer drives.
pub struct Studio {
    inner: Arc<StudioInner>,
}

impl Studio {
    /// Create an empty studio over the given store and track resolver.
    pub fn new(
        config: StudioConfig,
        store: Box<dyn StateStore>,
        resolver: Arc<dyn TrackResolver>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(StudioInner {
                config,
                store,
                resolver,
                registries: Mutex::new(Registries::default()),
            }),
        })
    }

    /// Recreate the persisted graph: inputs, live players, outputs (devices,
    /// then Icecast, then multiplex), mixers with channels, then a second
    /// pass re-binding each output to its persisted input.
    ///
    /// Nodes whose hardware or endpoint is gone are skipped with a warning so
    /// one missing device cannot take the whole studio down.
    pub fn restore(
        config: StudioConfig,
        store: Box<dyn StateStore>,
        resolver: Arc<dyn TrackResolver>,
    ) -> Result<Self> {
        let state = store.load()?;
        let studio = Self::new(config, store, resolver)?;
        let inner = &studio.inner;
        let mut regs = inner.lock();

        for record in &state.inputs {
            match record.kind {
                InputKind::Device => match InputDevice::new(&record.parameters, &inner.config) {
                    Ok(device) => regs.inputs.push(InputEntry {
                        id: record.id.clone(),
                        display_name: record.display_name.clone(),
                        device: Arc::new(device),
                    }),
                    Err(e) => {
                        tracing::warn!(input = %record.id, "skipping unrestorable input: {e}");
                    },
                },
            }
        }

        for record in &state.players {
            let mut tracks: Vec<&PlayerTrackRecord> =
                state.player_tracks.iter().filter(|t| t.player_id == record.id).collect();
            tracks.sort_by_key(|t| t.index);
            let tracks: Vec<(TrackId, TrackMode)> =
                tracks.into_iter().map(|t| (t.track_id, t.mode)).collect();
            let player =
                LivePlayer::restore(record, tracks, &inner.config, Arc::clone(&inner.resolver));
            Self::install_persist_hook(inner, &player);
            regs.players.push(player);
        }

        // Outputs, devices first: multiplexed outputs reference a parent
        // device, so creation order matters.
        for record in state.outputs.iter().filter(|r| r.kind == OutputKind::Device) {
            match OutputDevice::new(&record.parameters, &inner.config) {
                Ok(device) => regs.outputs.push(OutputEntry {
                    id: record.id.clone(),
                    display_name: record.display_name.clone(),
                    kind: Some(OutputKind::Device),
                    parameters: record.parameters.clone(),
                    input_id: None,
                    node: OutputNode::Device(Arc::new(device)),
                }),
                Err(e) => {
                    tracing::warn!(output = %record.id, "skipping unrestorable output: {e}");
                },
            }
        }
        for record in state.outputs.iter().filter(|r| r.kind == OutputKind::Icecast) {
            match Self::restore_icecast(&inner.config, record) {
                Ok(node) => regs.outputs.push(OutputEntry {
                    id: record.id.clone(),
                    display_name: record.display_name.clone(),
                    kind: Some(OutputKind::Icecast),
                    parameters: record.parameters.clone(),
                    input_id: None,
                    node,
                }),
                Err(e) => {
                    tracing::warn!(output = %record.id, "skipping unrestorable output: {e}");
                },
            }
        }
        for record in state.outputs.iter().filter(|r| r.kind == OutputKind::Multiplex) {
            match Self::restore_multiplex(&inner.config, &regs, record) {
                Ok(node) => regs.outputs.push(OutputEntry {
                    id: record.id.clone(),
                    display_name: record.display_name.clone(),
                    kind: Some(OutputKind::Multiplex),
                    parameters: record.parameters.clone(),
                    input_id: None,
                    node,
                }),
                Err(e) => {
                    tracing::warn!(output = %record.id, "skipping unrestorable output: {e}");
                },
            }
        }
        for record in state.outputs.iter().filter(|r| r.kind == OutputKind::File) {
            match Self::restore_file(&inner.config, record) {
                Ok(node) => regs.outputs.push(OutputEntry {
                    id: record.id.clone(),
                    display_name: record.display_name.clone(),
                    kind: Some(OutputKind::File),
                    parameters: record.parameters.clone(),
                    input_id: None,
                    node,
                }),
                Err(e) => {
                    tracing::warn!(output = %record.id, "skipping unrestorable output: {e}");
                },
            }
        }

        for record in &state.mixers {
            match ChannelMixer::new(record.output_channels, &inner.config) {
                Ok(mixer) => regs.mixers.push(MixerEntry {
                    id: record.id.clone(),
                    display_name: record.display_name.clone(),
                    mixer: Arc::new(mixer),
                }),
                Err(e) => {
                    tracing::warn!(mixer = %record.id, "skipping unrestorable mixer: {e}");
                },
            }
        }
        // Channels bind after every mixer exists; a channel may be fed by
        // another mixer.
        for channel in &state.mixer_channels {
            let Some(entry) = regs.mixers.iter().find(|m| m.id == channel.mixer_id) else {
                tracing::warn!(channel = %channel.id, "skipping channel of missing mixer");
                continue;
            };
            let mixer = Arc::clone(&entry.mixer);
            mixer.add_channel(&channel.id);
            if let Err(e) = mixer.set_channel_volume(&channel.id, channel.volume) {
                tracing::warn!(channel = %channel.id, "skipping persisted volume: {e}");
            }
            if !channel.input_id.is_empty() {
                match Self::resolve_source(&regs, &channel.input_id) {
                    Ok(binding) => {
                        if let Err(e) = mixer.set_channel_input(&channel.id, Some(binding)) {
                            tracing::warn!(channel = %channel.id, "failed to rebind channel: {e}");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(channel = %channel.id, "failed to resolve channel source: {e}");
                    },
                }
            }
        }

        // Second pass: re-bind each output to its persisted input. Bindings
        // can cross categories (a device fed by a mixer created later), hence
        // the separate pass.
        for record in &state.outputs {
            if record.input_id.is_empty() {
                continue;
            }
            let binding = match Self::resolve_source(&regs, &record.input_id) {
                Ok(binding) => binding,
                Err(e) => {
                    tracing::warn!(output = %record.id, "failed to resolve output source: {e}");
                    continue;
                },
            };
            if let Some(entry) = regs.outputs.iter_mut().find(|e| e.id == record.id) {
                match entry.node.set_input(Some(Arc::clone(&binding.producer))) {
                    Ok(()) => entry.input_id = Some(binding.id),
                    Err(e) => {
                        tracing::warn!(output = %record.id, "failed to rebind output: {e}");
                    },
                }
            }
        }

        drop(regs);
        tracing::info!("studio restored from persisted state");
        Ok(studio)
    }

    fn restore_icecast(config: &StudioConfig, record: &OutputRecord) -> Result<OutputNode> {
        let params: IcecastParams = serde_json::from_str(&record.parameters)
            .map_err(|e| AircastError::Persist(format!("icecast parameters: {e}")))?;
        let client = Arc::new(IcecastClient::new(params.quality, params.bit_rate, config)?);
        match client.connect(&params.endpoint, &params.password) {
            Ok(true) => {},
            Ok(false) => {
                tracing::warn!(endpoint = %params.endpoint, "icecast endpoint not accepting; output restored disconnected");
            },
            Err(e) => {
                tracing::warn!(endpoint = %params.endpoint, "icecast reconnect failed: {e}");
            },
        }
        Ok(OutputNode::Icecast(client))
    }

    fn restore_multiplex(
        config: &StudioConfig,
        regs: &Registries,
        record: &OutputRecord,
    ) -> Result<OutputNode> {
        let params: MultiplexParams = serde_json::from_str(&record.parameters)
            .map_err(|e| AircastError::Persist(format!("multiplex parameters: {e}")))?;
        let (multiplex, parent_id) =
            Self::shared_multiplex_for(config, regs, &params.parent)?;
        Ok(OutputNode::Multiplexed(Arc::new(MultiplexedOutput::new(
            &parent_id,
            multiplex,
            params.channels,
            params.offset,
        ))))
    }

    fn restore_file(config: &StudioConfig, record: &OutputRecord) -> Result<OutputNode> {
        let params: FileParams = serde_json::from_str(&record.parameters)
            .map_err(|e| AircastError::Persist(format!("file parameters: {e}")))?;
        let file = RollingFile::new(
            std::path::Path::new(&params.base_path),
            params.quality,
            params.bit_rate,
            config,
        )?;
        Ok(OutputNode::File(Arc::new(file)))
    }

    /// Find or create the multiplexer shared by the slices of one parent
    /// device output, attaching it to the parent on creation.
    fn shared_multiplex_for(
        config: &StudioConfig,
        regs: &Registries,
        parent_output_id: &str,
    ) -> Result<(Arc<Multiplex>, String)> {
        let parent = regs
            .outputs
            .iter()
            .find(|e| e.id == parent_output_id)
            .ok_or_else(|| {
                AircastError::Validation(format!("no such parent output: {parent_output_id}"))
            })?;
        let OutputNode::Device(parent_device) = &parent.node else {
            return Err(AircastError::Validation(
                "multiplexed outputs require a device output as parent".to_string(),
            ));
        };

        let existing = regs.outputs.iter().find_map(|e| match &e.node {
            OutputNode::Multiplexed(slice) if slice.parent_id() == parent_output_id => {
                Some(Arc::clone(slice.multiplex()))
            },
            _ => None,
        });
        let multiplex = match existing {
            Some(multiplex) => multiplex,
            None => {
                let multiplex = Arc::new(Multiplex::new(parent_device.channels(), config)?);
                parent_device
                    .set_input(Arc::clone(&multiplex) as Arc<dyn PcmProducer>)?;
                multiplex
            },
        };
        Ok((multiplex, parent_output_id.to_string()))
    }

    fn install_persist_hook(inner: &Arc<StudioInner>, player: &LivePlayer) {
        let weak: Weak<StudioInner> = Arc::downgrade(inner);
        player.set_persist_hook(Some(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.try_save_current();
            }
        })));
    }

    /// Persist the current graph.
    pub fn save(&self) -> Result<()> {
        let regs = self.inner.lock();
        self.inner.save_snapshot_of(&regs)
    }

    /// The current graph as persistence records.
    pub fn snapshot(&self) -> StudioState {
        StudioInner::snapshot(&self.inner.lock())
    }

    /// The process-wide configuration.
    pub fn config(&self) -> &StudioConfig {
        &self.inner.config
    }

    // ---- Inputs -----------------------------------------------------------

    /// Register a hardware capture device as a named input.
    pub fn add_device_input(&self, display_name: &str, device_name: &str) -> Result<String> {
        let device = Arc::new(InputDevice::new(device_name, &self.inner.config)?);
        let mut regs = self.inner.lock();
        let id = Uuid::new_v4().to_string();

        let mut state = StudioInner::snapshot(&regs);
        state.inputs.push(InputRecord {
            id: id.clone(),
            display_name: display_name.to_string(),
            kind: InputKind::Device,
            parameters: device_name.to_string(),
        });
        self.inner.store.save(&state)?;

        regs.inputs.push(InputEntry {
            id: id.clone(),
            display_name: display_name.to_string(),
            device,
        });
        Ok(id)
    }

    pub fn list_inputs(&self) -> Vec<InputInfo> {
        self.inner
            .lock()
            .inputs
            .iter()
            .map(|entry| InputInfo {
                id: entry.id.clone(),
                display_name: entry.display_name.clone(),
                device_name: entry.device.name().to_string(),
                channels: entry.device.channels(),
            })
            .collect()
    }

    pub fn rename_input(&self, input_id: &str, display_name: &str) -> Result<()> {
        let mut regs = self.inner.lock();
        let index = regs
            .inputs
            .iter()
            .position(|e| e.id == input_id)
            .ok_or_else(|| AircastError::Validation(format!("no such input: {input_id}")))?;

        let mut state = StudioInner::snapshot(&regs);
        if let Some(record) = state.inputs.iter_mut().find(|r| r.id == input_id) {
            record.display_name = display_name.to_string();
        }
        self.inner.store.save(&state)?;

        regs.inputs[index].display_name = display_name.to_string();
        Ok(())
    }

    /// Delete an input; refused while anything consumes it.
    pub fn delete_input(&self, input_id: &str) -> Result<()> {
        let mut regs = self.inner.lock();
        let index = regs
            .inputs
            .iter()
            .position(|e| e.id == input_id)
            .ok_or_else(|| AircastError::Validation(format!("no such input: {input_id}")))?;
        if regs.inputs[index].device.has_subscribers() {
            return Err(AircastError::InUse("input has current outputs".to_string()));
        }

        let mut state = StudioInner::snapshot(&regs);
        state.inputs.retain(|r| r.id != input_id);
        self.inner.store.save(&state)?;

        regs.inputs.remove(index);
        Ok(())
    }

    // ---- Outputs ----------------------------------------------------------

    /// Register a hardware playback device as a named output.
    pub fn add_device_output(&self, display_name: &str, device_name: &str) -> Result<String> {
        let device = Arc::new(OutputDevice::new(device_name, &self.inner.config)?);
        self.push_output(
            display_name,
            Some(OutputKind::Device),
            device_name.to_string(),
            OutputNode::Device(device),
        )
    }

    /// Register an Icecast output and try to connect it.
    pub fn add_icecast_output(
        &self,
        display_name: &str,
        endpoint: &str,
        password: &str,
        quality: u8,
        bit_rate: u32,
    ) -> Result<String> {
        let client = Arc::new(IcecastClient::new(quality, bit_rate, &self.inner.config)?);
        match client.connect(endpoint, password) {
            Ok(true) => {},
            Ok(false) => tracing::warn!(endpoint, "icecast endpoint not accepting the stream"),
            Err(e) => tracing::warn!(endpoint, "icecast connect failed: {e}"),
        }
        let parameters = serde_json::to_string(&IcecastParams {
            endpoint: endpoint.to_string(),
            password: password.to_string(),
            quality,
            bit_rate,
        })
        .map_err(|e| AircastError::Persist(e.to_string()))?;
        self.push_output(
            display_name,
            Some(OutputKind::Icecast),
            parameters,
            OutputNode::Icecast(client),
        )
    }

    /// Register a slice of a (possibly new) multiplexer on a device output.
    pub fn add_multiplex_output(
        &self,
        display_name: &str,
        parent_output_id: &str,
        channels: u16,
        offset: u16,
    ) -> Result<String> {
        let mut regs = self.inner.lock();
        let (multiplex, parent_id) =
            Self::shared_multiplex_for(&self.inner.config, &regs, parent_output_id)?;
        let node = OutputNode::Multiplexed(Arc::new(MultiplexedOutput::new(
            &parent_id, multiplex, channels, offset,
        )));
        let parameters = serde_json::to_string(&MultiplexParams {
            parent: parent_id,
            channels,
            offset,
        })
        .map_err(|e| AircastError::Persist(e.to_string()))?;
        Self::push_output_locked(
            &self.inner,
            &mut regs,
            display_name,
            Some(OutputKind::Multiplex),
            parameters,
            node,
        )
    }

    /// Register a rolling-file output.
    pub fn add_file_output(
        &self,
        display_name: &str,
        base_path: &str,
        quality: u8,
        bit_rate: u32,
    ) -> Result<String> {
        let file = RollingFile::new(
            std::path::Path::new(base_path),
            quality,
            bit_rate,
            &self.inner.config,
        )?;
        let parameters = serde_json::to_string(&FileParams {
            base_path: base_path.to_string(),
            quality,
            bit_rate,
        })
        .map_err(|e| AircastError::Persist(e.to_string()))?;
        self.push_output(
            display_name,
            Some(OutputKind::File),
            parameters,
            OutputNode::File(Arc::new(file)),
        )
    }

    /// Register a browser stream. Browser streams are not persisted.
    pub fn add_browser_output(
        &self,
        display_name: &str,
        quality: u8,
        bit_rate: u32,
    ) -> Result<String> {
        let stream = Arc::new(BrowserStream::new(quality, bit_rate, &self.inner.config)?);
        self.push_output(display_name, None, String::new(), OutputNode::Browser(stream))
    }

    fn push_output(
        &self,
        display_name: &str,
        kind: Option<OutputKind>,
        parameters: String,
        node: OutputNode,
    ) -> Result<String> {
        let mut regs = self.inner.lock();
        Self::push_output_locked(&self.inner, &mut regs, display_name, kind, parameters, node)
    }

    fn push_output_locked(
        inner: &StudioInner,
        regs: &mut Registries,
        display_name: &str,
        kind: Option<OutputKind>,
        parameters: String,
        node: OutputNode,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        if let Some(kind) = kind {
            let mut state = StudioInner::snapshot(regs);
            state.outputs.push(OutputRecord {
                id: id.clone(),
                display_name: display_name.to_string(),
                kind,
                input_id: String::new(),
                parameters: parameters.clone(),
            });
            inner.store.save(&state)?;
        }
        regs.outputs.push(OutputEntry {
            id: id.clone(),
            display_name: display_name.to_string(),
            kind,
            parameters,
            input_id: None,
            node,
        });
        Ok(id)
    }

    pub fn list_outputs(&self) -> Vec<OutputInfo> {
        self.inner
            .lock()
            .outputs
            .iter()
            .map(|entry| OutputInfo {
                id: entry.id.clone(),
                display_name: entry.display_name.clone(),
                kind: match &entry.node {
                    OutputNode::Device(_) => "device",
                    OutputNode::Icecast(_) => "icecast",
                    OutputNode::Multiplexed(_) => "multiplex",
                    OutputNode::File(_) => "file",
                    OutputNode::Browser(_) => "browser-stream",
                },
                input_id: entry.input_id.clone(),
            })
            .collect()
    }

    pub fn rename_output(&self, output_id: &str, display_name: &str) -> Result<()> {
        let mut regs = self.inner.lock();
        let index = regs
            .outputs
            .iter()
            .position(|e| e.id == output_id)
            .ok_or_else(|| AircastError::Validation(format!("no such output: {output_id}")))?;

        let mut state = StudioInner::snapshot(&regs);
        if let Some(record) = state.outputs.iter_mut().find(|r| r.id == output_id) {
            record.display_name = display_name.to_string();
        }
        self.inner.store.save(&state)?;

        regs.outputs[index].display_name = display_name.to_string();
        Ok(())
    }

    /// Bind a source to an output (or unbind with `None`).
    pub fn set_output_input(&self, output_id: &str, source_id: Option<&str>) -> Result<()> {
        let mut regs = self.inner.lock();
        let index = regs
            .outputs
            .iter()
            .position(|e| e.id == output_id)
            .ok_or_else(|| AircastError::Validation(format!("no such output: {output_id}")))?;

        let binding = match source_id {
            Some(id) if !id.is_empty() => Some(Self::resolve_source(&regs, id)?),
            _ => None,
        };
        let previous_id = regs.outputs[index].input_id.clone();

        regs.outputs[index]
            .node
            .set_input(binding.as_ref().map(|b| Arc::clone(&b.producer)))?;
        regs.outputs[index].input_id = binding.as_ref().map(|b| b.id.clone());

        if let Err(e) = self.inner.save_snapshot_of(&regs) {
            let previous =
                previous_id.as_ref().and_then(|id| Self::resolve_source(&regs, id).ok());
            let _ = regs.outputs[index].node.set_input(previous.map(|b| b.producer));
            regs.outputs[index].input_id = previous_id;
            return Err(e);
        }
        Ok(())
    }

    /// Delete an output; refused while a source is bound to it.
    pub fn delete_output(&self, output_id: &str) -> Result<()> {
        let mut regs = self.inner.lock();
        let index = regs
            .outputs
            .iter()
            .position(|e| e.id == output_id)
            .ok_or_else(|| AircastError::Validation(format!("no such output: {output_id}")))?;
        if regs.outputs[index].node.has_input() {
            return Err(AircastError::InUse("output in use".to_string()));
        }

        let mut state = StudioInner::snapshot(&regs);
        state.outputs.retain(|r| r.id != output_id);
        self.inner.store.save(&state)?;

        let entry = regs.outputs.remove(index);
        entry.node.close();

        // When the last slice of a multiplexer goes, detach the multiplexer
        // from its parent device.
        if let OutputNode::Multiplexed(slice) = &entry.node {
            let parent_id = slice.parent_id().to_string();
            let still_used = regs.outputs.iter().any(|e| {
                matches!(&e.node, OutputNode::Multiplexed(s) if s.parent_id() == parent_id)
            });
            if !still_used {
                if let Some(parent) = regs.outputs.iter().find(|e| e.id == parent_id) {
                    if let OutputNode::Device(device) = &parent.node {
                        device.clear_input();
                    }
                }
            }
        }
        Ok(())
    }

    // ---- Mixers -----------------------------------------------------------

    /// Create a mixer with the given output channel count.
    pub fn add_mixer(&self, display_name: &str, output_channels: u16) -> Result<String> {
        let mixer = Arc::new(ChannelMixer::new(output_channels, &self.inner.config)?);
        let mut regs = self.inner.lock();
        let id = Uuid::new_v4().to_string();

        let mut state = StudioInner::snapshot(&regs);
        state.mixers.push(MixerRecord {
            id: id.clone(),
            display_name: display_name.to_string(),
            output_channels,
        });
        self.inner.store.save(&state)?;

        regs.mixers.push(MixerEntry {
            id: id.clone(),
            display_name: display_name.to_string(),
            mixer,
        });
        Ok(id)
    }

    pub fn list_mixers(&self) -> Vec<MixerInfo> {
        self.inner
            .lock()
            .mixers
            .iter()
            .map(|entry| MixerInfo {
                id: entry.id.clone(),
                display_name: entry.display_name.clone(),
                output_channels: entry.mixer.output_channels(),
                channel_ids: entry.mixer.channel_ids(),
            })
            .collect()
    }

    pub fn rename_mixer(&self, mixer_id: &str, display_name: &str) -> Result<()> {
        let mut regs = self.inner.lock();
        let index = regs
            .mixers
            .iter()
            .position(|e| e.id == mixer_id)
            .ok_or_else(|| AircastError::Validation(format!("no such mixer: {mixer_id}")))?;

        let mut state = StudioInner::snapshot(&regs);
        if let Some(record) = state.mixers.iter_mut().find(|r| r.id == mixer_id) {
            record.display_name = display_name.to_string();
        }
        self.inner.store.save(&state)?;

        regs.mixers[index].display_name = display_name.to_string();
        Ok(())
    }

    /// Delete a mixer; refused while anything consumes its output.
    pub fn delete_mixer(&self, mixer_id: &str) -> Result<()> {
        let mut regs = self.inner.lock();
        let index = regs
            .mixers
            .iter()
            .position(|e| e.id == mixer_id)
            .ok_or_else(|| AircastError::Validation(format!("no such mixer: {mixer_id}")))?;
        if regs.mixers[index].mixer.mixer().has_subscribers() {
            return Err(AircastError::InUse("mixer output is in use".to_string()));
        }

        let mut state = StudioInner::snapshot(&regs);
        state.mixers.retain(|r| r.id != mixer_id);
        state.mixer_channels.retain(|r| r.mixer_id != mixer_id);
        self.inner.store.save(&state)?;

        let entry = regs.mixers.remove(index);
        for channel_id in entry.mixer.channel_ids() {
            if let Err(e) = entry.mixer.remove_channel(&channel_id) {
                tracing::warn!(mixer = %mixer_id, channel = %channel_id, "failed to detach channel: {e}");
            }
        }
        Ok(())
    }

    /// Add a channel to a mixer, returning the new channel id.
    pub fn add_mixer_channel(&self, mixer_id: &str) -> Result<String> {
        let mut regs = self.inner.lock();
        let index = regs
            .mixers
            .iter()
            .position(|e| e.id == mixer_id)
            .ok_or_else(|| AircastError::Validation(format!("no such mixer: {mixer_id}")))?;
        let channel_id = Uuid::new_v4().to_string();

        let mut state = StudioInner::snapshot(&regs);
        state.mixer_channels.push(crate::persist::MixerChannelRecord {
            id: channel_id.clone(),
            mixer_id: mixer_id.to_string(),
            input_id: String::new(),
            volume: 1.0,
        });
        self.inner.store.save(&state)?;

        regs.mixers[index].mixer.add_channel(&channel_id);
        Ok(channel_id)
    }

    /// Remove a channel from a mixer, detaching its source.
    pub fn remove_mixer_channel(&self, mixer_id: &str, channel_id: &str) -> Result<()> {
        let regs = self.inner.lock();
        let entry = regs
            .mixers
            .iter()
            .find(|e| e.id == mixer_id)
            .ok_or_else(|| AircastError::Validation(format!("no such mixer: {mixer_id}")))?;
        if !entry.mixer.channel_ids().iter().any(|id| id == channel_id) {
            return Err(AircastError::Validation(format!("no such mixer channel: {channel_id}")));
        }

        let mut state = StudioInner::snapshot(&regs);
        state.mixer_channels.retain(|r| r.id != channel_id);
        self.inner.store.save(&state)?;

        entry.mixer.remove_channel(channel_id)?;
        Ok(())
    }

    /// Bind a source to a mixer channel (or unbind with `None`).
    pub fn set_mixer_channel_input(
        &self,
        mixer_id: &str,
        channel_id: &str,
        source_id: Option<&str>,
    ) -> Result<()> {
        let regs = self.inner.lock();
        let entry = regs
            .mixers
            .iter()
            .find(|e| e.id == mixer_id)
            .ok_or_else(|| AircastError::Validation(format!("no such mixer: {mixer_id}")))?;

        let binding = match source_id {
            Some(id) if !id.is_empty() => Some(Self::resolve_source(&regs, id)?),
            _ => None,
        };
        let previous_id = entry.mixer.channel_input_id(channel_id);

        entry.mixer.set_channel_input(channel_id, binding)?;

        if let Err(e) = self.inner.save_snapshot_of(&regs) {
            let previous =
                previous_id.as_ref().and_then(|id| Self::resolve_source(&regs, id).ok());
            let _ = entry.mixer.set_channel_input(channel_id, previous);
            return Err(e);
        }
        Ok(())
    }

    /// Set a mixer channel's volume.
    pub fn set_mixer_channel_volume(
        &self,
        mixer_id: &str,
        channel_id: &str,
        volume: f32,
    ) -> Result<()> {
        let regs = self.inner.lock();
        let entry = regs
            .mixers
            .iter()
            .find(|e| e.id == mixer_id)
            .ok_or_else(|| AircastError::Validation(format!("no such mixer: {mixer_id}")))?;

        let previous = entry.mixer.channel_volume(channel_id);
        entry.mixer.set_channel_volume(channel_id, volume)?;

        if let Err(e) = self.inner.save_snapshot_of(&regs) {
            if let Some(previous) = previous {
                let _ = entry.mixer.set_channel_volume(channel_id, previous);
            }
            return Err(e);
        }
        Ok(())
    }

    // ---- Live players -----------------------------------------------------

    /// Create a paused live player.
    pub fn add_player(&self, name: &str) -> Result<String> {
        let mut regs = self.inner.lock();
        let id = Uuid::new_v4().to_string();
        let player =
            LivePlayer::new(&id, name, &self.inner.config, Arc::clone(&self.inner.resolver));
        Self::install_persist_hook(&self.inner, &player);

        let mut state = StudioInner::snapshot(&regs);
        state.players.push(player.record());
        self.inner.store.save(&state)?;

        regs.players.push(player);
        Ok(id)
    }

    pub fn list_players(&self) -> Vec<PlayerInfo> {
        self.inner
            .lock()
            .players
            .iter()
            .map(|player| PlayerInfo {
                id: player.id().to_string(),
                name: player.name(),
                state: player.state(),
                queued_tracks: player.tracks().len(),
            })
            .collect()
    }

    pub fn rename_player(&self, player_id: &str, name: &str) -> Result<()> {
        let regs = self.inner.lock();
        let player = Self::find_player(&regs, player_id)?;

        let mut state = StudioInner::snapshot(&regs);
        if let Some(record) = state.players.iter_mut().find(|r| r.id == player_id) {
            record.name = name.to_string();
        }
        self.inner.store.save(&state)?;

        player.set_name(name);
        Ok(())
    }

    /// Delete a player; refused while anything consumes its audio.
    pub fn delete_player(&self, player_id: &str) -> Result<()> {
        let mut regs = self.inner.lock();
        let index = regs
            .players
            .iter()
            .position(|p| p.id() == player_id)
            .ok_or_else(|| AircastError::Validation(format!("no such player: {player_id}")))?;
        if regs.players[index].playlist().has_subscribers() {
            return Err(AircastError::InUse("player has current outputs".to_string()));
        }

        let mut state = StudioInner::snapshot(&regs);
        state.players.retain(|r| r.id != player_id);
        state.player_tracks.retain(|r| r.player_id != player_id);
        self.inner.store.save(&state)?;

        regs.players.remove(index);
        Ok(())
    }

    /// Replace a player's queued track list.
    pub fn set_player_tracks(
        &self,
        player_id: &str,
        tracks: Vec<(TrackId, TrackMode)>,
    ) -> Result<()> {
        let regs = self.inner.lock();
        let player = Self::find_player(&regs, player_id)?;

        let mut state = StudioInner::snapshot(&regs);
        state.player_tracks.retain(|r| r.player_id != player_id);
        state.player_tracks.extend(tracks.iter().enumerate().map(|(index, (track, mode))| {
            #[allow(clippy::cast_possible_truncation)]
            let index = index as u32;
            PlayerTrackRecord {
                player_id: player_id.to_string(),
                track_id: *track,
                index,
                mode: *mode,
            }
        }));
        self.inner.store.save(&state)?;

        player.set_tracks(tracks);
        Ok(())
    }

    /// Start or pause a player.
    pub fn set_player_state(&self, player_id: &str, player_state: PlayerState) -> Result<()> {
        let regs = self.inner.lock();
        let player = Self::find_player(&regs, player_id)?;

        let mut state = StudioInner::snapshot(&regs);
        if let Some(record) = state.players.iter_mut().find(|r| r.id == player_id) {
            record.state = player_state;
        }
        self.inner.store.save(&state)?;

        player.set_state(player_state);
        Ok(())
    }

    // ---- Shared helpers ---------------------------------------------------

    fn find_player<'a>(regs: &'a Registries, player_id: &str) -> Result<&'a LivePlayer> {
        regs.players
            .iter()
            .find(|p| p.id() == player_id)
            .ok_or_else(|| AircastError::Validation(format!("no such player: {player_id}")))
    }

    /// Resolve a source id against inputs, mixers and live players.
    fn resolve_source(regs: &Registries, source_id: &str) -> Result<SourceBinding> {
        if let Some(entry) = regs.inputs.iter().find(|e| e.id == source_id) {
            return Ok(SourceBinding {
                id: entry.id.clone(),
                producer: Arc::clone(&entry.device) as Arc<dyn PcmProducer>,
            });
        }
        if let Some(entry) = regs.mixers.iter().find(|e| e.id == source_id) {
            return Ok(SourceBinding {
                id: entry.id.clone(),
                producer: Arc::clone(entry.mixer.mixer()) as Arc<dyn PcmProducer>,
            });
        }
        if let Some(player) = regs.players.iter().find(|p| p.id() == source_id) {
            return Ok(SourceBinding {
                id: player.id().to_string(),
                producer: Arc::clone(player.playlist()) as Arc<dyn PcmProducer>,
            });
        }
        Err(AircastError::Validation(format!("no such source: {source_id}")))
    }
}

impl StudioInner {
    fn lock(&self) -> MutexGuard<'_, Registries> {
        self.registries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(regs: &Registries) -> StudioState {
        StudioState {
            inputs: regs
                .inputs
                .iter()
                .map(|entry| InputRecord {
                    id: entry.id.clone(),
                    display_name: entry.display_name.clone(),
                    kind: InputKind::Device,
                    parameters: entry.device.name().to_string(),
                })
                .collect(),
            outputs: regs
                .outputs
                .iter()
                .filter_map(|entry| {
                    entry.kind.map(|kind| OutputRecord {
                        id: entry.id.clone(),
                        display_name: entry.display_name.clone(),
                        kind,
                        input_id: entry.input_id.clone().unwrap_or_default(),
                        parameters: entry.parameters.clone(),
                    })
                })
                .collect(),
            mixers: regs
                .mixers
                .iter()
                .map(|entry| MixerRecord {
                    id: entry.id.clone(),
                    display_name: entry.display_name.clone(),
                    output_channels: entry.mixer.output_channels(),
                })
                .collect(),
            mixer_channels: regs
                .mixers
                .iter()
                .flat_map(|entry| entry.mixer.channel_records(&entry.id))
                .collect(),
            players: regs.players.iter().map(LivePlayer::record).collect(),
            player_tracks: regs.players.iter().flat_map(LivePlayer::track_records).collect(),
        }
    }

    fn save_snapshot_of(&self, regs: &Registries) -> Result<()> {
        self.store.save(&Self::snapshot(regs))
    }

    /// Best-effort persist from node callbacks. Skips when the registries are
    /// busy: the next controller mutation persists the same state anyway.
    fn try_save_current(&self) {
        match self.registries.try_lock() {
            Ok(regs) => {
                if let Err(e) = self.save_snapshot_of(&regs) {
                    tracing::warn!("failed to persist player advancement: {e}");
                }
            },
            Err(_) => {
                tracing::debug!("registries busy; skipping best-effort persist");
            },
        }
    }
}
