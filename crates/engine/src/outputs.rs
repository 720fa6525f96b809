// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The tagged sum of output nodes, and the slice wrapper that lets one
//! multiplexer be managed as several independent outputs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aircast_core::{AircastError, PcmProducer, Result};
use aircast_nodes::{BrowserStream, IcecastClient, Multiplex, OutputDevice, RollingFile};

/// Wraps a slice of a shared multiplexer so a channel range on a wide device
/// can be bound and torn down like any other output.
pub struct MultiplexedOutput {
    parent_id: String,
    multiplex: Arc<Multiplex>,
    channels: u16,
    offset: u16,
    input: Mutex<Option<Arc<dyn PcmProducer>>>,
}

impl MultiplexedOutput {
    pub fn new(parent_id: &str, multiplex: Arc<Multiplex>, channels: u16, offset: u16) -> Self {
        Self {
            parent_id: parent_id.to_string(),
            multiplex,
            channels,
            offset,
            input: Mutex::new(None),
        }
    }

    /// The output id of the parent device output.
    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    /// The shared multiplexer this slice belongs to.
    pub fn multiplex(&self) -> &Arc<Multiplex> {
        &self.multiplex
    }

    /// Slice width in channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// First output channel of the slice.
    pub fn offset(&self) -> u16 {
        self.offset
    }

    fn lock_input(&self) -> MutexGuard<'_, Option<Arc<dyn PcmProducer>>> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn input_id(&self) -> Option<aircast_core::NodeId> {
        self.lock_input().as_ref().map(|source| source.node_id())
    }

    /// Bind a source onto this slice of the multiplexer.
    pub fn set_input(&self, source: Option<Arc<dyn PcmProducer>>) -> Result<()> {
        {
            let input = self.lock_input();
            if input.as_ref().map(|s| s.node_id()) == source.as_ref().map(|s| s.node_id()) {
                return Ok(());
            }
        }
        if let Some(previous) = self.lock_input().take() {
            self.multiplex.remove_input(&previous)?;
        }
        if let Some(source) = source {
            if source.channels() != self.channels {
                return Err(AircastError::Validation(format!(
                    "source has {} channels but this output manages {}",
                    source.channels(),
                    self.channels
                )));
            }
            self.multiplex.add_input(&source, self.offset)?;
            *self.lock_input() = Some(source);
        }
        Ok(())
    }
}

/// The audio-sink variants an output entry can hold.
pub enum OutputNode {
    Device(Arc<OutputDevice>),
    Icecast(Arc<IcecastClient>),
    Multiplexed(Arc<MultiplexedOutput>),
    File(Arc<RollingFile>),
    Browser(Arc<BrowserStream>),
}

impl OutputNode {
    /// Bind a source to this sink (or unbind with `None`).
    pub fn set_input(&self, source: Option<Arc<dyn PcmProducer>>) -> Result<()> {
        match self {
            Self::Device(device) => match source {
                Some(source) => device.set_input(source),
                None => {
                    device.clear_input();
                    Ok(())
                },
            },
            Self::Icecast(client) => client.set_input(source),
            Self::Multiplexed(slice) => slice.set_input(source),
            Self::File(file) => file.set_input(source),
            Self::Browser(stream) => stream.set_input(source),
        }
    }

    /// Whether a source is currently bound.
    pub fn has_input(&self) -> bool {
        match self {
            Self::Device(device) => device.input_id().is_some(),
            Self::Icecast(client) => client.input_id().is_some(),
            Self::Multiplexed(slice) => slice.input_id().is_some(),
            Self::File(file) => file.input_id().is_some(),
            Self::Browser(stream) => stream.input_id().is_some(),
        }
    }

    /// Release the sink's external resources.
    pub fn close(&self) {
        match self {
            Self::Device(device) => device.clear_input(),
            Self::Icecast(client) => client.close(),
            Self::Multiplexed(_) => {},
            Self::File(file) => file.close(),
            Self::Browser(stream) => stream.close(),
        }
    }
}
