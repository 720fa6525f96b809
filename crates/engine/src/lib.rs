// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! aircast engine: the controller layer over the routing graph.
//!
//! - [`studio`]: the registries of inputs, outputs, mixers and live players
//! - [`persist`]: the persistence schema and the JSON state store
//! - [`mixers`]: the channel-oriented mixer wrapper
//! - [`players`]: live players and track resolution
//! - [`outputs`]: the output-node tagged sum and the multiplex slice wrapper
//!
//! Every mutation round-trips through the [`persist::StateStore`]; on startup
//! [`studio::Studio::restore`] replays the persisted state to recreate the
//! node and edge set.

pub mod mixers;
pub mod outputs;
pub mod persist;
pub mod players;
pub mod studio;

pub use mixers::{ChannelMixer, SourceBinding};
pub use outputs::{MultiplexedOutput, OutputNode};
pub use persist::{
    FileParams, IcecastParams, InputKind, InputRecord, JsonStore, MixerChannelRecord, MixerRecord,
    MultiplexParams, OutputKind, OutputRecord, PlayerRecord, PlayerState, PlayerTrackRecord,
    StateStore, StudioState, TrackId, TrackMode,
};
pub use players::{LivePlayer, TrackResolver};
pub use studio::{InputInfo, MixerInfo, OutputInfo, PlayerInfo, Studio};
