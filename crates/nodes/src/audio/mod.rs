// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! PCM-side nodes: devices, the file player, mixer, multiplex, meter and
//! playlist.

pub mod file;
mod hw;
pub mod input_device;
pub mod meter;
pub mod mixer;
pub mod multiplex;
pub mod output_device;
pub mod playlist;

pub use file::FilePlayer;
pub use input_device::{CaptureBuffer, InputDevice};
pub use meter::Meter;
pub use mixer::Mixer;
pub use multiplex::Multiplex;
pub use output_device::{OutputDevice, PlaybackQueue};
pub use playlist::Playlist;
