// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Built-in audio nodes for the aircast routing graph.
//!
//! - [`audio`]: hardware devices, the file player, mixer, multiplex, meter
//!   and playlist
//! - [`codecs`]: the MP3 encoder
//! - [`sinks`]: Icecast, rolling MP3 files and browser streams

pub mod audio;
pub mod codecs;
pub mod sinks;

#[cfg(test)]
pub mod test_utils;

pub use audio::{
    CaptureBuffer, FilePlayer, InputDevice, Meter, Mixer, Multiplex, OutputDevice, PlaybackQueue,
    Playlist,
};
pub use codecs::Mp3Encoder;
pub use sinks::{BrowserStream, IcecastClient, RollingFile, RollingWriter};
