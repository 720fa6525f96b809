// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Terminal sinks that move bytes out of the process: Icecast, rolling MP3
//! files and browser streams.

pub mod browser;
pub mod icecast;
pub mod rolling_file;

pub use browser::BrowserStream;
pub use icecast::IcecastClient;
pub use rolling_file::{RollingFile, RollingWriter};
