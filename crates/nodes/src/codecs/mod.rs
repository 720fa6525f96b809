// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Codec nodes.

pub mod mp3;

pub use mp3::Mp3Encoder;
