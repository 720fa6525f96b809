// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared fixtures for node integration tests.

use std::path::Path;

/// Write a sine-wave WAV and return the exact frame count written.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::unwrap_used)]
pub fn write_sine_wav(path: &Path, seconds: f64, channels: u16, sample_rate: u32) -> u64 {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (seconds * f64::from(sample_rate)) as u64;
    for n in 0..frames {
        let t = n as f64 / f64::from(sample_rate);
        let value = (t * 440.0 * std::f64::consts::TAU).sin();
        let sample = (value * 8000.0) as i16;
        for _ in 0..channels {
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();
    frames
}
