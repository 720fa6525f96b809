// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! cpal host helpers shared by the input and output device nodes.

use aircast_core::{AircastError, Result};
use cpal::traits::{DeviceTrait, HostTrait};

/// Find a capture device by exact name.
pub(crate) fn find_input_device(name: &str) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AircastError::DeviceNotFound(format!("{name}: {e}")))?;
    for device in devices {
        if device.name().is_ok_and(|candidate| candidate == name) {
            return Ok(device);
        }
    }
    Err(AircastError::DeviceNotFound(name.to_string()))
}

/// Find a playback device by exact name.
pub(crate) fn find_output_device(name: &str) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AircastError::DeviceNotFound(format!("{name}: {e}")))?;
    for device in devices {
        if device.name().is_ok_and(|candidate| candidate == name) {
            return Ok(device);
        }
    }
    Err(AircastError::DeviceNotFound(name.to_string()))
}

/// Names of every capture-capable device.
pub fn input_device_names() -> Vec<String> {
    let host = cpal::default_host();
    host.input_devices()
        .map(|devices| devices.filter_map(|device| device.name().ok()).collect())
        .unwrap_or_default()
}

/// Names of every playback-capable device.
pub fn output_device_names() -> Vec<String> {
    let host = cpal::default_host();
    host.output_devices()
        .map(|devices| devices.filter_map(|device| device.name().ok()).collect())
        .unwrap_or_default()
}
