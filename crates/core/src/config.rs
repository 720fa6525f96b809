// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Process-wide studio configuration.

use serde::{Deserialize, Serialize};

use crate::error::{AircastError, Result};

/// Default frames per block.
pub const DEFAULT_FRAMES_PER_BLOCK: usize = 1024;

/// Default sample rate in Hz. The graph runs at a single, globally fixed rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default rolling-file rotation interval in seconds.
pub const DEFAULT_ROLL_INTERVAL_SECS: u64 = 3600;

/// Process-wide configuration shared by every node in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    /// Frames per block: the process-wide block size constant.
    pub frames_per_block: usize,

    /// Sample rate in Hz. Inputs are expected to already match this;
    /// the graph performs no sample-rate conversion.
    pub sample_rate: u32,

    /// Wall-clock seconds between rolling-file rotations.
    pub roll_interval_secs: u64,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            frames_per_block: DEFAULT_FRAMES_PER_BLOCK,
            sample_rate: DEFAULT_SAMPLE_RATE,
            roll_interval_secs: DEFAULT_ROLL_INTERVAL_SECS,
        }
    }
}

impl StudioConfig {
    /// Validate the configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.frames_per_block == 0 {
            return Err(AircastError::Validation(
                "frames_per_block must be greater than 0".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(AircastError::Validation("sample_rate must be greater than 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = StudioConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_per_block, DEFAULT_FRAMES_PER_BLOCK);
    }

    #[test]
    fn test_zero_block_size_refused() {
        let config = StudioConfig { frames_per_block: 0, ..StudioConfig::default() };
        assert!(config.validate().is_err());
    }
}
