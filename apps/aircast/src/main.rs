// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The aircast binary: restore the persisted routing graph and run it, or
//! inspect the audio hardware.

mod cli;
mod logging;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use aircast_core::{AircastError, Result, StudioConfig};
use aircast_engine::{JsonStore, Studio, TrackId, TrackResolver};
use aircast_nodes::{InputDevice, OutputDevice};
use clap::Parser;

use crate::cli::{Cli, Command};

/// Resolves track ids through a JSON manifest mapping id to file path.
struct ManifestResolver {
    tracks: HashMap<TrackId, PathBuf>,
}

impl ManifestResolver {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let tracks: HashMap<TrackId, PathBuf> = serde_json::from_str(&raw)
            .map_err(|e| AircastError::Persist(format!("{}: {e}", path.display())))?;
        Ok(Self { tracks })
    }
}

impl TrackResolver for ManifestResolver {
    fn resolve(&self, track: TrackId) -> Result<PathBuf> {
        self.tracks
            .get(&track)
            .cloned()
            .ok_or_else(|| AircastError::Validation(format!("track {track} is not in the library")))
    }
}

/// Fallback when no library manifest is configured.
struct NoLibrary;

impl TrackResolver for NoLibrary {
    fn resolve(&self, track: TrackId) -> Result<PathBuf> {
        Err(AircastError::Validation(format!(
            "track {track} requested but no library manifest is configured"
        )))
    }
}

fn load_config(path: Option<&Path>) -> Result<StudioConfig> {
    let Some(path) = path else {
        return Ok(StudioConfig::default());
    };
    let raw = std::fs::read_to_string(path)?;
    let config: StudioConfig = serde_json::from_str(&raw)
        .map_err(|e| AircastError::Persist(format!("{}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let resolver: Arc<dyn TrackResolver> = match &cli.library {
        Some(path) => Arc::new(ManifestResolver::load(path)?),
        None => Arc::new(NoLibrary),
    };

    let store = Box::new(JsonStore::new(&cli.state));
    let studio = Studio::restore(config, store, resolver)?;

    tracing::info!(
        inputs = studio.list_inputs().len(),
        outputs = studio.list_outputs().len(),
        mixers = studio.list_mixers().len(),
        players = studio.list_players().len(),
        "studio running"
    );

    // The REST/WS surface drives the controller in a full deployment; the
    // bare binary just keeps the graph alive.
    loop {
        std::thread::sleep(Duration::from_secs(60));
        tracing::debug!("studio heartbeat");
    }
}

fn list_devices() {
    println!("Capture devices:");
    for name in InputDevice::devices() {
        println!("  {name}");
    }
    println!("Playback devices:");
    for name in OutputDevice::devices() {
        println!("  {name}");
    }
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Run => {
            if let Err(e) = run(&cli) {
                tracing::error!("fatal: {e}");
                std::process::exit(1);
            }
        },
        Command::Devices => list_devices(),
    }
}
