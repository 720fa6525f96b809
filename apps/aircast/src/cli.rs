// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "aircast", version, about = "Live radio studio back end")]
pub struct Cli {
    /// Path of the persisted graph state.
    #[arg(long, default_value = "aircast-state.json")]
    pub state: PathBuf,

    /// Optional studio configuration file (JSON).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Optional track library manifest (JSON map of track id to file path).
    #[arg(long)]
    pub library: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Restore the persisted graph and run until interrupted.
    Run,
    /// List the available capture and playback devices.
    Devices,
}
