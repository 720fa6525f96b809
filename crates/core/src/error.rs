// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for aircast.
//!
//! One enum covers the whole system so that node and controller code can
//! return a single `Result` type. Variants are categorized by what went wrong,
//! not where, to enable programmatic handling at the controller surface.

use thiserror::Error;

/// Main error type for aircast operations.
#[derive(Debug, Error)]
pub enum AircastError {
    /// The requested capture/playback device name is not present.
    #[error("no such audio device: {0}")]
    DeviceNotFound(String),

    /// The requested device has no capture channels.
    #[error("device has no capture channels: {0}")]
    NotAnInput(String),

    /// The requested device has no playback channels.
    #[error("device has no playback channels: {0}")]
    NotAnOutput(String),

    /// An entity is referenced by another node and cannot be deleted.
    #[error("entity in use: {0}")]
    InUse(String),

    /// Parameter validation failure.
    ///
    /// Examples:
    /// - Volume outside `[0.0, 2.0]`
    /// - Overlapping channel ranges in a multiplexer
    /// - Duplicate input attached to a mixer
    /// - A subscription that would create a cycle
    #[error("validation error: {0}")]
    Validation(String),

    /// A file cannot be opened or decoded.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// An Icecast endpoint refused the connection or the handshake failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Encoder configuration was rejected (bad channel count, bit rate...).
    #[error("encoder failed: {0}")]
    EncoderFailed(String),

    /// I/O error (file operations, sockets).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The external state store failed to load or save.
    #[error("persistence error: {0}")]
    Persist(String),
}

/// Convenience type alias for Results using [`AircastError`].
pub type Result<T> = std::result::Result<T, AircastError>;
