/*
 * This file is part of w1therm.
 *
 * Copyright (C) 2025 w1therm contributors
 *
 * w1therm is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * w1therm is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with w1therm. If not, see <https://www.gnu.org/licenses/>.
 */

//! Unified error handling for w1therm
//!
//! One error type is shared by discovery, acquisition, the registry and
//! configuration so the reconciliation worker can classify failures at a
//! single boundary.

use std::io;
use std::path::PathBuf;

/// Result type alias using W1Error
pub type Result<T> = std::result::Result<T, W1Error>;

/// Why a present sensor produced no usable reading
#[derive(thiserror::Error, Debug)]
pub enum ReadFault {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("checksum reported as invalid")]
    ChecksumMismatch,

    #[error("checksum line missing")]
    MissingChecksum,

    #[error("temperature value missing")]
    MissingValue,

    #[error("unparsable value {0:?}")]
    Unparsable(String),

    #[error("power-on value {raw} too far from last reading {last:?}")]
    PowerOnSentinel { raw: i64, last: Option<i64> },

    #[error("maximum value {0} reported (faulty sensor or clone)")]
    CloneFault(i64),
}

#[derive(thiserror::Error, Debug)]
pub enum W1Error {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Bus and Sensor Errors
    // ============================================================================
    #[error("Failed to enumerate {path}: {source}")]
    Discovery {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to read temperature from {path}: {fault}")]
    ReadValidation {
        path: PathBuf,
        fault: ReadFault,
    },

    // ============================================================================
    // Registry Errors
    // ============================================================================
    #[error("Registry operation failed: {0}")]
    Registry(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl W1Error {
    /// Create a read validation error for the given device file
    pub fn read(path: impl Into<PathBuf>, fault: ReadFault) -> Self {
        Self::ReadValidation {
            path: path.into(),
            fault,
        }
    }

    /// Create a registry error from a string
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_discovery(&self) -> bool {
        matches!(self, Self::Discovery { .. })
    }
}
