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

//! Daemon configuration: JSON file, then command line overrides

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bus::BusScanner;
use crate::constants::{registry, sysfs, timing};
use crate::error::{Result, W1Error};

/// Environment variable holding a tracing filter, takes precedence over `-d`
pub const LOG_ENV_VAR: &str = "W1THERM_LOG";

fn default_devices_dir() -> PathBuf { PathBuf::from(sysfs::DEVICES_DIR) }
fn default_poll_interval_ms() -> u64 { timing::DEFAULT_POLL_INTERVAL_MS }
fn default_bulk_read_timeout_ms() -> u64 { timing::BULK_READ_TIMEOUT_MS }
fn default_bulk_read_poll_ms() -> u64 { timing::BULK_READ_POLL_MS }
fn default_device_id() -> String { registry::DEVICE_ID.to_string() }
fn default_device_title() -> String { registry::DEVICE_TITLE.to_string() }
fn default_state_file() -> PathBuf { PathBuf::from(registry::STATE_FILE) }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_devices_dir")]
    pub devices_dir: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_bulk_read_timeout_ms")]
    pub bulk_read_timeout_ms: u64,
    #[serde(default = "default_bulk_read_poll_ms")]
    pub bulk_read_poll_ms: u64,
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_device_title")]
    pub device_title: String,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices_dir: default_devices_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            bulk_read_timeout_ms: default_bulk_read_timeout_ms(),
            bulk_read_poll_ms: default_bulk_read_poll_ms(),
            device_id: default_device_id(),
            device_title: default_device_title(),
            state_file: default_state_file(),
        }
    }
}

/// Values given on the command line; `None` keeps the configured value
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub devices_dir: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
    pub state_file: Option<PathBuf>,
}

impl Config {
    /// Load a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| W1Error::FileRead { path: path.to_path_buf(), source: e })?;
        let config: Config = serde_json::from_str(&data)?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Defaults, or the file at `path` when given
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(dir) = overrides.devices_dir {
            self.devices_dir = dir;
        }
        if let Some(ms) = overrides.poll_interval_ms {
            self.poll_interval_ms = ms;
        }
        if let Some(file) = overrides.state_file {
            self.state_file = file;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "polling interval must be greater than zero"));
        }
        if self.bulk_read_poll_ms == 0 {
            return Err(invalid("bulk_read_poll_ms", "bulk read poll step must be greater than zero"));
        }
        if self.device_id.trim().is_empty() {
            return Err(invalid("device_id", "device id must not be empty"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Scanner for `devices_dir` with the configured bulk conversion timing
    pub fn scanner(&self) -> BusScanner {
        BusScanner::new(&self.devices_dir).with_bulk_timing(
            Duration::from_millis(self.bulk_read_timeout_ms),
            Duration::from_millis(self.bulk_read_poll_ms),
        )
    }
}

fn invalid(field: &str, reason: &str) -> W1Error {
    W1Error::InvalidConfig { field: field.into(), reason: reason.into() }
}

/// Tracing filter: `W1THERM_LOG` if set, otherwise derived from the debug level
pub fn log_filter(debug_level: i32) -> String {
    match std::env::var(LOG_ENV_VAR) {
        Ok(filter) if !filter.trim().is_empty() => filter,
        _ => level_for_debug(debug_level).to_string(),
    }
}

fn level_for_debug(debug_level: i32) -> &'static str {
    match debug_level {
        d if d < 0 => "warn",
        0 => "info",
        _ => "debug",
    }
}
