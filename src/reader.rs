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

//! Temperature acquisition and raw value validation
//!
//! Values reported by the kernel are in millidegrees Celsius. Two values are
//! suspicious:
//! - `85000` is what a DS18x20 returns before its first conversion. It is
//!   accepted only close to the previous good reading of the same file.
//! - `127937` is the maximum value and is returned by broken sensors and
//!   some clones. It is always rejected.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{trace, warn};

use crate::constants::raw;
use crate::error::{ReadFault, Result, W1Error};
use crate::thermometer::{AcquisitionMode, Thermometer};

/// Reads thermometers and remembers the last accepted raw value per device file
#[derive(Debug, Default)]
pub struct TemperatureReader {
    last_values: HashMap<PathBuf, i64>,
}

impl TemperatureReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a thermometer in degrees Celsius
    pub fn read(&mut self, thermometer: &Thermometer) -> Result<f64> {
        self.read_raw(thermometer.device_file(), thermometer.mode())
            .map(raw_to_celsius)
    }

    /// Read and validate the raw value of a device file
    pub fn read_raw(&mut self, path: &Path, mode: AcquisitionMode) -> Result<i64> {
        let content = fs::read_to_string(path).map_err(|e| W1Error::read(path, ReadFault::Io(e)))?;

        let value = match mode {
            AcquisitionMode::DirectRead => parse_slave_output(&content),
            AcquisitionMode::BulkRead => parse_bulk_value(&content),
        }
        .and_then(|value| validate_raw(value, self.last_values.get(path).copied()).map(|_| value));

        match value {
            Ok(value) => {
                trace!(path = %path.display(), raw = value, "Successful read");
                self.last_values.insert(path.to_path_buf(), value);
                Ok(value)
            }
            Err(fault) => {
                warn!(path = %path.display(), error = %fault, "Reading error");
                Err(W1Error::read(path, fault))
            }
        }
    }

    pub fn last_value(&self, path: &Path) -> Option<i64> {
        self.last_values.get(path).copied()
    }

    /// Drop the history of a device file, e.g. when its thermometer is forgotten
    pub fn forget(&mut self, path: &Path) {
        self.last_values.remove(path);
    }
}

/// Parse `w1_slave` content: a `crc=.. YES|NO` line and a `t=<raw>` line
pub fn parse_slave_output(content: &str) -> std::result::Result<i64, ReadFault> {
    let mut crc_ok: Option<bool> = None;
    let mut value: Option<&str> = None;

    for line in content.lines() {
        if let Some(pos) = line.find(raw::CRC_TAG) {
            crc_ok = Some(line[pos + raw::CRC_TAG.len()..].contains(raw::CRC_OK));
        } else if let Some(pos) = line.find(raw::TEMPERATURE_TAG) {
            value = Some(line[pos + raw::TEMPERATURE_TAG.len()..].trim());
        }
    }

    match crc_ok {
        None => return Err(ReadFault::MissingChecksum),
        Some(false) => return Err(ReadFault::ChecksumMismatch),
        Some(true) => {}
    }
    let value = value.ok_or(ReadFault::MissingValue)?;
    parse_raw(value)
}

/// Parse the single-line `temperature` file filled by a bulk conversion
pub fn parse_bulk_value(content: &str) -> std::result::Result<i64, ReadFault> {
    let value = content.trim();
    if value.is_empty() {
        return Err(ReadFault::MissingValue);
    }
    parse_raw(value)
}

fn parse_raw(value: &str) -> std::result::Result<i64, ReadFault> {
    value
        .parse::<i64>()
        .map_err(|_| ReadFault::Unparsable(value.to_string()))
}

/// Check a raw value against the sentinels, given the last accepted value of the same file
pub fn validate_raw(value: i64, last: Option<i64>) -> std::result::Result<(), ReadFault> {
    if value == raw::CLONE_FAULT_VALUE {
        return Err(ReadFault::CloneFault(value));
    }
    if value == raw::POWER_ON_VALUE {
        let settled = last.map_or(false, |l| (value - l).abs() <= raw::POWER_ON_MAX_DELTA);
        if !settled {
            return Err(ReadFault::PowerOnSentinel { raw: value, last });
        }
    }
    Ok(())
}

pub fn raw_to_celsius(value: i64) -> f64 {
    value as f64 / raw::SCALE
}
