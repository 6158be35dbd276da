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

//! A single 1-Wire thermometer as tracked across bus rescans.

use std::path::{Path, PathBuf};

use crate::constants::sysfs;

/// Presence of a thermometer relative to the last scan
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PresenceStatus {
    /// Seen for the first time during the last scan
    New,
    /// Seen during the last scan and the one before
    Connected,
    /// Not seen during the last scan, forgotten at the start of the next one
    Disconnected,
}

/// Which file a reading comes from
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// Full `w1_slave` protocol file, one conversion per read
    DirectRead,
    /// `temperature` file filled by the bus-wide bulk conversion
    BulkRead,
}

impl AcquisitionMode {
    pub fn for_bus(supports_bulk_read: bool) -> Self {
        if supports_bulk_read {
            Self::BulkRead
        } else {
            Self::DirectRead
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            Self::DirectRead => sysfs::SLAVE_FILE,
            Self::BulkRead => sysfs::BULK_RESULT_FILE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Thermometer {
    id: String,
    bus_dir: PathBuf,
    device_file: PathBuf,
    mode: AcquisitionMode,
    status: PresenceStatus,
    last_raw: Option<i64>,
}

impl Thermometer {
    /// `id` is the sysfs slave name (e.g. `28-00000a013d97`), `bus_dir` the bus master directory
    pub fn new(id: impl Into<String>, bus_dir: impl Into<PathBuf>, mode: AcquisitionMode) -> Self {
        let id = id.into();
        let bus_dir = bus_dir.into();
        let device_file = device_file_path(&bus_dir, &id, mode);
        Self {
            id,
            bus_dir,
            device_file,
            mode,
            status: PresenceStatus::New,
            last_raw: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bus_dir(&self) -> &Path {
        &self.bus_dir
    }

    /// File the reading is taken from, depends on bus and acquisition mode
    pub fn device_file(&self) -> &Path {
        &self.device_file
    }

    pub fn mode(&self) -> AcquisitionMode {
        self.mode
    }

    pub fn status(&self) -> PresenceStatus {
        self.status
    }

    pub fn last_raw(&self) -> Option<i64> {
        self.last_raw
    }

    pub(crate) fn set_last_raw(&mut self, raw: i64) {
        self.last_raw = Some(raw);
    }

    /// Tentatively mark as gone; a later `found_again` in the same scan overrides it
    pub fn mark_disconnected(&mut self) {
        self.status = PresenceStatus::Disconnected;
    }

    /// The thermometer showed up again during a scan, possibly behind another bus.
    ///
    /// Returns `false` when the hosting bus or acquisition mode changed.
    pub fn found_again(&mut self, bus_dir: &Path, mode: AcquisitionMode) -> bool {
        self.status = PresenceStatus::Connected;
        if self.bus_dir == bus_dir && self.mode == mode {
            return true;
        }
        self.bus_dir = bus_dir.to_path_buf();
        self.mode = mode;
        self.device_file = device_file_path(&self.bus_dir, &self.id, mode);
        self.last_raw = None;
        false
    }
}

fn device_file_path(bus_dir: &Path, id: &str, mode: AcquisitionMode) -> PathBuf {
    bus_dir.join(id).join(mode.file_name())
}

/// True if the directory entry names a supported thermometer family
pub fn is_thermometer_name(name: &str) -> bool {
    sysfs::THERMOMETER_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}
