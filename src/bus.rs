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

//! Bus master discovery and bulk conversion for the w1 sysfs tree
//!
//! Layout handled here:
//! - `<devices>/w1_bus_masterN/` - one directory per bus controller
//! - `<devices>/w1_bus_masterN/therm_bulk_read` - present if the bus can convert
//!   all thermometers at once; write `trigger` to start, reads `-1` while busy
//! - `<devices>/w1_bus_masterN/<family>-<serial>/` - one directory per slave

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::constants::{sysfs, timing};
use crate::error::{Result, W1Error};
use crate::thermometer::{is_thermometer_name, AcquisitionMode};

/// One bus controller found during a scan. Not kept between scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMaster {
    pub dir: PathBuf,
    pub supports_bulk_read: bool,
}

impl BusMaster {
    pub fn bulk_read_file(&self) -> PathBuf {
        self.dir.join(sysfs::BULK_READ_FILE)
    }

    pub fn acquisition_mode(&self) -> AcquisitionMode {
        AcquisitionMode::for_bus(self.supports_bulk_read)
    }
}

/// A thermometer entry seen on a bus during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredThermometer {
    pub id: String,
    pub bus_dir: PathBuf,
    pub mode: AcquisitionMode,
}

/// Result of walking the devices tree once
#[derive(Debug, Default)]
pub struct BusScan {
    pub masters: Vec<BusMaster>,
    pub thermometers: Vec<DiscoveredThermometer>,
}

impl BusScan {
    pub fn bulk_masters(&self) -> impl Iterator<Item = &BusMaster> {
        self.masters.iter().filter(|m| m.supports_bulk_read)
    }
}

#[derive(Debug, Clone)]
pub struct BusScanner {
    devices_dir: PathBuf,
    bulk_timeout: Duration,
    bulk_poll: Duration,
}

impl BusScanner {
    pub fn new(devices_dir: impl Into<PathBuf>) -> Self {
        Self {
            devices_dir: devices_dir.into(),
            bulk_timeout: Duration::from_millis(timing::BULK_READ_TIMEOUT_MS),
            bulk_poll: Duration::from_millis(timing::BULK_READ_POLL_MS),
        }
    }

    pub fn with_bulk_timing(mut self, timeout: Duration, poll: Duration) -> Self {
        self.bulk_timeout = timeout;
        self.bulk_poll = poll;
        self
    }

    /// Walk the devices tree, starting a bulk conversion on every bus that supports it.
    ///
    /// Fails with `W1Error::Discovery` if the devices directory or a bus directory
    /// cannot be listed; nothing found so far is returned in that case.
    pub fn scan(&self) -> Result<BusScan> {
        let mut scan = BusScan::default();

        for name in list_dir(&self.devices_dir)? {
            if !name.starts_with(sysfs::BUS_MASTER_PREFIX) {
                continue;
            }
            let dir = self.devices_dir.join(&name);
            if !dir.is_dir() {
                continue;
            }

            let mut supports_bulk_read = dir.join(sysfs::BULK_READ_FILE).exists();
            if supports_bulk_read {
                if let Err(e) = trigger_bulk_conversion(&dir) {
                    warn!(bus = %dir.display(), error = %e, "Bulk conversion trigger failed, falling back to direct reads");
                    supports_bulk_read = false;
                }
            }
            debug!(bus = %dir.display(), bulk = supports_bulk_read, "Found bus master");
            scan.masters.push(BusMaster { dir, supports_bulk_read });
        }

        for master in &scan.masters {
            let mode = master.acquisition_mode();
            for name in list_dir(&master.dir)? {
                if !is_thermometer_name(&name) {
                    trace!(bus = %master.dir.display(), entry = %name, "Skipping non-thermometer entry");
                    continue;
                }
                scan.thermometers.push(DiscoveredThermometer {
                    id: name,
                    bus_dir: master.dir.clone(),
                    mode,
                });
            }
        }

        Ok(scan)
    }

    /// Block until every bulk conversion started by `scan` reports completion
    /// or the configured ceiling elapses. Returns false on timeout.
    pub fn wait_for_bulk_conversion(&self, scan: &BusScan) -> bool {
        let pending: Vec<&BusMaster> = scan.bulk_masters().collect();
        wait_for_conversion(&pending, self.bulk_timeout, self.bulk_poll)
    }
}

/// Sorted entry names of a directory
fn list_dir(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|source| W1Error::Discovery {
        path: dir.to_path_buf(),
        source,
    })?;
    sorted_names(dir, entries.map(|entry| entry.map(|e| e.file_name())))
}

/// A half-listed bus would report its missing slaves as disconnected, so any
/// unreadable entry fails the listing.
fn sorted_names<I>(dir: &Path, entries: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = io::Result<OsString>>,
{
    let mut names = Vec::new();
    for entry in entries {
        let name = entry.map_err(|source| {
            warn!(dir = %dir.display(), error = %source, "Directory entry unreadable");
            W1Error::Discovery { path: dir.to_path_buf(), source }
        })?;
        names.push(name.to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

pub fn trigger_bulk_conversion(bus_dir: &Path) -> io::Result<()> {
    fs::write(bus_dir.join(sysfs::BULK_READ_FILE), sysfs::BULK_TRIGGER_TOKEN)
}

/// Kernel reports `-1` while a conversion is running, `1` or `0` afterwards
pub fn is_conversion_complete(status: &str) -> bool {
    let status = status.trim_start();
    !status.is_empty() && !status.starts_with('-')
}

pub fn wait_for_conversion(masters: &[&BusMaster], timeout: Duration, poll: Duration) -> bool {
    let started = Instant::now();
    let mut pending: Vec<&BusMaster> = masters.to_vec();

    loop {
        pending.retain(|m| match fs::read_to_string(m.bulk_read_file()) {
            Ok(status) => !is_conversion_complete(&status),
            Err(e) => {
                warn!(bus = %m.dir.display(), error = %e, "Bulk read status unreadable");
                false
            }
        });

        if pending.is_empty() {
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Bulk conversion complete");
            return true;
        }
        if started.elapsed() >= timeout {
            for m in &pending {
                warn!(bus = %m.dir.display(), timeout_ms = timeout.as_millis() as u64, "Bulk conversion did not complete in time");
            }
            return false;
        }
        thread::sleep(poll);
    }
}
