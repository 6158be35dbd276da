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

//! Thermometer lifecycle across rescans
//!
//! Every rescan runs the same fixed sequence:
//! 1. forget thermometers that were `Disconnected` after the previous rescan
//! 2. mark every remaining thermometer `Disconnected`
//! 3. mark every thermometer found on a bus `Connected`, create unknown ones as `New`
//! 4. wait for bulk conversions
//!
//! A thermometer that vanishes is therefore reported once as `Disconnected`
//! before it is forgotten, which gives the registry one pass to remove it.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::bus::BusScanner;
use crate::error::Result;
use crate::reader::TemperatureReader;
use crate::thermometer::{PresenceStatus, Thermometer};

#[derive(Debug)]
pub struct Manager {
    scanner: BusScanner,
    reader: TemperatureReader,
    devices: BTreeMap<String, Thermometer>,
}

impl Manager {
    /// `devices_dir` holds the bus master directories, usually /sys/bus/w1/devices/
    pub fn new(devices_dir: impl Into<PathBuf>) -> Self {
        Self::with_scanner(BusScanner::new(devices_dir))
    }

    pub fn with_scanner(scanner: BusScanner) -> Self {
        Self {
            scanner,
            reader: TemperatureReader::new(),
            devices: BTreeMap::new(),
        }
    }

    /// Rescan all buses, start bulk conversions and wait for them.
    ///
    /// Returns every tracked thermometer sorted by id, including those that
    /// disappeared during this rescan (`Disconnected`). If the devices tree
    /// cannot be listed the error is returned and the tracked set is left as it was.
    pub fn rescan_and_read(&mut self) -> Result<Vec<Thermometer>> {
        let scan = self.scanner.scan()?;

        self.purge_disconnected();
        for thermometer in self.devices.values_mut() {
            thermometer.mark_disconnected();
        }

        for found in scan.thermometers.iter() {
            match self.devices.entry(found.id.clone()) {
                Entry::Vacant(entry) => {
                    info!(id = %found.id, bus = %found.bus_dir.display(), mode = ?found.mode, "New thermometer");
                    entry.insert(Thermometer::new(found.id.clone(), found.bus_dir.clone(), found.mode));
                }
                Entry::Occupied(entry) => {
                    let thermometer = entry.into_mut();
                    if thermometer.status() != PresenceStatus::Disconnected {
                        warn!(id = %found.id, bus = %found.bus_dir.display(), "Thermometer reported by more than one bus, ignoring duplicate");
                        continue;
                    }
                    let old_file = thermometer.device_file().to_path_buf();
                    if !thermometer.found_again(&found.bus_dir, found.mode) {
                        info!(id = %found.id, bus = %found.bus_dir.display(), mode = ?found.mode, "Thermometer moved");
                        self.reader.forget(&old_file);
                    }
                }
            }
        }

        for thermometer in self.devices.values() {
            if thermometer.status() == PresenceStatus::Disconnected {
                info!(id = %thermometer.id(), "Thermometer disconnected");
            }
        }

        self.scanner.wait_for_bulk_conversion(&scan);

        debug!(
            buses = scan.masters.len(),
            thermometers = self.devices.len(),
            "Rescan complete"
        );
        Ok(self.devices.values().cloned().collect())
    }

    /// Read a thermometer returned by the last rescan, in degrees Celsius
    pub fn read_temperature(&mut self, thermometer: &Thermometer) -> Result<f64> {
        let celsius = self.reader.read(thermometer)?;
        let raw = self.reader.last_value(thermometer.device_file());
        if let (Some(tracked), Some(raw)) = (self.devices.get_mut(thermometer.id()), raw) {
            tracked.set_last_raw(raw);
        }
        Ok(celsius)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Thermometer> {
        self.devices.values()
    }

    pub fn get(&self, id: &str) -> Option<&Thermometer> {
        self.devices.get(id)
    }

    fn purge_disconnected(&mut self) {
        let reader = &mut self.reader;
        self.devices.retain(|id, thermometer| {
            if thermometer.status() != PresenceStatus::Disconnected {
                return true;
            }
            debug!(id = %id, "Forgetting thermometer");
            reader.forget(thermometer.device_file());
            false
        });
    }
}
