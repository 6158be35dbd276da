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

//! Constants for the w1 sysfs interface, sensor validation and defaults.

/// sysfs names used by the w1 subsystem
pub mod sysfs {
    /// Default location of bus masters and slaves
    pub const DEVICES_DIR: &str = "/sys/bus/w1/devices/";

    /// Prefix of bus master directories (w1_bus_master1, ...)
    pub const BUS_MASTER_PREFIX: &str = "w1_bus_master";

    /// Family codes of supported thermometers: DS18B20, DS18S20, DS1822
    pub const THERMOMETER_PREFIXES: [&str; 3] = ["28-", "10-", "22-"];

    /// Per-sensor status file with CRC line and `t=` line
    pub const SLAVE_FILE: &str = "w1_slave";

    /// Per-sensor file filled by a bulk conversion
    pub const BULK_RESULT_FILE: &str = "temperature";

    /// Per-bus bulk read marker, write trigger token / read status
    pub const BULK_READ_FILE: &str = "therm_bulk_read";

    pub const BULK_TRIGGER_TOKEN: &str = "trigger";
}

/// Raw value validation (millidegrees Celsius)
pub mod raw {
    /// Value reported after power-on before any conversion happened
    pub const POWER_ON_VALUE: i64 = 85_000;

    /// Max distance from the previous reading at which POWER_ON_VALUE is still trusted
    pub const POWER_ON_MAX_DELTA: i64 = 10_000;

    /// Maximum possible value, reported by faulty sensors and some clones
    pub const CLONE_FAULT_VALUE: i64 = 127_937;

    pub const SCALE: f64 = 1000.0;

    /// w1_slave line markers
    pub const CRC_TAG: &str = "crc=";
    pub const CRC_OK: &str = "YES";
    pub const TEMPERATURE_TAG: &str = "t=";
}

/// Timing defaults
pub mod timing {
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;

    /// Ceiling for waiting on a bulk conversion
    pub const BULK_READ_TIMEOUT_MS: u64 = 2_000;

    pub const BULK_READ_POLL_MS: u64 = 100;

    /// How long the daemon waits for the poll thread to stop
    pub const STOP_TIMEOUT_MS: u64 = 5_000;
}

/// Registry defaults
pub mod registry {
    pub const DEVICE_ID: &str = "wb-w1";
    pub const DEVICE_TITLE: &str = "1-wire Thermometers";
    pub const CONTROL_TYPE: &str = "temperature";

    /// Error marker published for unreadable sensors
    pub const READ_ERROR_MARKER: &str = "r";

    pub const STATE_FILE: &str = "/var/lib/w1therm/registry.json";
}
