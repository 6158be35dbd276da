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

//! w1therm - 1-Wire thermometer poller for Linux
//!
//! This library discovers DS18x20-family thermometers through the kernel's
//! w1 sysfs tree, reads and validates their temperatures, and keeps a
//! device registry in sync with the set of connected sensors.

pub mod bus;
pub mod config;
pub mod constants;
pub mod error;
pub mod logger;
pub mod manager;
pub mod reader;
pub mod registry;
pub mod runner;
pub mod thermometer;
pub mod worker;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use error::{ReadFault, Result, W1Error};
pub use manager::Manager;
pub use registry::{ControlArgs, DeviceRegistry, LocalRegistry, RegistryTx};
pub use runner::{PeriodicRunner, PeriodicWorker};
pub use thermometer::{AcquisitionMode, PresenceStatus, Thermometer};
pub use worker::{PassReport, ReconciliationWorker};
