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

use std::path::Path;

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::error::{Result, W1Error};

const JOURNAL_SOCKET: &str = "/run/systemd/journal/socket";

/// Where log records end up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Journald,
    Stderr,
}

impl LogTarget {
    pub fn describe(self) -> &'static str {
        match self {
            LogTarget::Journald => "systemd journal",
            LogTarget::Stderr => "stderr",
        }
    }
}

/// Install the global subscriber. Uses journald when its socket exists,
/// otherwise formatted output on stderr.
pub fn init_logging(filter: &str) -> Result<LogTarget> {
    let env_filter = EnvFilter::try_new(filter)
        .map_err(|e| W1Error::config(format!("invalid log filter {:?}: {}", filter, e)))?;

    if Path::new(JOURNAL_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(env_filter)
                    .try_init()
                    .map_err(|e| W1Error::config(e.to_string()))?;
                return Ok(LogTarget::Journald);
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stderr", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|e| W1Error::config(e.to_string()))?;
    Ok(LogTarget::Stderr)
}
