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

//! Device registry contract and a local JSON-backed implementation
//!
//! Thermometers are published as controls of one virtual device. All calls of
//! a reconciliation pass go through one transaction obtained from
//! [`DeviceRegistry::begin_tx`].

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::registry;
use crate::error::{Result, W1Error};

/// Parameters of a control to create
#[derive(Debug, Clone, PartialEq)]
pub struct ControlArgs {
    pub id: String,
    pub kind: String,
    pub readonly: bool,
    pub value: Option<String>,
    pub error: Option<String>,
}

impl ControlArgs {
    /// Read-only temperature control without an initial value
    pub fn temperature(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: registry::CONTROL_TYPE.to_string(),
            readonly: true,
            value: None,
            error: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self.error = None;
        self
    }

    pub fn with_error(mut self, marker: impl Into<String>) -> Self {
        self.error = Some(marker.into());
        self
    }
}

/// Operations of one registry transaction.
///
/// `set_value` / `set_error` act on an existing control and fail if it is unknown.
#[cfg_attr(test, mockall::automock)]
pub trait RegistryTx {
    fn create_control(&mut self, args: ControlArgs) -> Result<()>;
    fn set_value(&mut self, id: &str, value: &str) -> Result<()>;
    fn set_error(&mut self, id: &str, marker: &str) -> Result<()>;
    fn remove_control(&mut self, id: &str) -> Result<()>;
    /// Remove every control not created or updated through this transaction
    fn remove_unused_controls(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
pub trait DeviceRegistry: Send {
    fn begin_tx(&self) -> Result<Box<dyn RegistryTx>>;
}

/// State of one published control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlState {
    #[serde(rename = "type")]
    pub kind: String,
    pub readonly: bool,
    /// Current value, not persisted
    #[serde(skip)]
    pub value: Option<String>,
    /// Current error marker, not persisted
    #[serde(skip)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryState {
    version: u32,
    device_id: String,
    device_title: String,
    controls: BTreeMap<String, ControlState>,
}

impl RegistryState {
    fn new(device_id: &str, device_title: &str) -> Self {
        Self {
            version: 1,
            device_id: device_id.to_string(),
            device_title: device_title.to_string(),
            controls: BTreeMap::new(),
        }
    }
}

/// In-process registry of one virtual device, optionally persisted to a JSON file.
///
/// Clones share the same state. Controls restored from the state file stay
/// in place until a transaction calls `remove_unused_controls`.
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    inner: Arc<Mutex<RegistryState>>,
    state_file: Option<PathBuf>,
}

impl LocalRegistry {
    pub fn in_memory(device_id: &str, device_title: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryState::new(device_id, device_title))),
            state_file: None,
        }
    }

    /// Open a registry persisted at `path`, restoring previously published controls
    pub fn open(path: impl Into<PathBuf>, device_id: &str, device_title: &str) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let contents = fs::read_to_string(&path)
                .map_err(|e| W1Error::FileRead { path: path.clone(), source: e })?;
            let mut state: RegistryState = serde_json::from_str(&contents)?;
            if state.device_id != device_id {
                warn!(
                    stored = %state.device_id,
                    device = %device_id,
                    "Registry state belongs to another device, starting empty"
                );
                state = RegistryState::new(device_id, device_title);
            } else {
                state.device_title = device_title.to_string();
                info!("Restored {} controls from {:?}", state.controls.len(), path);
            }
            state
        } else {
            debug!("No registry state at {:?}, starting empty", path);
            RegistryState::new(device_id, device_title)
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(state)),
            state_file: Some(path),
        })
    }

    pub fn device_id(&self) -> String {
        self.inner.lock().device_id.clone()
    }

    pub fn control(&self, id: &str) -> Option<ControlState> {
        self.inner.lock().controls.get(id).cloned()
    }

    pub fn control_ids(&self) -> Vec<String> {
        self.inner.lock().controls.keys().cloned().collect()
    }

    /// Write the state file atomically (temp file, then rename)
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&*self.inner.lock())?;
        write_atomic(path, json.as_bytes())?;
        debug!("Saved registry state to {:?}", path);
        Ok(())
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| W1Error::FileWrite { path: parent.to_path_buf(), source: e })?;
    }
    let temp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&temp_path)
        .map_err(|e| W1Error::FileWrite { path: temp_path.clone(), source: e })?;
    file.write_all(data)
        .map_err(|e| W1Error::FileWrite { path: temp_path.clone(), source: e })?;
    file.sync_all()
        .map_err(|e| W1Error::FileWrite { path: temp_path.clone(), source: e })?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|e| W1Error::FileWrite { path: path.to_path_buf(), source: e })?;
    Ok(())
}

impl DeviceRegistry for LocalRegistry {
    fn begin_tx(&self) -> Result<Box<dyn RegistryTx>> {
        Ok(Box::new(LocalTx {
            registry: self.clone(),
            touched: HashSet::new(),
            changed: false,
        }))
    }
}

struct LocalTx {
    registry: LocalRegistry,
    touched: HashSet<String>,
    /// Set when the list of controls changed and the state file must be rewritten
    changed: bool,
}

impl LocalTx {
    fn with_control<F>(&mut self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut ControlState),
    {
        let mut state = self.registry.inner.lock();
        let control = state
            .controls
            .get_mut(id)
            .ok_or_else(|| W1Error::registry(format!("unknown control {}", id)))?;
        f(control);
        self.touched.insert(id.to_string());
        Ok(())
    }
}

impl RegistryTx for LocalTx {
    fn create_control(&mut self, args: ControlArgs) -> Result<()> {
        if args.id.is_empty() {
            return Err(W1Error::registry("control id must not be empty"));
        }
        let control = ControlState {
            kind: args.kind,
            readonly: args.readonly,
            value: args.value,
            error: args.error,
        };
        let previous = self.registry.inner.lock().controls.insert(args.id.clone(), control);
        if previous.is_some() {
            debug!(control = %args.id, "Replaced existing control");
        }
        self.touched.insert(args.id);
        self.changed = true;
        Ok(())
    }

    fn set_value(&mut self, id: &str, value: &str) -> Result<()> {
        self.with_control(id, |c| {
            c.value = Some(value.to_string());
            c.error = None;
        })
    }

    fn set_error(&mut self, id: &str, marker: &str) -> Result<()> {
        self.with_control(id, |c| c.error = Some(marker.to_string()))
    }

    fn remove_control(&mut self, id: &str) -> Result<()> {
        let removed = self.registry.inner.lock().controls.remove(id);
        if removed.is_none() {
            return Err(W1Error::registry(format!("unknown control {}", id)));
        }
        self.touched.remove(id);
        self.changed = true;
        Ok(())
    }

    fn remove_unused_controls(&mut self) -> Result<()> {
        let mut state = self.registry.inner.lock();
        let before = state.controls.len();
        let touched = &self.touched;
        state.controls.retain(|id, _| touched.contains(id));
        let removed = before - state.controls.len();
        if removed > 0 {
            info!("Removed {} unused controls", removed);
            self.changed = true;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.changed {
            return Ok(());
        }
        self.registry.save()?;
        self.changed = false;
        Ok(())
    }
}
