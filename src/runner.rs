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

//! Runs a worker periodically on a dedicated thread.
//!
//! Iterations never overlap and a stop request is only honoured between
//! iterations, so an iteration in progress always completes.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::error::{Result, W1Error};

pub trait PeriodicWorker: Send {
    fn run_iteration(&mut self);
}

struct RunnerShared {
    active: Mutex<bool>,
    wakeup: Condvar,
}

pub struct PeriodicRunner {
    name: String,
    shared: Arc<RunnerShared>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicRunner {
    /// Start calling `worker.run_iteration()` every `interval` on a thread called `name`
    pub fn start(
        mut worker: Box<dyn PeriodicWorker>,
        interval: Duration,
        name: &str,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(W1Error::InvalidConfig {
                field: "poll_interval_ms".into(),
                reason: "polling interval must be greater than zero".into(),
            });
        }

        let shared = Arc::new(RunnerShared {
            active: Mutex::new(true),
            wakeup: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                info!("{} started", thread_name);
                loop {
                    worker.run_iteration();

                    let mut active = thread_shared.active.lock();
                    if *active {
                        thread_shared
                            .wakeup
                            .wait_while_for(&mut active, |active| *active, interval);
                    }
                    if !*active {
                        break;
                    }
                }
                info!("{} stopped", thread_name);
            })?;

        Ok(Self {
            name: name.to_string(),
            shared,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Ask the thread to stop after the current iteration and wait for it
    pub fn stop(&mut self) {
        {
            let mut active = self.shared.active.lock();
            if !*active {
                return;
            }
            *active = false;
        }
        self.shared.wakeup.notify_one();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("{} panicked", self.name);
            }
        }
    }
}

impl Drop for PeriodicRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
