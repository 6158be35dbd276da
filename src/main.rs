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

//! w1thermd - publishes 1-Wire thermometers to the device registry

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use w1therm::config::{self, Config, Overrides};
use w1therm::constants::timing::STOP_TIMEOUT_MS;
use w1therm::logger;
use w1therm::{LocalRegistry, Manager, PeriodicRunner, ReconciliationWorker};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "w1thermd")]
#[command(version)]
#[command(about = "Publishes 1-Wire thermometers found in /sys/bus/w1 as registry controls")]
#[command(long_about = "Publishes 1-Wire thermometers found in /sys/bus/w1 as registry controls

ENVIRONMENT VARIABLES:
    W1THERM_LOG=debug      Log filter, overrides -d")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the w1 bus masters
    #[arg(long)]
    devices_dir: Option<PathBuf>,

    /// Polling interval in milliseconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// File the published controls are persisted to
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Debug level: negative for warnings only, positive for debug output
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    debug: i32,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let target = logger::init_logging(&config::log_filter(args.debug))?;
    info!("w1thermd {} starting, logging to {}", VERSION, target.describe());

    if unsafe { libc::geteuid() } != 0 {
        warn!("Not running as root, bulk conversions may fail to start");
    }

    let mut config = Config::load_or_default(args.config.as_deref())
        .context("failed to load configuration")?;
    config.apply(Overrides {
        devices_dir: args.devices_dir,
        poll_interval_ms: args.interval,
        state_file: args.state_file,
    });
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    let registry = LocalRegistry::open(&config.state_file, &config.device_id, &config.device_title)
        .with_context(|| format!("failed to open registry state {:?}", config.state_file))?;
    let manager = Manager::with_scanner(config.scanner());
    let worker = ReconciliationWorker::new(manager, registry);

    info!(
        devices_dir = %config.devices_dir.display(),
        interval_ms = config.poll_interval_ms,
        device = %config.device_id,
        "Polling thermometers"
    );
    let mut runner = PeriodicRunner::start(Box::new(worker), config.poll_interval(), "w1 thread")?;

    let (signal_tx, signal_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(());
    })
    .context("failed to install signal handler")?;

    // Err means the handler is gone, treat it as a stop request too
    let _ = signal_rx.recv();
    info!("Received SIGINT/SIGTERM, stopping");

    thread::Builder::new()
        .name("stop watchdog".into())
        .spawn(|| {
            thread::sleep(Duration::from_millis(STOP_TIMEOUT_MS));
            error!("w1 thread did not stop in {} ms, exiting", STOP_TIMEOUT_MS);
            std::process::exit(2);
        })
        .context("failed to start stop watchdog")?;

    runner.stop();
    info!("w1thermd stopped");
    Ok(())
}
