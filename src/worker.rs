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

//! Reconciliation of the tracked thermometers with the device registry
//!
//! One pass:
//! - rescan buses (all discovery first)
//! - read every present thermometer (all reads second)
//! - publish: create `New`, update `Connected`, remove `Disconnected`
//! - on the first successful pass, drop controls left over from a previous run
//!
//! Failures of single reads or registry calls are logged and published as an
//! error marker; they never abort the pass.
//! A removal the registry did not accept is retried on later passes, since
//! the manager forgets a disconnected thermometer after one pass.

use std::collections::BTreeSet;

use tracing::{debug, error, warn};

use crate::constants::registry::READ_ERROR_MARKER;
use crate::error::Result;
use crate::manager::Manager;
use crate::registry::{ControlArgs, DeviceRegistry, RegistryTx};
use crate::runner::PeriodicWorker;
use crate::thermometer::{PresenceStatus, Thermometer};

/// Counters of one reconciliation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub read_errors: usize,
    pub registry_errors: usize,
}

pub struct ReconciliationWorker<R: DeviceRegistry> {
    manager: Manager,
    registry: R,
    /// Ids of controls believed to exist in the registry
    published: BTreeSet<String>,
    /// Removals lost to a registry failure, retried on the next pass
    pending_removals: BTreeSet<String>,
    needs_cleanup: bool,
}

/// Format a temperature the way it is published
pub fn format_temperature(celsius: f64) -> String {
    format!("{:.3}", celsius)
}

impl<R: DeviceRegistry> ReconciliationWorker<R> {
    pub fn new(manager: Manager, registry: R) -> Self {
        Self {
            manager,
            registry,
            published: BTreeSet::new(),
            pending_removals: BTreeSet::new(),
            needs_cleanup: true,
        }
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn published(&self) -> impl Iterator<Item = &str> {
        self.published.iter().map(String::as_str)
    }

    pub fn pending_removals(&self) -> impl Iterator<Item = &str> {
        self.pending_removals.iter().map(String::as_str)
    }

    /// Run one pass. Returns the bus error if discovery failed; every published
    /// control has been marked unreadable in that case.
    pub fn reconcile(&mut self) -> Result<PassReport> {
        let mut report = PassReport::default();

        let thermometers = match self.manager.rescan_and_read() {
            Ok(list) => list,
            Err(e) => {
                self.mark_all_unreadable(&mut report);
                return Err(e);
            }
        };

        let readings: Vec<(Thermometer, Option<Result<f64>>)> = thermometers
            .into_iter()
            .map(|t| {
                let reading = match t.status() {
                    PresenceStatus::Disconnected => None,
                    _ => Some(self.manager.read_temperature(&t)),
                };
                (t, reading)
            })
            .collect();

        let mut tx = match self.registry.begin_tx() {
            Ok(tx) => tx,
            Err(e) => {
                // the manager forgets these on the next rescan
                for (thermometer, _) in &readings {
                    if thermometer.status() == PresenceStatus::Disconnected {
                        self.pending_removals.insert(thermometer.id().to_string());
                    }
                }
                return Err(e);
            }
        };

        // ids seen by this rescan are handled below by their status
        let retries: Vec<String> = std::mem::take(&mut self.pending_removals)
            .into_iter()
            .filter(|id| !readings.iter().any(|(t, _)| t.id() == id.as_str()))
            .collect();
        for id in &retries {
            self.remove(tx.as_mut(), id, &mut report);
        }

        for (thermometer, reading) in readings {
            let id = thermometer.id();
            match (thermometer.status(), reading) {
                (PresenceStatus::Disconnected, _) => {
                    self.remove(tx.as_mut(), id, &mut report);
                }
                (PresenceStatus::New, Some(reading)) => {
                    self.create(tx.as_mut(), id, reading, &mut report);
                }
                (_, Some(reading)) if !self.published.contains(id) => {
                    self.create(tx.as_mut(), id, reading, &mut report);
                }
                (_, Some(reading)) => {
                    update(tx.as_mut(), id, reading, &mut report);
                }
                (_, None) => {}
            }
        }

        if self.needs_cleanup {
            if let Err(e) = tx.remove_unused_controls() {
                error!(error = %e, "Failed to remove unused controls");
                report.registry_errors += 1;
            }
            self.needs_cleanup = false;
        }

        if let Err(e) = tx.commit() {
            error!(error = %e, "Failed to commit registry transaction");
            report.registry_errors += 1;
        }

        debug!(?report, "Reconciliation pass complete");
        Ok(report)
    }

    fn create(&mut self, tx: &mut dyn RegistryTx, id: &str, reading: Result<f64>, report: &mut PassReport) {
        let args = match reading {
            Ok(celsius) => ControlArgs::temperature(id).with_value(format_temperature(celsius)),
            Err(e) => {
                warn!(id = %id, error = %e, "Initial read failed");
                report.read_errors += 1;
                ControlArgs::temperature(id).with_error(READ_ERROR_MARKER)
            }
        };
        match tx.create_control(args) {
            Ok(()) => {
                self.published.insert(id.to_string());
                report.created += 1;
            }
            Err(e) => {
                error!(id = %id, error = %e, "Failed to create control");
                report.registry_errors += 1;
            }
        }
    }

    fn remove(&mut self, tx: &mut dyn RegistryTx, id: &str, report: &mut PassReport) {
        match tx.remove_control(id) {
            Ok(()) => {
                self.published.remove(id);
                self.pending_removals.remove(id);
                report.removed += 1;
            }
            Err(e) => {
                error!(id = %id, error = %e, "Failed to remove control, retrying next pass");
                self.pending_removals.insert(id.to_string());
                report.registry_errors += 1;
            }
        }
    }

    fn mark_all_unreadable(&mut self, report: &mut PassReport) {
        let mut tx = match self.registry.begin_tx() {
            Ok(tx) => tx,
            Err(e) => {
                error!(error = %e, "Failed to begin registry transaction");
                report.registry_errors += 1;
                return;
            }
        };
        for id in &self.published {
            if let Err(e) = tx.set_error(id, READ_ERROR_MARKER) {
                error!(id = %id, error = %e, "Failed to set error");
                report.registry_errors += 1;
            }
        }
        if let Err(e) = tx.commit() {
            error!(error = %e, "Failed to commit registry transaction");
            report.registry_errors += 1;
        }
    }
}

fn update(tx: &mut dyn RegistryTx, id: &str, reading: Result<f64>, report: &mut PassReport) {
    match reading {
        Ok(celsius) => match tx.set_value(id, &format_temperature(celsius)) {
            Ok(()) => {
                report.updated += 1;
                return;
            }
            Err(e) => {
                error!(id = %id, error = %e, "Failed to publish value");
                report.registry_errors += 1;
            }
        },
        Err(e) => {
            warn!(id = %id, error = %e, "Read failed");
            report.read_errors += 1;
        }
    }
    if let Err(e) = tx.set_error(id, READ_ERROR_MARKER) {
        error!(id = %id, error = %e, "Failed to set error");
        report.registry_errors += 1;
    }
}

impl<R: DeviceRegistry> PeriodicWorker for ReconciliationWorker<R> {
    fn run_iteration(&mut self) {
        if let Err(e) = self.reconcile() {
            if e.is_discovery() {
                warn!(error = %e, "Bus rescan failed, thermometers marked unreadable");
            } else {
                error!(error = %e, "Reconciliation pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::W1Error;
    use crate::registry::{LocalRegistry, MockDeviceRegistry, MockRegistryTx};
    use crate::test_utils::test_utils::*;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const ID: &str = "28-00000a013d97";

    /// Local registry whose transactions can be refused on demand
    struct FlakyRegistry {
        inner: LocalRegistry,
        refuse: Arc<AtomicBool>,
    }

    impl DeviceRegistry for FlakyRegistry {
        fn begin_tx(&self) -> Result<Box<dyn RegistryTx>> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(W1Error::registry("broker unreachable"));
            }
            self.inner.begin_tx()
        }
    }

    fn local_worker(tree: &FakeW1Tree) -> (ReconciliationWorker<LocalRegistry>, LocalRegistry) {
        let registry = LocalRegistry::in_memory("wb-w1", "1-wire Thermometers");
        (ReconciliationWorker::new(Manager::new(tree.root()), registry.clone()), registry)
    }

    #[test]
    fn test_format_temperature() {
        assert_eq!(format_temperature(26.312), "26.312");
        assert_eq!(format_temperature(-0.5), "-0.500");
        assert_eq!(format_temperature(85.0), "85.000");
    }

    #[test]
    fn test_create_then_update() {
        let tree = FakeW1Tree::new();
        let bus = tree.add_bus(1, false);
        tree.add_slave_sensor(&bus, ID, 26312);
        let (mut worker, registry) = local_worker(&tree);

        let report = worker.reconcile().unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(registry.control(ID).unwrap().value.as_deref(), Some("26.312"));

        tree.add_slave_sensor(&bus, ID, 27000);
        let report = worker.reconcile().unwrap();
        assert_eq!(report, PassReport { updated: 1, ..Default::default() });
        assert_eq!(registry.control(ID).unwrap().value.as_deref(), Some("27.000"));
    }

    #[test]
    fn test_initial_read_failure_creates_with_error() {
        let tree = FakeW1Tree::new();
        let bus = tree.add_bus(1, false);
        tree.write_slave(&bus, ID, &slave_content(26312, false));
        let (mut worker, registry) = local_worker(&tree);

        let report = worker.reconcile().unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.read_errors, 1);
        let control = registry.control(ID).unwrap();
        assert_eq!(control.value, None);
        assert_eq!(control.error.as_deref(), Some("r"));
    }

    #[test]
    fn test_read_failure_keeps_control_with_error() {
        let tree = FakeW1Tree::new();
        let bus = tree.add_bus(1, false);
        tree.add_slave_sensor(&bus, ID, 26312);
        let (mut worker, registry) = local_worker(&tree);
        worker.reconcile().unwrap();

        tree.add_slave_sensor(&bus, ID, 127937);
        let report = worker.reconcile().unwrap();
        assert_eq!(report.read_errors, 1);
        let control = registry.control(ID).unwrap();
        assert_eq!(control.value.as_deref(), Some("26.312"));
        assert_eq!(control.error.as_deref(), Some("r"));
    }

    #[test]
    fn test_disconnected_control_removed() {
        let tree = FakeW1Tree::new();
        let bus = tree.add_bus(1, false);
        tree.add_slave_sensor(&bus, ID, 26312);
        let (mut worker, registry) = local_worker(&tree);
        worker.reconcile().unwrap();

        tree.rename_entry(&bus, ID, "tmp-28-00000a013d97");
        let report = worker.reconcile().unwrap();
        assert_eq!(report.removed, 1);
        assert!(registry.control(ID).is_none());
        assert_eq!(worker.published().count(), 0);
    }

    #[test]
    fn test_discovery_failure_marks_published_unreadable() {
        let tree = FakeW1Tree::new();
        let bus = tree.add_bus(1, false);
        tree.add_slave_sensor(&bus, ID, 26312);
        let (mut worker, registry) = local_worker(&tree);
        worker.reconcile().unwrap();

        tree.remove_root();
        let err = worker.reconcile().unwrap_err();
        assert!(err.is_discovery());
        let control = registry.control(ID).unwrap();
        assert_eq!(control.error.as_deref(), Some("r"));
        assert_eq!(worker.published().collect::<Vec<_>>(), vec![ID]);
    }

    #[test]
    fn test_first_pass_drops_stale_controls_once() {
        let tree = FakeW1Tree::new();
        let bus = tree.add_bus(1, false);
        tree.add_slave_sensor(&bus, ID, 26312);
        let (mut worker, registry) = local_worker(&tree);

        let mut tx = registry.begin_tx().unwrap();
        tx.create_control(ControlArgs::temperature("28-stale")).unwrap();
        drop(tx);

        worker.reconcile().unwrap();
        assert_eq!(registry.control_ids(), vec![ID.to_string()]);

        let mut tx = registry.begin_tx().unwrap();
        tx.create_control(ControlArgs::temperature("28-later")).unwrap();
        drop(tx);
        worker.reconcile().unwrap();
        assert!(registry.control("28-later").is_some());
    }

    #[test]
    fn test_registry_contract_calls() {
        let tree = FakeW1Tree::new();
        let bus = tree.add_bus(1, false);
        tree.add_slave_sensor(&bus, ID, 26312);

        let mut registry = MockDeviceRegistry::new();
        registry.expect_begin_tx().times(1).returning(|| {
            let mut tx = MockRegistryTx::new();
            tx.expect_create_control()
                .withf(|args| {
                    args.id == ID
                        && args.kind == "temperature"
                        && args.readonly
                        && args.value.as_deref() == Some("26.312")
                        && args.error.is_none()
                })
                .times(1)
                .returning(|_| Ok(()));
            tx.expect_remove_unused_controls().times(1).returning(|| Ok(()));
            tx.expect_commit().times(1).returning(|| Ok(()));
            Ok(Box::new(tx) as Box<dyn RegistryTx>)
        });

        let mut worker = ReconciliationWorker::new(Manager::new(tree.root()), registry);
        assert_eq!(worker.reconcile().unwrap().created, 1);
    }

    #[test]
    fn test_failed_create_retried_next_pass() {
        let tree = FakeW1Tree::new();
        let bus = tree.add_bus(1, false);
        tree.add_slave_sensor(&bus, ID, 26312);

        let mut registry = MockDeviceRegistry::new();
        let mut pass = 0;
        registry.expect_begin_tx().times(2).returning(move || {
            pass += 1;
            let mut tx = MockRegistryTx::new();
            if pass == 1 {
                tx.expect_create_control()
                    .times(1)
                    .returning(|_| Err(W1Error::registry("broker gone")));
                tx.expect_remove_unused_controls().returning(|| Ok(()));
            } else {
                tx.expect_create_control()
                    .withf(|args| args.id == ID)
                    .times(1)
                    .returning(|_| Ok(()));
                tx.expect_set_value().never();
            }
            tx.expect_commit().returning(|| Ok(()));
            Ok(Box::new(tx) as Box<dyn RegistryTx>)
        });

        let mut worker = ReconciliationWorker::new(Manager::new(tree.root()), registry);
        assert_eq!(worker.reconcile().unwrap().registry_errors, 1);
        assert_eq!(worker.published().count(), 0);
        assert_eq!(worker.reconcile().unwrap().created, 1);
        assert_eq!(worker.published().count(), 1);
    }

    #[test]
    fn test_failed_set_value_falls_back_to_error_marker() {
        let tree = FakeW1Tree::new();
        let bus = tree.add_bus(1, false);
        tree.add_slave_sensor(&bus, ID, 26312);

        let mut registry = MockDeviceRegistry::new();
        let mut pass = 0;
        registry.expect_begin_tx().times(2).returning(move || {
            pass += 1;
            let mut tx = MockRegistryTx::new();
            if pass == 1 {
                tx.expect_create_control().returning(|_| Ok(()));
                tx.expect_remove_unused_controls().returning(|| Ok(()));
            } else {
                tx.expect_set_value()
                    .with(eq(ID), eq("26.312"))
                    .times(1)
                    .returning(|_, _| Err(W1Error::registry("timeout")));
                tx.expect_set_error()
                    .with(eq(ID), eq("r"))
                    .times(1)
                    .returning(|_, _| Ok(()));
            }
            tx.expect_commit().returning(|| Ok(()));
            Ok(Box::new(tx) as Box<dyn RegistryTx>)
        });

        let mut worker = ReconciliationWorker::new(Manager::new(tree.root()), registry);
        worker.reconcile().unwrap();
        let report = worker.reconcile().unwrap();
        assert_eq!(report.registry_errors, 1);
        assert_eq!(report.updated, 0);
    }

    #[test]
    fn test_begin_tx_failure_is_reported() {
        let tree = FakeW1Tree::new();
        tree.add_bus(1, false);

        let mut registry = MockDeviceRegistry::new();
        registry
            .expect_begin_tx()
            .times(2)
            .returning(|| Err(W1Error::registry("not connected")));

        let mut worker = ReconciliationWorker::new(Manager::new(tree.root()), registry);
        assert!(matches!(worker.reconcile(), Err(W1Error::Registry(_))));
        // logged, never propagated
        worker.run_iteration();
    }

    #[test]
    fn test_removal_retried_after_refused_transaction() {
        let tree = FakeW1Tree::new();
        let bus = tree.add_bus(1, false);
        tree.add_slave_sensor(&bus, ID, 26312);

        let local = LocalRegistry::in_memory("wb-w1", "1-wire Thermometers");
        let refuse = Arc::new(AtomicBool::new(false));
        let registry = FlakyRegistry { inner: local.clone(), refuse: refuse.clone() };
        let mut worker = ReconciliationWorker::new(Manager::new(tree.root()), registry);
        worker.reconcile().unwrap();

        refuse.store(true, Ordering::SeqCst);
        tree.rename_entry(&bus, ID, "tmp-28-00000a013d97");
        assert!(matches!(worker.reconcile(), Err(W1Error::Registry(_))));
        assert_eq!(worker.pending_removals().collect::<Vec<_>>(), vec![ID]);
        assert!(local.control(ID).is_some());

        // the manager has forgotten the sensor by now
        refuse.store(false, Ordering::SeqCst);
        let report = worker.reconcile().unwrap();
        assert!(worker.manager().get(ID).is_none());
        assert_eq!(report.removed, 1);
        assert!(local.control(ID).is_none());
        assert_eq!(worker.published().count(), 0);
        assert_eq!(worker.pending_removals().count(), 0);

        assert_eq!(worker.reconcile().unwrap(), PassReport::default());

        tree.rename_entry(&bus, "tmp-28-00000a013d97", ID);
        assert_eq!(worker.reconcile().unwrap().created, 1);
        assert_eq!(local.control(ID).unwrap().value.as_deref(), Some("26.312"));
    }

    #[test]
    fn test_failed_remove_control_retried_next_pass() {
        let tree = FakeW1Tree::new();
        let bus = tree.add_bus(1, false);
        tree.add_slave_sensor(&bus, ID, 26312);

        let mut registry = MockDeviceRegistry::new();
        let mut pass = 0;
        registry.expect_begin_tx().times(3).returning(move || {
            pass += 1;
            let mut tx = MockRegistryTx::new();
            match pass {
                1 => {
                    tx.expect_create_control().returning(|_| Ok(()));
                    tx.expect_remove_unused_controls().returning(|| Ok(()));
                }
                2 => {
                    tx.expect_remove_control()
                        .with(eq(ID))
                        .times(1)
                        .returning(|_| Err(W1Error::registry("timeout")));
                }
                _ => {
                    tx.expect_remove_control()
                        .with(eq(ID))
                        .times(1)
                        .returning(|_| Ok(()));
                }
            }
            tx.expect_commit().returning(|| Ok(()));
            Ok(Box::new(tx) as Box<dyn RegistryTx>)
        });

        let mut worker = ReconciliationWorker::new(Manager::new(tree.root()), registry);
        worker.reconcile().unwrap();

        tree.rename_entry(&bus, ID, "tmp-28-00000a013d97");
        let report = worker.reconcile().unwrap();
        assert_eq!(report.registry_errors, 1);
        assert_eq!(worker.published().collect::<Vec<_>>(), vec![ID]);
        assert_eq!(worker.pending_removals().collect::<Vec<_>>(), vec![ID]);

        let report = worker.reconcile().unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(worker.published().count(), 0);
        assert_eq!(worker.pending_removals().count(), 0);
    }
}
