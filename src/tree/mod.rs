//! The device tree: discovered devices plus the log of pending operations.

mod commit;
mod graph;
mod populate;

pub use self::graph::{depends_on, DeviceGraph, DeviceSource};

use crate::config::TreeConfig;
use crate::device::{Device, DeviceCategory};
use crate::errors::{DeviceOperationError, TreeInvariantError};
use crate::external::{DeviceEnumerator, FormatFactory, ReinitializePrompt, StorageBackend};
use crate::operations::Operation;
use std::collections::BTreeMap;

/// Decides whether a disk with an unusable disklabel may be reinitialized.
pub type ConfirmCallback = Box<dyn Fn(&ReinitializePrompt) -> bool>;

/// Models the block devices of a system and the changes pending against them.
pub struct DeviceTree {
    pub(crate) graph:               DeviceGraph,
    pub(crate) operations:          Vec<Operation>,
    pub(crate) config:              TreeConfig,
    pub(crate) enumerator:          Box<dyn DeviceEnumerator>,
    pub(crate) formats:             Box<dyn FormatFactory>,
    pub(crate) backend:             Box<dyn StorageBackend>,
    pub(crate) confirm:             Option<ConfirmCallback>,
    pub(crate) protected_dev_names: Vec<String>,
    pub(crate) populated:           bool,
}

impl DeviceTree {
    pub fn new(
        config: TreeConfig,
        enumerator: Box<dyn DeviceEnumerator>,
        formats: Box<dyn FormatFactory>,
        backend: Box<dyn StorageBackend>,
    ) -> Self {
        DeviceTree {
            graph: DeviceGraph::new(),
            operations: Vec::new(),
            config,
            enumerator,
            formats,
            backend,
            confirm: None,
            protected_dev_names: Vec::new(),
            populated: false,
        }
    }

    /// Asks `callback` before reinitializing a disk whose disklabel is unusable.
    pub fn with_confirmation<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ReinitializePrompt) -> bool + 'static,
    {
        self.confirm = Some(Box::new(callback));
        self
    }

    pub fn config(&self) -> &TreeConfig { &self.config }

    pub fn graph(&self) -> &DeviceGraph { &self.graph }

    pub fn is_populated(&self) -> bool { self.populated }

    /// Names of the devices that may not be reinitialized.
    pub fn protected_devices(&self) -> &[String] { &self.protected_dev_names }

    /// Disks that discovery skipped.
    pub fn ignored_disks(&self) -> &[String] { &self.config.ignored }

    pub fn devices(&self) -> Result<&[Device], TreeInvariantError> { self.graph.devices() }

    pub fn leaves(&self) -> Vec<&Device> { self.graph.leaves() }

    pub fn filesystems(&self) -> Vec<&Device> { self.graph.filesystems() }

    pub fn uuids(&self) -> BTreeMap<String, &Device> { self.graph.uuids() }

    pub fn labels(&self) -> BTreeMap<String, &Device> { self.graph.labels() }

    pub fn by_name(&self, name: &str) -> Option<&Device> {
        debug!("looking for device '{}'...", name);
        let found = self.graph.by_name(name);
        debug!("found {:?}", found.map(|d| d.to_string()));
        found
    }

    pub fn by_uuid(&self, uuid: &str) -> Option<&Device> { self.graph.by_uuid(uuid) }

    pub fn by_label(&self, label: &str) -> Option<&Device> { self.graph.by_label(label) }

    pub fn by_path(&self, path: &str) -> Option<&Device> { self.graph.by_path(path) }

    pub fn by_sysfs_path(&self, path: &str) -> Option<&Device> { self.graph.by_sysfs_path(path) }

    pub fn by_serial(&self, serial: &str) -> Vec<&Device> { self.graph.by_serial(serial) }

    pub fn by_type(&self, type_name: &str) -> Vec<&Device> { self.graph.by_type(type_name) }

    pub fn by_category(&self, category: DeviceCategory) -> Vec<&Device> {
        self.graph.by_category(category)
    }

    pub fn children(&self, device: &Device) -> Vec<&Device> { self.graph.children(device.id) }

    /// Every device that depends on `dep`, directly or indirectly.
    ///
    /// Devices built on logical partitions count as dependents of the
    /// extended partition that holds them.
    pub fn dependents_of(&self, dep: &Device) -> Vec<&Device> {
        let logicals: Vec<&Device> = if dep.is_extended() {
            self.graph.iter().filter(|d| d.is_logical() && d.disk() == dep.disk()).collect()
        } else {
            Vec::new()
        };

        self.graph
            .iter()
            .filter(|device| {
                depends_on(&self.graph, device, dep)
                    || logicals.iter().any(|logical| depends_on(&self.graph, device, logical))
            })
            .collect()
    }

    /// Takes every device offline, starting from the leaves.
    pub fn teardown_all(&self) {
        for leaf in self.graph.leaves() {
            let result = self
                .with_ancestors(leaf)
                .into_iter()
                .map(|device| self.backend.teardown(device))
                .collect::<Result<(), DeviceOperationError>>();

            if let Err(why) = result {
                info!("teardown of {} failed: {}", leaf.name, why);
            }
        }
    }

    /// Brings every device online, ancestors before the devices built on them.
    pub fn setup_all(&self) {
        for leaf in self.graph.leaves() {
            let result = self
                .with_ancestors(leaf)
                .into_iter()
                .rev()
                .map(|device| self.backend.setup(device))
                .collect::<Result<(), DeviceOperationError>>();

            if let Err(why) = result {
                info!("setup of {} failed: {}", leaf.name, why);
            }
        }
    }

    /// The device followed by its ancestors, nearest first.
    fn with_ancestors<'a>(&'a self, device: &'a Device) -> Vec<&'a Device> {
        let mut chain = vec![device];
        let mut position = 0;
        while position < chain.len() {
            let current: &'a Device = chain[position];
            chain.extend(current.parents.iter().filter_map(|&id| self.graph.get(id)));
            position += 1;
        }

        chain
    }
}
