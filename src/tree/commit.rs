use super::DeviceTree;
use crate::errors::{DeviceTreeError, ExecuteError};
use crate::operations::{prune_operations, sort_operations, Operation, OperationKind, OperationTarget};

impl DeviceTree {
    /// Reduces the operation log to a safe sequence and executes it.
    ///
    /// With `dry_run` set, the log is pruned and ordered but nothing is
    /// executed, and the operations remain registered.
    pub fn commit(&mut self, dry_run: bool) -> Result<(), DeviceTreeError> {
        debug!("resetting disklabels...");
        self.reset_tables();
        self.pre_commit_fixup();

        let extended: Vec<Operation> = self
            .graph
            .iter()
            .filter(|device| device.is_extended() && !device.exists)
            .map(|device| Operation::create_device(device.clone()))
            .collect();
        self.operations.extend(extended);
        self.refresh_snapshots();

        for operation in &self.operations {
            debug!("operation: {}", operation);
        }

        debug!("pruning operation queue...");
        prune_operations(&mut self.operations);
        debug!("sorting operations...");
        sort_operations(&mut self.operations, &self.graph);

        if dry_run {
            for operation in &self.operations {
                info!("would execute operation: {}", operation);
            }

            return Ok(());
        }

        while !self.operations.is_empty() {
            let operation = self.operations.remove(0);
            info!("executing operation: {}", operation);
            if let Err(why) = self.execute(&operation) {
                error!("operation {} failed: {}", operation, why);
                let description = operation.to_string();
                self.operations.insert(0, operation);
                return Err(DeviceTreeError::Execute { operation: description, why });
            }

            self.backend.settle();
            self.mark_executed(&operation);
            self.graph.refresh_partition_names(None, true);
            self.refresh_snapshots();
        }

        Ok(())
    }

    /// Executes an operation, tearing every device down and retrying once if
    /// its partition table could not be written.
    fn execute(&self, operation: &Operation) -> Result<(), ExecuteError> {
        match self.backend.execute(operation, &self.graph) {
            Err(ExecuteError::DiskLabelCommit { why }) => {
                warn!("{}: tearing down devices and retrying", why);
                self.teardown_all();
                self.backend.execute(operation, &self.graph)
            }
            result => result,
        }
    }

    fn reset_tables(&self) {
        for device in self.graph.iter().filter(|device| device.partitioned()) {
            if let Some(table) = device.format.table() {
                table.reset();
            }

            if device.original_format.is_disklabel() && device.original_format.id != device.format.id {
                if let Some(table) = device.original_format.table() {
                    table.reset();
                }
            }
        }
    }

    fn pre_commit_fixup(&self) {
        let mountpoints: Vec<String> =
            self.graph.iter().filter_map(|device| device.format.mountpoint()).map(String::from).collect();

        for device in self.graph.iter() {
            self.backend.pre_commit_fixup(device, &mountpoints);
        }

        for operation in &self.operations {
            if operation.is_destroy() && operation.is_device() {
                self.backend.pre_commit_fixup(&operation.device, &mountpoints);
            }
        }
    }

    /// Points every operation at the current state of its device.
    fn refresh_snapshots(&mut self) {
        let graph = &self.graph;
        for operation in &mut self.operations {
            if let Some(device) = graph.get(operation.device.id) {
                operation.device = device.clone();
            }
        }
    }

    fn mark_executed(&mut self, operation: &Operation) {
        let device = match self.graph.get_mut(operation.device.id) {
            Some(device) => device,
            None => return,
        };

        match (operation.kind, operation.target) {
            (OperationKind::Create, OperationTarget::Device) => device.exists = true,
            (OperationKind::Create, OperationTarget::Format) => device.format.exists = true,
            (OperationKind::Resize, OperationTarget::Device) => {
                device.size = operation.size.unwrap_or(device.target_size);
            }
            (OperationKind::Resize, OperationTarget::Format) => {
                device.format.size = operation.size.unwrap_or(device.format.target_size);
            }
            (OperationKind::Migrate, _) => device.format.migrate = false,
            (OperationKind::Destroy, _) => (),
        }
    }
}
