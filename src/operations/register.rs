use super::{Operation, OperationFilter, OperationId, OperationKind, OperationTarget, Previous};
use crate::device::SECTOR_SIZE;
use crate::errors::{OperationError, TreeInvariantError};
use crate::external::TableEntry;
use crate::format::Format;
use crate::tree::DeviceTree;

impl DeviceTree {
    /// Records an operation and applies its effect to the tree.
    ///
    /// Creating a device replaces any device with the same identity or path.
    /// Destroying, resizing, or formatting a device requires it to be in the tree.
    pub fn register(&mut self, mut operation: Operation) -> Result<OperationId, OperationError> {
        let id = operation.device.id;
        if !(operation.is_create() && operation.is_device()) && !self.graph.contains(id) {
            return Err(OperationError::DeviceNotInTree { device: operation.device.name.clone() });
        }

        match (operation.kind, operation.target) {
            (OperationKind::Create, OperationTarget::Device) => {
                let device = &operation.device;
                if device.partition_info().is_some() && device.size.max(device.target_size) == 0 {
                    return Err(invalid(&operation));
                }

                let stale: Vec<_> = self
                    .graph
                    .iter()
                    .filter(|d| d.id == id || d.path == device.path)
                    .map(|d| d.id)
                    .collect();

                if device.parents.iter().any(|parent| stale.contains(parent) || !self.graph.contains(*parent)) {
                    return Err(OperationError::Tree {
                        why: TreeInvariantError::MissingParent { name: device.name.clone() },
                    });
                }

                for device in stale {
                    self.graph.remove(device, false)?;
                }

                self.graph.add(operation.device.clone())?;
            }
            (OperationKind::Destroy, OperationTarget::Device) => {
                operation.device = self.graph.remove(id, false)?;
            }
            (OperationKind::Create, OperationTarget::Format) => {
                let mut format = match operation.format.clone() {
                    Some(format) => format,
                    None => return Err(invalid(&operation)),
                };

                if let Some(mountpoint) = format.mountpoint() {
                    let owner = self
                        .graph
                        .filesystems()
                        .into_iter()
                        .find(|d| d.id != id && d.format.mountpoint() == Some(mountpoint));

                    if let Some(owner) = owner {
                        return Err(OperationError::MountpointInUse {
                            mountpoint: mountpoint.to_owned(),
                            device:     owner.name.clone(),
                        });
                    }
                }

                format.device = operation.device.path.clone();
                operation.previous = Previous::Format(self.bind_format(&operation, format));
            }
            (OperationKind::Destroy, OperationTarget::Format) => {
                let old = self.bind_format(&operation, Format::none(&operation.device.path));
                operation.format = Some(old.clone());
                operation.previous = Previous::Format(old);
            }
            (OperationKind::Resize, target) => {
                let size = operation.size.ok_or_else(|| invalid(&operation))?;
                if let Some(device) = self.graph.get_mut(id) {
                    let target_size = match target {
                        OperationTarget::Device => &mut device.target_size,
                        OperationTarget::Format => &mut device.format.target_size,
                    };

                    operation.previous = Previous::Size(*target_size);
                    *target_size = size;
                }
            }
            (OperationKind::Migrate, OperationTarget::Format) => {
                let mut format = operation.format.clone().ok_or_else(|| invalid(&operation))?;
                format.device = operation.device.path.clone();
                format.exists = true;
                format.migrate = true;
                operation.previous = Previous::Format(self.bind_format(&operation, format));
            }
            (OperationKind::Migrate, OperationTarget::Device) => return Err(invalid(&operation)),
        }

        if let Some(device) = self.graph.get(id) {
            operation.device = device.clone();
        }

        debug!("registered operation: {}", operation);
        let id = operation.id;
        self.operations.push(operation);
        Ok(id)
    }

    /// Reverts the effect of a registered operation and drops it from the log.
    pub fn cancel(&mut self, id: OperationId) -> Result<Operation, OperationError> {
        let position = self
            .operations
            .iter()
            .position(|op| op.id == id)
            .ok_or_else(|| OperationError::NotRegistered { operation: id.to_string() })?;

        let operation = &self.operations[position];
        let device_id = operation.device.id;
        match (operation.kind, operation.target) {
            (OperationKind::Create, OperationTarget::Device) => {
                if self.graph.contains(device_id) {
                    self.graph.remove(device_id, false)?;
                }
            }
            (OperationKind::Destroy, OperationTarget::Device) => {
                let device = operation.device.clone();
                let restored = match (device.partition_info(), device.disk()) {
                    (Some(info), Some(disk)) if device.exists => {
                        self.graph.table_of(disk).map(|table| (*info, disk, table))
                    }
                    _ => None,
                };

                if let Some((info, disk, table)) = restored {
                    if table.partition_at(info.start).is_none() {
                        let entry = TableEntry::new(
                            info.number,
                            device.name.clone(),
                            info.start,
                            device.size / SECTOR_SIZE,
                            info.part_type,
                            info.bootable,
                        );

                        if let Err(why) = table.add_partition(&entry) {
                            warn!("unable to restore {} to its partition table: {}", device.name, why);
                        }
                    }

                    self.graph.refresh_partition_names(Some(disk), false);
                    self.graph.add(device)?;
                    self.graph.refresh_partition_names(Some(disk), false);
                } else {
                    self.graph.add(device)?;
                }
            }
            (_, target) => {
                let previous = operation.previous.clone();
                if let Some(device) = self.graph.get_mut(device_id) {
                    match (previous, target) {
                        (Previous::Format(format), _) => device.format = format,
                        (Previous::Size(size), OperationTarget::Device) => device.target_size = size,
                        (Previous::Size(size), OperationTarget::Format) => device.format.target_size = size,
                        (Previous::Nothing, _) => (),
                    }
                }
            }
        }

        let operation = self.operations.remove(position);
        debug!("cancelled operation: {}", operation);
        Ok(operation)
    }

    /// Registered operations that match `filter`, in registration order.
    pub fn find(&self, filter: &OperationFilter) -> Vec<&Operation> {
        self.operations.iter().filter(|op| filter.matches(op)).collect()
    }

    pub fn operations(&self) -> &[Operation] { &self.operations }

    /// Binds `format` to the operation's device, returning the format it replaced.
    fn bind_format(&mut self, operation: &Operation, format: Format) -> Format {
        match self.graph.get_mut(operation.device.id) {
            Some(device) => std::mem::replace(&mut device.format, format),
            None => operation.device.format.clone(),
        }
    }
}

fn invalid(operation: &Operation) -> OperationError {
    OperationError::Invalid { operation: operation.to_string() }
}
