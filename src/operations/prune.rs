//! Removal of operations that cancel each other out before they are executed.
//!
//! Every pass re-queries the live log, and every removal decision uses the
//! positions of the log at the moment the decision is made. Operations that
//! an earlier iteration removed are skipped.

use super::{Operation, OperationFilter, OperationId, OperationKind, OperationTarget};
use crate::device::DeviceId;

fn find(operations: &[Operation], filter: &OperationFilter) -> Vec<OperationId> {
    operations.iter().filter(|op| filter.matches(op)).map(|op| op.id).collect()
}

fn position(operations: &[Operation], id: OperationId) -> Option<usize> {
    operations.iter().position(|op| op.id == id)
}

fn remove(operations: &mut Vec<Operation>, id: OperationId) {
    if let Some(position) = position(operations, id) {
        let operation = operations.remove(position);
        debug!(" removing operation '{}'", operation);
    }
}

fn device_of(operations: &[Operation], id: OperationId) -> Option<DeviceId> {
    position(operations, id).map(|position| operations[position].device.id)
}

fn family(device: DeviceId, kind: OperationKind, target: OperationTarget) -> OperationFilter {
    OperationFilter::default().device_id(device).kind(kind).target(target)
}

/// Drops redundant and looping operations from the log.
pub fn prune_operations(operations: &mut Vec<Operation>) {
    prune_destroys(operations, OperationTarget::Device);
    prune_creates(operations, OperationTarget::Device);
    keep_last(operations, OperationKind::Resize, OperationTarget::Device);
    prune_destroys(operations, OperationTarget::Format);
    prune_creates(operations, OperationTarget::Format);
    keep_last(operations, OperationKind::Resize, OperationTarget::Format);
    keep_last(operations, OperationKind::Migrate, OperationTarget::Format);
}

/// Collapses destroy loops.
///
/// A target that did not exist before its first create loses everything from
/// that create through its last destroy. A preexisting target destroyed
/// several times loses everything after the current destroy through the last
/// one. A device destroyed exactly once loses the resizes and format creates
/// and migrates scheduled before it.
fn prune_destroys(operations: &mut Vec<Operation>, target: OperationTarget) {
    let candidates = find(operations, &OperationFilter::default().kind(OperationKind::Destroy).target(target));
    for candidate in candidates {
        let device = match device_of(operations, candidate) {
            Some(device) => device,
            None => continue,
        };

        let destroys = find(operations, &family(device, OperationKind::Destroy, target));
        let creates = find(operations, &family(device, OperationKind::Create, target));
        debug!(
            "found {} create and {} destroy operations for device id {}",
            creates.len(),
            destroys.len(),
            device
        );

        let mut first_destroy = None;
        let mut start = None;
        let mut stop = None;

        if destroys.len() > 1 {
            first_destroy = position(operations, destroys[0]);
            start = position(operations, candidate).map(|position| position + 1);
            stop = destroys.last().cloned();
        }

        if let Some(&first) = creates.first() {
            let first_create = position(operations, first);
            if first_destroy.is_none() || first_destroy > first_create {
                start = first_create;
                stop = destroys.last().cloned();
            }
        }

        let mut affected = match target {
            OperationTarget::Device => find(operations, &OperationFilter::default().device_id(device)),
            OperationTarget::Format => {
                find(operations, &OperationFilter::default().device_id(device).target(target))
            }
        };

        if start.is_none() {
            if target == OperationTarget::Format {
                continue;
            }

            affected.retain(|&id| {
                operations
                    .iter()
                    .find(|op| op.id == id)
                    .map_or(false, |op| op.is_resize() || (op.is_format() && !op.is_destroy()))
            });

            if affected.is_empty() {
                continue;
            }

            start = position(operations, affected[0]);
            stop = affected.last().cloned();
        }

        let (start, stop) = match (start, stop) {
            (Some(start), Some(stop)) => (start, stop),
            _ => continue,
        };

        for id in affected {
            if let (Some(at), Some(end)) = (position(operations, id), position(operations, stop)) {
                if start <= at && at <= end {
                    remove(operations, id);
                }
            }

            if id == stop {
                break;
            }
        }
    }
}

/// Collapses create loops by dropping everything between the first destroy
/// (or the start of the log) and the last create.
fn prune_creates(operations: &mut Vec<Operation>, target: OperationTarget) {
    let candidates = find(operations, &OperationFilter::default().kind(OperationKind::Create).target(target));
    for candidate in candidates {
        let device = match device_of(operations, candidate) {
            Some(device) => device,
            None => continue,
        };

        let creates = find(operations, &family(device, OperationKind::Create, target));
        let destroys = find(operations, &family(device, OperationKind::Destroy, target));
        debug!(
            "found {} create and {} destroy operations for device id {}",
            creates.len(),
            destroys.len(),
            device
        );

        let mut first_create = None;
        let mut start = None;
        let stop = creates.last().cloned();

        if creates.len() > 1 {
            first_create = position(operations, creates[0]);
            start = Some(0);
        }

        if let Some(&first) = destroys.first() {
            let first_destroy = position(operations, first);
            if first_create.is_none() || first_create > first_destroy {
                start = first_destroy.map(|position| position + 1);
            }
        }

        let (start, stop) = match (start, stop) {
            (Some(start), Some(stop)) => (start, stop),
            _ => continue,
        };

        let affected = match target {
            OperationTarget::Device => find(operations, &OperationFilter::default().device_id(device)),
            OperationTarget::Format => {
                find(operations, &OperationFilter::default().device_id(device).target(target))
            }
        };

        for id in affected {
            if id == stop {
                break;
            }

            if let (Some(at), Some(end)) = (position(operations, id), position(operations, stop)) {
                if start <= at && at < end {
                    remove(operations, id);
                }
            }
        }
    }
}

/// Keeps only the last operation of a family per device.
fn keep_last(operations: &mut Vec<Operation>, kind: OperationKind, target: OperationTarget) {
    let candidates = find(operations, &OperationFilter::default().kind(kind).target(target));
    for candidate in candidates {
        let device = match device_of(operations, candidate) {
            Some(device) => device,
            None => continue,
        };

        let loops = find(operations, &family(device, kind, target));
        if loops.len() < 2 {
            continue;
        }

        for &id in &loops[..loops.len() - 1] {
            remove(operations, id);
        }
    }
}
