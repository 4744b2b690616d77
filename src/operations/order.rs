//! Execution order of pruned operations.

use super::{Operation, OperationKind};
use crate::device::{Device, DeviceId};
use crate::tree::{depends_on, DeviceGraph, DeviceSource};
use std::{cmp::Ordering, collections::BTreeMap};

/// Devices of the graph, plus the snapshots held by operations whose devices
/// have already left the graph.
struct DeviceIndex<'a> {
    devices: BTreeMap<DeviceId, &'a Device>,
}

impl<'a> DeviceIndex<'a> {
    fn new(graph: &'a DeviceGraph, operations: &'a [Operation]) -> Self {
        let mut devices = BTreeMap::new();
        for operation in operations {
            devices.insert(operation.device.id, &operation.device);
        }

        for device in graph.iter() {
            devices.insert(device.id, device);
        }

        DeviceIndex { devices }
    }
}

impl<'a> DeviceSource for DeviceIndex<'a> {
    fn device(&self, id: DeviceId) -> Option<&Device> { self.devices.get(&id).cloned() }
}

fn same_disk(a: &Device, b: &Device) -> bool { a.disk().is_some() && a.disk() == b.disk() }

fn number(device: &Device) -> u32 { device.partition_info().map_or(0, |info| info.number) }

fn is_partition(device: &Device) -> bool { device.partition_info().is_some() }

fn compare_destroys<S: DeviceSource>(source: &S, a: &Operation, b: &Operation) -> Ordering {
    let (x, y) = (&a.device, &b.device);
    if x.path == y.path {
        match (a.is_format(), b.is_format()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => Ordering::Equal,
        }
    } else if depends_on(source, x, y) {
        Ordering::Less
    } else if depends_on(source, y, x) {
        Ordering::Greater
    } else if is_partition(x) && is_partition(y) {
        if same_disk(x, y) {
            number(y).cmp(&number(x))
        } else {
            y.name.cmp(&x.name)
        }
    } else if is_partition(x) && y.partitioned() {
        Ordering::Less
    } else if is_partition(y) && x.partitioned() {
        Ordering::Greater
    } else if is_partition(x) {
        Ordering::Greater
    } else if is_partition(y) {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

fn compare_resizes<S: DeviceSource>(source: &S, a: &Operation, b: &Operation) -> Ordering {
    let (x, y) = (&a.device, &b.device);
    let grow_order = |grow: bool| if grow { Ordering::Greater } else { Ordering::Less };
    if x.path == y.path {
        if a.target == b.target {
            Ordering::Equal
        } else if a.is_format() {
            grow_order(a.grow)
        } else {
            grow_order(a.grow).reverse()
        }
    } else if depends_on(source, x, y) {
        grow_order(a.grow)
    } else if depends_on(source, y, x) {
        grow_order(a.grow).reverse()
    } else if is_partition(x) && is_partition(y) {
        x.name.cmp(&y.name)
    } else {
        Ordering::Equal
    }
}

fn compare_creates<S: DeviceSource>(source: &S, a: &Operation, b: &Operation) -> Ordering {
    let (x, y) = (&a.device, &b.device);
    if x.path == y.path {
        if a.target == b.target {
            Ordering::Equal
        } else if a.is_format() {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    } else if depends_on(source, x, y) {
        Ordering::Greater
    } else if depends_on(source, y, x) {
        Ordering::Less
    } else if is_partition(x) && is_partition(y) {
        if same_disk(x, y) {
            number(x).cmp(&number(y))
        } else {
            x.name.cmp(&y.name)
        }
    } else if is_partition(x) && y.partitioned() {
        Ordering::Greater
    } else if is_partition(y) && x.partitioned() {
        Ordering::Less
    } else if is_partition(x) {
        Ordering::Less
    } else if is_partition(y) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

fn compare_migrates<S: DeviceSource>(source: &S, a: &Operation, b: &Operation) -> Ordering {
    let (x, y) = (&a.device, &b.device);
    if x.path == y.path {
        Ordering::Equal
    } else if depends_on(source, x, y) {
        Ordering::Greater
    } else if depends_on(source, y, x) {
        Ordering::Less
    } else if is_partition(x) && is_partition(y) {
        if same_disk(x, y) {
            number(x).cmp(&number(y))
        } else {
            x.name.cmp(&y.name)
        }
    } else {
        Ordering::Equal
    }
}

/// Position of an operation kind in the execution sequence.
fn rank(kind: OperationKind) -> u8 {
    match kind {
        OperationKind::Destroy => 0,
        OperationKind::Resize => 1,
        OperationKind::Create => 2,
        OperationKind::Migrate => 3,
    }
}

fn compare<S: DeviceSource>(source: &S, a: &Operation, b: &Operation) -> Ordering {
    let ordering = match (a.kind, b.kind) {
        (OperationKind::Destroy, OperationKind::Destroy) => compare_destroys(source, a, b),
        (OperationKind::Resize, OperationKind::Resize) => compare_resizes(source, a, b),
        (OperationKind::Create, OperationKind::Create) => compare_creates(source, a, b),
        (OperationKind::Migrate, OperationKind::Migrate) => compare_migrates(source, a, b),
        (x, y) => rank(x).cmp(&rank(y)),
    };

    trace!("cmp: {:?} -- {} | {}", ordering, a, b);
    ordering
}

/// Stable insertion sort that tolerates comparators which are not total orders.
fn insertion_sort<T, F>(items: &mut [T], mut compare: F)
where
    F: FnMut(&T, &T) -> Ordering,
{
    for unsorted in 1..items.len() {
        let mut position = unsorted;
        while position > 0 && compare(&items[position - 1], &items[position]) == Ordering::Greater {
            items.swap(position - 1, position);
            position -= 1;
        }
    }
}

/// Sorts operations into a sequence that is safe to execute.
pub(crate) fn sort_operations(operations: &mut Vec<Operation>, graph: &DeviceGraph) {
    let order = {
        let pending: &[Operation] = operations;
        let index = DeviceIndex::new(graph, pending);
        let mut order: Vec<usize> = (0..pending.len()).collect();
        insertion_sort(&mut order, |&a, &b| compare(&index, &pending[a], &pending[b]));
        order
    };

    let mut slots: Vec<Option<Operation>> = operations.drain(..).map(Some).collect();
    operations.extend(order.into_iter().filter_map(|position| slots[position].take()));
}

#[cfg(test)]
mod tests {
    use super::super::OperationId;
    use super::*;
    use crate::device::PartitionInfo;
    use crate::fixtures::MockTable;
    use crate::format::{DiskLabel, Format};
    use disk_types::{FileSystem, PartitionType};

    struct Layout {
        graph: DeviceGraph,
        disk:  Device,
    }

    impl Layout {
        fn new() -> Self {
            let label = DiskLabel::new(MockTable::msdos("sda", &[]));
            let disk = Device::disk("sda").existing().with_format(Format::disklabel("/dev/sda", label));
            let mut graph = DeviceGraph::new();
            graph.add(disk.clone()).unwrap();
            Layout { graph, disk }
        }

        fn partition(&mut self, number: u32, part_type: PartitionType) -> Device {
            let name = format!("sda{}", number);
            let info = PartitionInfo::new(number, part_type, false, u64::from(number) * 2048);
            let device = Device::partition(&name, &self.disk, info);
            self.graph.add(device.clone()).unwrap();
            device
        }
    }

    fn sorted(graph: &DeviceGraph, mut operations: Vec<Operation>) -> Vec<OperationId> {
        sort_operations(&mut operations, graph);
        operations.iter().map(|op| op.id).collect()
    }

    #[test]
    fn destroys_partitions_in_descending_order() {
        let mut layout = Layout::new();
        let sda1 = layout.partition(1, PartitionType::Primary);
        let sda2 = layout.partition(2, PartitionType::Primary);
        let first = Operation::destroy_device(sda2);
        let second = Operation::destroy_device(sda1);
        let operations = vec![second.clone(), first.clone()];
        assert_eq!(sorted(&layout.graph, operations), vec![first.id, second.id]);
    }

    #[test]
    fn destroy_format_before_device() {
        let mut layout = Layout::new();
        let sda1 = layout.partition(1, PartitionType::Primary);
        let device = Operation::destroy_device(sda1.clone());
        let format = Operation::destroy_format(sda1);
        assert_eq!(sorted(&layout.graph, vec![device.clone(), format.clone()]), vec![format.id, device.id]);
    }

    #[test]
    fn dependents_destroyed_first_and_created_last() {
        let mut layout = Layout::new();
        let sda1 = layout.partition(1, PartitionType::Primary);
        let lv = Device::composite("vg-root", "lvmlv", false, &[&sda1]);
        layout.graph.add(lv.clone()).unwrap();

        let destroy_part = Operation::destroy_device(sda1.clone());
        let destroy_lv = Operation::destroy_device(lv.clone());
        assert_eq!(
            sorted(&layout.graph, vec![destroy_part.clone(), destroy_lv.clone()]),
            vec![destroy_lv.id, destroy_part.id]
        );

        let create_part = Operation::create_device(sda1);
        let create_lv = Operation::create_device(lv);
        assert_eq!(
            sorted(&layout.graph, vec![create_lv.clone(), create_part.clone()]),
            vec![create_part.id, create_lv.id]
        );
    }

    #[test]
    fn logical_partitions_follow_extended() {
        let mut layout = Layout::new();
        let extended = layout.partition(2, PartitionType::Extended);
        let logical = layout.partition(5, PartitionType::Logical);
        let create_extended = Operation::create_device(extended.clone());
        let create_logical = Operation::create_device(logical.clone());
        assert_eq!(
            sorted(&layout.graph, vec![create_logical.clone(), create_extended.clone()]),
            vec![create_extended.id, create_logical.id]
        );

        let destroy_extended = Operation::destroy_device(extended);
        let destroy_logical = Operation::destroy_device(logical);
        assert_eq!(
            sorted(&layout.graph, vec![destroy_extended.clone(), destroy_logical.clone()]),
            vec![destroy_logical.id, destroy_extended.id]
        );
    }

    #[test]
    fn kinds_sort_destroy_resize_create_migrate() {
        let mut layout = Layout::new();
        let sda1 = layout.partition(1, PartitionType::Primary).existing().with_size(100);
        let sda2 = layout.partition(2, PartitionType::Primary);
        let sda3 = layout.partition(3, PartitionType::Primary);
        let ext4 = Format::filesystem(FileSystem::Ext4, "/dev/sda3");

        let migrate = Operation::migrate_format(sda3.clone(), ext4.clone());
        let create = Operation::create_device(sda2);
        let resize = Operation::resize_device(sda1, 50);
        let destroy = Operation::destroy_format(sda3);
        assert_eq!(
            sorted(&layout.graph, vec![migrate.clone(), create.clone(), resize.clone(), destroy.clone()]),
            vec![destroy.id, resize.id, create.id, migrate.id]
        );
    }

    #[test]
    fn resize_direction_orders_format_and_device() {
        let mut layout = Layout::new();
        let sda1 = layout.partition(1, PartitionType::Primary).existing().with_size(100);

        let shrink_device = Operation::resize_device(sda1.clone(), 50);
        let shrink_format = Operation::resize_format(sda1.clone(), 50);
        assert_eq!(
            sorted(&layout.graph, vec![shrink_device.clone(), shrink_format.clone()]),
            vec![shrink_format.id, shrink_device.id]
        );

        let grow_device = Operation::resize_device(sda1.clone(), 200);
        let grow_format = Operation::resize_format(sda1, 200);
        assert_eq!(
            sorted(&layout.graph, vec![grow_format.clone(), grow_device.clone()]),
            vec![grow_device.id, grow_format.id]
        );
    }

    #[test]
    fn resize_dependency_follows_direction() {
        let mut layout = Layout::new();
        let sda1 = layout.partition(1, PartitionType::Primary).existing().with_size(100);
        let lv = Device::composite("vg-root", "lvmlv", false, &[&sda1]).existing().with_size(100);
        layout.graph.add(lv.clone()).unwrap();

        let shrink_lv = Operation::resize_device(lv.clone(), 50);
        let shrink_part = Operation::resize_device(sda1.clone(), 50);
        assert_eq!(
            sorted(&layout.graph, vec![shrink_part.clone(), shrink_lv.clone()]),
            vec![shrink_lv.id, shrink_part.id]
        );

        let grow_lv = Operation::resize_device(lv, 200);
        let grow_part = Operation::resize_device(sda1, 200);
        assert_eq!(
            sorted(&layout.graph, vec![grow_lv.clone(), grow_part.clone()]),
            vec![grow_part.id, grow_lv.id]
        );
    }

    #[test]
    fn creates_device_before_format_and_partitions_ascending() {
        let mut layout = Layout::new();
        let sda1 = layout.partition(1, PartitionType::Primary);
        let sda2 = layout.partition(2, PartitionType::Primary);
        let format = Operation::create_format(sda1.clone(), Format::filesystem(FileSystem::Ext4, "/dev/sda1"));
        let device = Operation::create_device(sda1);
        let second = Operation::create_device(sda2);
        assert_eq!(
            sorted(&layout.graph, vec![second.clone(), format.clone(), device.clone()]),
            vec![device.id, second.id, format.id]
        );
    }

    #[test]
    fn partitions_relative_to_other_devices() {
        let mut layout = Layout::new();
        let sda1 = layout.partition(1, PartitionType::Primary);
        let plain = Device::disk("sdb");
        let label = DiskLabel::new(MockTable::gpt("sdc", &[]));
        let labeled = Device::disk("sdc").with_format(Format::disklabel("/dev/sdc", label));

        let destroy_part = Operation::destroy_device(sda1.clone());
        let destroy_plain = Operation::destroy_device(plain.clone());
        let destroy_labeled = Operation::destroy_device(labeled.clone());
        assert_eq!(
            sorted(&layout.graph, vec![destroy_labeled.clone(), destroy_part.clone()]),
            vec![destroy_part.id, destroy_labeled.id]
        );
        assert_eq!(
            sorted(&layout.graph, vec![destroy_part.clone(), destroy_plain.clone()]),
            vec![destroy_plain.id, destroy_part.id]
        );

        let create_part = Operation::create_device(sda1);
        let create_plain = Operation::create_device(plain);
        let create_labeled = Operation::create_device(labeled);
        assert_eq!(
            sorted(&layout.graph, vec![create_part.clone(), create_labeled.clone()]),
            vec![create_labeled.id, create_part.id]
        );
        assert_eq!(
            sorted(&layout.graph, vec![create_plain.clone(), create_part.clone()]),
            vec![create_part.id, create_plain.id]
        );
    }

    #[test]
    fn migrates_in_partition_order() {
        let mut layout = Layout::new();
        let sda1 = layout.partition(1, PartitionType::Primary);
        let sda2 = layout.partition(2, PartitionType::Primary);
        let ext4 = Format::filesystem(FileSystem::Ext4, "");
        let first = Operation::migrate_format(sda1, ext4.clone());
        let second = Operation::migrate_format(sda2, ext4);
        assert_eq!(sorted(&layout.graph, vec![second.clone(), first.clone()]), vec![first.id, second.id]);
    }

    #[test]
    fn partitions_on_different_disks_compare_by_name() {
        let disk_a = Device::disk("sda");
        let disk_b = Device::disk("sdb");
        let a = Device::partition("sda1", &disk_a, PartitionInfo::new(1, PartitionType::Primary, false, 2048));
        let b = Device::partition("sdb1", &disk_b, PartitionInfo::new(1, PartitionType::Primary, false, 2048));
        let graph = DeviceGraph::new();

        let destroy_a = Operation::destroy_device(a.clone());
        let destroy_b = Operation::destroy_device(b.clone());
        assert_eq!(sorted(&graph, vec![destroy_a.clone(), destroy_b.clone()]), vec![destroy_b.id, destroy_a.id]);

        let create_a = Operation::create_device(a);
        let create_b = Operation::create_device(b);
        assert_eq!(sorted(&graph, vec![create_b.clone(), create_a.clone()]), vec![create_a.id, create_b.id]);
    }

    #[test]
    fn unrelated_ties_keep_log_order() {
        let a = Device::disk("sdx");
        let b = Device::disk("sdy");
        let graph = DeviceGraph::new();
        let first = Operation::create_device(b);
        let second = Operation::create_device(a);
        assert_eq!(sorted(&graph, vec![first.clone(), second.clone()]), vec![first.id, second.id]);
    }
}
