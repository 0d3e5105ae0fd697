use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use super::{HostId, PartitionId, PlacementGraph};

/// A maximal run of consecutive partitions replicated on the same hosts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionGroup {
    pub first: PartitionId,
    pub last: PartitionId,
    pub host_ids: BTreeSet<HostId>,
}

impl PartitionGroup {
    pub fn partitions(&self) -> RangeInclusive<PartitionId> {
        self.first..=self.last
    }

    pub fn contains(&self, partition: PartitionId) -> bool {
        self.partitions().contains(&partition)
    }
}

/// Partition groups of a graph in ascending partition order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionGroups {
    groups: Vec<PartitionGroup>,
}

impl PartitionGroups {
    pub fn iter(&self) -> impl Iterator<Item = &PartitionGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group_for_partition(&self, partition: PartitionId) -> Option<&PartitionGroup> {
        let index = self.groups.partition_point(|group| group.last < partition);
        self.groups.get(index).filter(|group| group.contains(partition))
    }

    /// True if host sets never grow as partition ids ascend.
    pub fn is_monotonic(&self) -> bool {
        self.groups
            .windows(2)
            .all(|pair| pair[1].host_ids.len() <= pair[0].host_ids.len())
    }
}

impl<'a> IntoIterator for &'a PartitionGroups {
    type Item = &'a PartitionGroup;
    type IntoIter = std::slice::Iter<'a, PartitionGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

/// Split the partitions of `graph` into maximal runs sharing a host set.
pub fn compute_groups(graph: &PlacementGraph) -> PartitionGroups {
    let mut groups: Vec<PartitionGroup> = vec![];
    for partition in graph.partitions() {
        match groups.last_mut() {
            Some(group) if group.host_ids == partition.host_ids && group.last + 1 == partition.id => {
                group.last = partition.id;
            }
            _ => groups.push(PartitionGroup {
                first: partition.id,
                last: partition.id,
                host_ids: partition.host_ids.clone(),
            }),
        }
    }
    PartitionGroups { groups }
}

impl PlacementGraph {
    pub fn partition_groups(&self) -> PartitionGroups {
        compute_groups(self)
    }
}
