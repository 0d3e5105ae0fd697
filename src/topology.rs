//! Placement of partition replicas on hosts.
//!
//! A [`PlacementGraph`] is an immutable value: hosts and partitions keyed by
//! id in sorted maps, plus a host -> partitions index rebuilt whenever a new
//! graph is assembled. The builder creates graphs, the mutator derives new
//! graphs from old ones, and nothing ever changes a graph in place.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

mod builder;
mod codec;
mod groups;
mod mutator;

pub use builder::{TopologyBuilder, ha_distance, sort_host_ids_by_ha_distance, validate_legacy_cluster_config};
pub use groups::{PartitionGroup, PartitionGroups, compute_groups};
pub use mutator::TopologyMutator;

pub type HostId = u32;
pub type PartitionId = u32;

/// Builder input describing one host.
///
/// * `ip` - address of the host, carried through to the topology document
/// * `ha_group` - dot separated failure domain path, e.g. `rack1.chassis2`
/// * `site_count` - number of partition replicas the host runs
/// * `partition_ids` - partitions the host held before, used with restore placement
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostInfo {
    pub ip: String,
    pub ha_group: String,
    pub site_count: u32,
    pub partition_ids: Option<Vec<PartitionId>>,
}

impl HostInfo {
    pub fn new(ha_group: impl Into<String>, site_count: u32) -> HostInfo {
        HostInfo {
            ha_group: ha_group.into(),
            site_count,
            ..Default::default()
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> HostInfo {
        self.ip = ip.into();
        self
    }

    pub fn with_partition_ids(mut self, partition_ids: Vec<PartitionId>) -> HostInfo {
        self.partition_ids = Some(partition_ids);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Host {
    pub id: HostId,
    pub ip: String,
    pub ha_group: String,
    pub site_count: u32,
    pub is_missing: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub id: PartitionId,
    pub host_ids: BTreeSet<HostId>,
    pub leader_host_id: HostId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacementGraph {
    version: u64,
    kfactor: u32,
    hosts: BTreeMap<HostId, Host>,
    partitions: BTreeMap<PartitionId, Partition>,
    host_partitions: BTreeMap<HostId, BTreeSet<PartitionId>>,
}

impl PlacementGraph {
    /// Assemble a graph and check its invariants: partition ids are `0..n`,
    /// every partition has `kfactor + 1` known hosts and a leader among them,
    /// and every host holds exactly `site_count` partitions.
    pub(crate) fn assemble(
        version: u64,
        kfactor: u32,
        hosts: BTreeMap<HostId, Host>,
        partitions: BTreeMap<PartitionId, Partition>,
    ) -> Result<PlacementGraph> {
        let replica_count = kfactor.checked_add(1).ok_or_else(|| {
            Error::InvalidTopology(format!("kfactor {kfactor} is out of range"))
        })? as usize;
        let mut host_partitions: BTreeMap<HostId, BTreeSet<PartitionId>> =
            hosts.keys().map(|id| (*id, BTreeSet::new())).collect();

        for (expected, (id, partition)) in partitions.iter().enumerate() {
            if *id != expected as PartitionId || partition.id != *id {
                return Err(Error::InvalidTopology(format!(
                    "partition ids must be contiguous from 0, found {id} at position {expected}"
                )));
            }
            if partition.host_ids.len() != replica_count {
                return Err(Error::InvalidTopology(format!(
                    "partition {id} has {} replicas, expected {replica_count}",
                    partition.host_ids.len()
                )));
            }
            if !partition.host_ids.contains(&partition.leader_host_id) {
                return Err(Error::InvalidTopology(format!(
                    "leader {} of partition {id} is not one of its replicas",
                    partition.leader_host_id
                )));
            }
            for host_id in &partition.host_ids {
                host_partitions
                    .get_mut(host_id)
                    .ok_or_else(|| {
                        Error::InvalidTopology(format!(
                            "partition {id} is placed on unknown host {host_id}"
                        ))
                    })?
                    .insert(*id);
            }
        }

        for (id, host) in hosts.iter() {
            let held = host_partitions.get(id).map_or(0, BTreeSet::len);
            if held != host.site_count as usize {
                return Err(Error::InvalidTopology(format!(
                    "host {id} holds {held} partitions but has {} sites",
                    host.site_count
                )));
            }
        }

        Ok(PlacementGraph {
            version,
            kfactor,
            hosts,
            partitions,
            host_partitions,
        })
    }

    /// Incremented by every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn kfactor(&self) -> u32 {
        self.kfactor
    }

    pub fn replica_count(&self) -> u32 {
        self.kfactor + 1
    }

    pub fn host_count(&self) -> u32 {
        self.hosts.len() as u32
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Sum of the site counts of all hosts, missing ones included.
    pub fn sites_total(&self) -> u32 {
        self.hosts.values().map(|host| host.site_count).sum()
    }

    pub fn sites_per_host(&self) -> u32 {
        match self.host_count() {
            0 => 0,
            count => self.sites_total() / count,
        }
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    pub fn host(&self, id: HostId) -> Option<&Host> {
        self.hosts.get(&id)
    }

    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(&id)
    }

    /// Partitions replicated on `host`, `None` for unknown hosts.
    pub fn partitions_for_host(&self, host: HostId) -> Option<&BTreeSet<PartitionId>> {
        self.host_partitions.get(&host)
    }

    pub fn leader_of(&self, partition: PartitionId) -> Option<HostId> {
        self.partitions.get(&partition).map(|p| p.leader_host_id)
    }

    pub fn live_host_ids(&self) -> BTreeSet<HostId> {
        self.hosts
            .values()
            .filter(|host| !host.is_missing)
            .map(|host| host.id)
            .collect()
    }

    /// True if some partition has no live replica left.
    pub fn has_missing_partitions(&self) -> bool {
        self.partitions.values().any(|partition| {
            partition
                .host_ids
                .iter()
                .all(|id| self.hosts.get(id).is_none_or(|host| host.is_missing))
        })
    }

    /// Host ids grouped by HA group path.
    pub fn ha_groups(&self) -> BTreeMap<String, BTreeSet<HostId>> {
        let mut groups: BTreeMap<String, BTreeSet<HostId>> = BTreeMap::new();
        for host in self.hosts.values() {
            groups.entry(host.ha_group.clone()).or_default().insert(host.id);
        }
        groups
    }

    /// Number of partitions each live host leads. Live hosts without
    /// partitions are not listed.
    pub fn leader_counts(&self) -> BTreeMap<HostId, u32> {
        let mut counts: BTreeMap<HostId, u32> = self
            .host_partitions
            .iter()
            .filter(|(id, partitions)| {
                !partitions.is_empty() && self.hosts.get(*id).is_some_and(|host| !host.is_missing)
            })
            .map(|(id, _)| (*id, 0))
            .collect();
        for partition in self.partitions.values() {
            if let Some(count) = counts.get_mut(&partition.leader_host_id) {
                *count += 1;
            }
        }
        counts
    }

    /// Builder input reproducing this graph, each host carrying its current
    /// partition ids for a restore placement build.
    pub fn host_infos(&self) -> BTreeMap<HostId, HostInfo> {
        self.hosts
            .values()
            .map(|host| {
                let partition_ids = self
                    .host_partitions
                    .get(&host.id)
                    .map(|ids| ids.iter().copied().collect())
                    .unwrap_or_default();
                let info = HostInfo::new(host.ha_group.clone(), host.site_count)
                    .with_ip(host.ip.clone())
                    .with_partition_ids(partition_ids);
                (host.id, info)
            })
            .collect()
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<HostId, Host>, BTreeMap<PartitionId, Partition>) {
        (self.hosts, self.partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopologyConfig;
    use pretty_assertions::assert_eq;

    fn two_rack_graph() -> PlacementGraph {
        TopologyBuilder::new(TopologyConfig::new(1))
            .with_host(0, HostInfo::new("rack1", 2).with_ip("10.0.0.1"))
            .with_host(1, HostInfo::new("rack2", 2).with_ip("10.0.0.2"))
            .build()
            .unwrap()
    }

    #[test]
    fn derived_counts() {
        let graph = two_rack_graph();

        assert_eq!(graph.host_count(), 2);
        assert_eq!(graph.partition_count(), 2);
        assert_eq!(graph.sites_total(), 4);
        assert_eq!(graph.sites_per_host(), 2);
        assert_eq!(graph.replica_count(), 2);
        assert!(!graph.has_missing_partitions());
        assert_eq!(graph.live_host_ids(), BTreeSet::from([0, 1]));
    }

    #[test]
    fn host_index_mirrors_partitions() {
        let graph = two_rack_graph();
        for partition in graph.partitions() {
            for host in &partition.host_ids {
                assert!(graph.partitions_for_host(*host).unwrap().contains(&partition.id));
            }
        }
        assert_eq!(graph.partitions_for_host(0), Some(&BTreeSet::from([0, 1])));
        assert_eq!(graph.partitions_for_host(9), None);
    }

    #[test]
    fn ha_groups_and_host_infos() {
        let graph = two_rack_graph();

        let groups = graph.ha_groups();
        assert_eq!(groups["rack1"], BTreeSet::from([0]));
        assert_eq!(groups["rack2"], BTreeSet::from([1]));

        let infos = graph.host_infos();
        assert_eq!(infos[&1].ip, "10.0.0.2");
        assert_eq!(infos[&1].partition_ids, Some(vec![0, 1]));
    }

    #[test]
    fn assemble_rejects_broken_graphs() {
        let hosts: BTreeMap<HostId, Host> = [0, 1]
            .into_iter()
            .map(|id| {
                (
                    id,
                    Host {
                        id,
                        ip: String::new(),
                        ha_group: String::new(),
                        site_count: 1,
                        is_missing: false,
                    },
                )
            })
            .collect();
        let partition = |id, host_ids: &[HostId], leader| Partition {
            id,
            host_ids: host_ids.iter().copied().collect(),
            leader_host_id: leader,
        };

        let ok = BTreeMap::from([(0, partition(0, &[0, 1], 1))]);
        assert!(PlacementGraph::assemble(0, 1, hosts.clone(), ok).is_ok());

        let leader_outside = BTreeMap::from([(0, partition(0, &[0, 1], 5))]);
        assert!(PlacementGraph::assemble(0, 1, hosts.clone(), leader_outside).is_err());

        let gap = BTreeMap::from([(1, partition(1, &[0, 1], 0))]);
        assert!(PlacementGraph::assemble(0, 1, hosts.clone(), gap).is_err());

        let short = BTreeMap::from([(0, partition(0, &[0], 0))]);
        assert!(PlacementGraph::assemble(0, 1, hosts, short).is_err());

        assert!(PlacementGraph::assemble(0, u32::MAX, BTreeMap::new(), BTreeMap::new()).is_err());
    }
}
