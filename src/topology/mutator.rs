use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::builder::{Distances, assign_leaders, check_request, partitions_from, place_fresh};
use super::{Host, HostId, HostInfo, PartitionId, PlacementGraph};
use crate::error::{Error, Result};

/// Derives new graphs from an existing one. The source graph is never
/// changed; every successful operation returns a graph with the next version.
pub struct TopologyMutator<'a> {
    graph: &'a PlacementGraph,
}

impl<'a> TopologyMutator<'a> {
    pub fn new(graph: &'a PlacementGraph) -> TopologyMutator<'a> {
        TopologyMutator { graph }
    }

    /// Add hosts together with the partitions their sites make room for.
    ///
    /// New partitions take ids from the current partition count upwards and
    /// are placed on the new hosts only; existing partitions keep their hosts
    /// and leaders. Returns the new graph and the new partition ids.
    pub fn add_hosts(
        &self,
        new_hosts: &[(HostId, HostInfo)],
    ) -> Result<(PlacementGraph, Vec<PartitionId>)> {
        let mut seen = BTreeSet::new();
        for (id, _) in new_hosts {
            if self.graph.host(*id).is_some() || !seen.insert(*id) {
                return Err(Error::DuplicateHost(*id));
            }
        }
        if new_hosts.is_empty() {
            return Ok((self.graph.clone(), vec![]));
        }

        let added: BTreeMap<HostId, HostInfo> = new_hosts.iter().cloned().collect();
        let replica_count = self.graph.replica_count();
        let new_count = check_request(&added, replica_count)?;
        let placement = place_fresh(&added, replica_count, new_count, &Distances::new(&added))?;

        let first = self.graph.partition_count();
        let replicas: BTreeMap<PartitionId, BTreeSet<HostId>> = placement
            .into_iter()
            .enumerate()
            .map(|(offset, hosts)| (first + offset as PartitionId, hosts))
            .collect();
        let live: BTreeSet<HostId> = added.keys().copied().collect();
        let leaders = assign_leaders(&replicas, &live, &BTreeMap::new());
        let new_partition_ids: Vec<PartitionId> = replicas.keys().copied().collect();

        let (mut hosts, mut partitions) = self.graph.clone().into_parts();
        for (id, info) in added {
            hosts.insert(
                id,
                Host {
                    id,
                    ip: info.ip,
                    ha_group: info.ha_group,
                    site_count: info.site_count,
                    is_missing: false,
                },
            );
        }
        partitions.extend(partitions_from(replicas, &leaders));

        debug!(
            hosts = new_hosts.len(),
            partitions = ?new_partition_ids,
            version = self.graph.version() + 1,
            "added hosts"
        );

        let graph = PlacementGraph::assemble(
            self.graph.version() + 1,
            self.graph.kfactor(),
            hosts,
            partitions,
        )?;
        Ok((graph, new_partition_ids))
    }

    /// Replace a failed host of `ha_group` with `new_host_id`.
    ///
    /// The failed host is the lowest id host of the group that is missing or
    /// absent from `live_host_ids`; with `explicit_placement` it must also
    /// hold exactly those partitions. The new host takes over its sites and
    /// partitions, and `live_host_ids` decides which other hosts are missing.
    ///
    /// The failed host's entry is deleted from the new graph rather than kept
    /// as a missing host, so its id no longer appears in `hosts()` or in any
    /// partition. Passing the failed id as `new_host_id` rejoins it in place.
    ///
    /// Returns `None` if the group has no hosts, no failed host qualifies, or
    /// `new_host_id` belongs to another host.
    pub fn recover_host(
        &self,
        live_host_ids: &BTreeSet<HostId>,
        new_host_id: HostId,
        ha_group: &str,
        explicit_placement: Option<&[PartitionId]>,
    ) -> Option<PlacementGraph> {
        let graph = self.graph;
        if !graph.hosts().any(|host| host.ha_group == ha_group) {
            debug!(ha_group, "no recovery: ha group has no hosts");
            return None;
        }

        let explicit: Option<BTreeSet<PartitionId>> =
            explicit_placement.map(|ids| ids.iter().copied().collect());
        let failed_id = graph
            .hosts()
            .filter(|host| host.ha_group == ha_group)
            .filter(|host| host.is_missing || !live_host_ids.contains(&host.id))
            .find(|host| match &explicit {
                Some(ids) => graph.partitions_for_host(host.id) == Some(ids),
                None => true,
            })
            .map(|host| host.id);
        let Some(failed_id) = failed_id else {
            debug!(ha_group, "no recovery: no failed host matches");
            return None;
        };
        if new_host_id != failed_id && graph.host(new_host_id).is_some() {
            debug!(new_host_id, "no recovery: host id already in use");
            return None;
        }

        let (mut hosts, mut partitions) = graph.clone().into_parts();
        let failed = hosts.remove(&failed_id)?;
        for host in hosts.values_mut() {
            host.is_missing = !live_host_ids.contains(&host.id);
        }
        hosts.insert(
            new_host_id,
            Host {
                id: new_host_id,
                is_missing: false,
                ..failed
            },
        );

        let mut current: BTreeMap<PartitionId, HostId> = BTreeMap::new();
        for partition in partitions.values_mut() {
            if partition.host_ids.remove(&failed_id) {
                partition.host_ids.insert(new_host_id);
            }
            let leader = match partition.leader_host_id {
                leader if leader == failed_id => new_host_id,
                leader => leader,
            };
            current.insert(partition.id, leader);
        }

        let live: BTreeSet<HostId> = hosts
            .values()
            .filter(|host| !host.is_missing)
            .map(|host| host.id)
            .collect();
        let replicas: BTreeMap<PartitionId, BTreeSet<HostId>> = partitions
            .into_iter()
            .map(|(id, partition)| (id, partition.host_ids))
            .collect();
        let leaders = assign_leaders(&replicas, &live, &current);

        match PlacementGraph::assemble(
            graph.version() + 1,
            graph.kfactor(),
            hosts,
            partitions_from(replicas, &leaders),
        ) {
            Ok(recovered) => {
                debug!(failed_id, new_host_id, ha_group, "recovered host");
                Some(recovered)
            }
            Err(err) => {
                debug!(%err, "no recovery: replacement graph is invalid");
                None
            }
        }
    }

    /// Mark `host_id` missing and move leadership off it.
    ///
    /// Fails with `Error::KSafetyViolation` if one of its partitions would
    /// have no live replica left.
    pub fn remove_host(&self, host_id: HostId) -> Result<PlacementGraph> {
        if self.graph.host(host_id).is_none() {
            return Err(Error::InvalidTopology(format!("unknown host {host_id}")));
        }

        let (mut hosts, partitions) = self.graph.clone().into_parts();
        if let Some(host) = hosts.get_mut(&host_id) {
            host.is_missing = true;
        }
        let live: BTreeSet<HostId> = hosts
            .values()
            .filter(|host| !host.is_missing)
            .map(|host| host.id)
            .collect();

        if let Some(orphan) = partitions.values().find(|partition| {
            partition.host_ids.contains(&host_id)
                && !partition.host_ids.iter().any(|id| live.contains(id))
        }) {
            return Err(Error::KSafetyViolation(orphan.id));
        }

        let current: BTreeMap<PartitionId, HostId> = partitions
            .values()
            .map(|partition| (partition.id, partition.leader_host_id))
            .collect();
        let replicas: BTreeMap<PartitionId, BTreeSet<HostId>> = partitions
            .into_iter()
            .map(|(id, partition)| (id, partition.host_ids))
            .collect();
        let leaders = assign_leaders(&replicas, &live, &current);

        debug!(host_id, version = self.graph.version() + 1, "removed host");

        PlacementGraph::assemble(
            self.graph.version() + 1,
            self.graph.kfactor(),
            hosts,
            partitions_from(replicas, &leaders),
        )
    }
}
