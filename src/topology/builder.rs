use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, trace};

use super::{Host, HostId, HostInfo, Partition, PartitionId, PlacementGraph};
use crate::config::TopologyConfig;
use crate::error::{Error, Result};

/// TopologyBuilder creates a [`PlacementGraph`] from host descriptions.
///
/// Partitions are created in ascending id order. Each partition takes
/// `kfactor + 1` distinct hosts, preferring hosts far apart in the HA group
/// tree, and consecutive partitions reuse the same host set while it has
/// room, so partition groups stay contiguous. Leaders are then spread so
/// that live hosts lead within one partition of each other.
///
/// All iteration is over sorted maps: the same input always gives the same
/// graph, however many threads build it concurrently.
#[derive(Clone, Debug, Default)]
pub struct TopologyBuilder {
    config: TopologyConfig,
    hosts: BTreeMap<HostId, HostInfo>,
    live_host_ids: Option<BTreeSet<HostId>>,
}

impl TopologyBuilder {
    pub fn new(config: TopologyConfig) -> TopologyBuilder {
        TopologyBuilder {
            config,
            ..Default::default()
        }
    }

    pub fn with_host(mut self, id: HostId, info: HostInfo) -> TopologyBuilder {
        self.hosts.insert(id, info);
        self
    }

    pub fn with_hosts<I>(mut self, hosts: I) -> TopologyBuilder
    where
        I: IntoIterator<Item = (HostId, HostInfo)>,
    {
        self.hosts.extend(hosts);
        self
    }

    /// Hosts outside `live` are marked missing. Without a live set every host is live.
    pub fn with_live_hosts<I>(mut self, live: I) -> TopologyBuilder
    where
        I: IntoIterator<Item = HostId>,
    {
        self.live_host_ids = Some(live.into_iter().collect());
        self
    }

    pub fn build(&self) -> Result<PlacementGraph> {
        let replica_count = self.config.replica_count()?;
        let partition_count = check_request(&self.hosts, replica_count)?;
        let distances = Distances::new(&self.hosts);

        let restoring = self.config.restore_placement
            && self.hosts.values().any(|info| info.partition_ids.is_some());
        let placement = if restoring {
            place_restored(&self.hosts, replica_count, partition_count, &distances)?
        } else {
            place_fresh(&self.hosts, replica_count, partition_count, &distances)?
        };

        let live: BTreeSet<HostId> = match &self.live_host_ids {
            Some(live) => live.clone(),
            None => self.hosts.keys().copied().collect(),
        };
        let replicas: BTreeMap<PartitionId, BTreeSet<HostId>> = placement
            .into_iter()
            .enumerate()
            .map(|(id, hosts)| (id as PartitionId, hosts))
            .collect();
        let leaders = assign_leaders(&replicas, &live, &BTreeMap::new());

        let hosts = self
            .hosts
            .iter()
            .map(|(id, info)| {
                let host = Host {
                    id: *id,
                    ip: info.ip.clone(),
                    ha_group: info.ha_group.clone(),
                    site_count: info.site_count,
                    is_missing: !live.contains(id),
                };
                (*id, host)
            })
            .collect();

        debug!(
            hosts = self.hosts.len(),
            partition_count,
            kfactor = self.config.kfactor,
            restoring,
            "built topology"
        );

        PlacementGraph::assemble(
            0,
            self.config.kfactor,
            hosts,
            partitions_from(replicas, &leaders),
        )
    }
}

/// Check that `hosts` can carry full replica groups and return the partition count.
pub(crate) fn check_request(hosts: &BTreeMap<HostId, HostInfo>, replica_count: u32) -> Result<u32> {
    let total_sites = hosts
        .values()
        .try_fold(0u32, |total, info| total.checked_add(info.site_count))
        .ok_or_else(|| Error::InvalidTopology("total site count is out of range".to_string()))?;
    if total_sites % replica_count != 0 {
        return Err(Error::InvalidTopology(format!(
            "{total_sites} sites cannot be split into groups of {replica_count} replicas"
        )));
    }
    let partition_count = total_sites / replica_count;
    if partition_count == 0 {
        return Err(Error::InvalidTopology("no sites to place partitions on".to_string()));
    }

    let usable = hosts.values().filter(|info| info.site_count > 0).count();
    if usable < replica_count as usize {
        return Err(Error::InvalidTopology(format!(
            "{usable} hosts cannot hold {replica_count} distinct replicas of a partition"
        )));
    }
    // a host holds at most one replica of each partition
    if let Some((id, info)) = hosts.iter().find(|(_, info)| info.site_count > partition_count) {
        return Err(Error::InvalidTopology(format!(
            "host {id} has {} sites but there are only {partition_count} partitions",
            info.site_count
        )));
    }
    Ok(partition_count)
}

/// Fresh placement of `partition_count` partitions on `hosts`.
///
/// A host whose remaining sites equal the number of partitions still to
/// place must take the current one, which keeps every later step solvable.
/// Partitions left crowded into one HA group are then fixed by swapping
/// replicas with other partitions.
pub(crate) fn place_fresh(
    hosts: &BTreeMap<HostId, HostInfo>,
    replica_count: u32,
    partition_count: u32,
    distances: &Distances,
) -> Result<Vec<BTreeSet<HostId>>> {
    let mut remaining: BTreeMap<HostId, u32> = hosts
        .iter()
        .map(|(id, info)| (*id, info.site_count))
        .collect();
    let mut placement: Vec<BTreeSet<HostId>> = Vec::with_capacity(partition_count as usize);

    for partition in 0..partition_count {
        let left = partition_count - partition;
        let tight: BTreeSet<HostId> = remaining
            .iter()
            .filter(|(_, sites)| **sites == left)
            .map(|(id, _)| *id)
            .collect();
        if tight.len() > replica_count as usize {
            return Err(Error::InvalidTopology(format!(
                "{} hosts must all hold partition {partition}",
                tight.len()
            )));
        }

        let reusable = placement.last().filter(|previous| {
            tight.is_subset(previous)
                && previous
                    .iter()
                    .all(|id| remaining.get(id).is_some_and(|sites| *sites > 0))
        });
        let chosen = match reusable {
            Some(previous) => previous.clone(),
            None => {
                let mut chosen = tight;
                while chosen.len() < replica_count as usize {
                    let next = pick_spread_host(&chosen, &remaining, distances).ok_or_else(|| {
                        Error::InvalidTopology(format!("no host left for partition {partition}"))
                    })?;
                    chosen.insert(next);
                }
                chosen
            }
        };

        for id in &chosen {
            if let Some(sites) = remaining.get_mut(id) {
                *sites -= 1;
            }
        }
        trace!(partition, hosts = ?chosen, "placed partition");
        placement.push(chosen);
    }

    spread_replicas(hosts, &mut placement);
    Ok(placement)
}

/// Swap replicas between partitions while a swap lowers the HA imbalance.
///
/// A partition is imbalanced in a group when its replica count there is
/// more than one away from the group's share of all sites, the rule
/// `validate_layout` checks. Every swap strictly lowers the summed
/// imbalance, so the loop ends. Site counts are unchanged by a swap.
fn spread_replicas(hosts: &BTreeMap<HostId, HostInfo>, placement: &mut [BTreeSet<HostId>]) {
    let partition_count = placement.len() as u64;
    let mut group_sites: BTreeMap<&str, u64> = BTreeMap::new();
    for info in hosts.values() {
        *group_sites.entry(info.ha_group.as_str()).or_default() += info.site_count as u64;
    }

    let imbalance = |replicas: &BTreeSet<HostId>| -> u64 {
        group_sites
            .iter()
            .map(|(group, sites)| {
                let in_group = replicas
                    .iter()
                    .filter(|id| hosts.get(*id).is_some_and(|info| info.ha_group == *group))
                    .count() as u64;
                (in_group * partition_count)
                    .abs_diff(*sites)
                    .saturating_sub(partition_count)
            })
            .sum()
    };

    while let Some((crowded, host, other, peer)) = find_swap(hosts, placement, &imbalance) {
        placement[crowded].remove(&host);
        placement[crowded].insert(peer);
        placement[other].remove(&peer);
        placement[other].insert(host);
        trace!(crowded, other, host, peer, "swapped replicas to spread ha groups");
    }
}

// first (partition, host, partition, host) swap that lowers the imbalance of both partitions together
fn find_swap(
    hosts: &BTreeMap<HostId, HostInfo>,
    placement: &[BTreeSet<HostId>],
    imbalance: &impl Fn(&BTreeSet<HostId>) -> u64,
) -> Option<(usize, HostId, usize, HostId)> {
    let group = |id: &HostId| hosts.get(id).map(|info| info.ha_group.as_str());
    let before: Vec<u64> = placement.iter().map(imbalance).collect();

    for (crowded, replicas) in placement.iter().enumerate() {
        if before[crowded] == 0 {
            continue;
        }
        for host in replicas {
            for (other, peers) in placement.iter().enumerate() {
                if other == crowded || peers.contains(host) {
                    continue;
                }
                for peer in peers {
                    if replicas.contains(peer) || group(peer) == group(host) {
                        continue;
                    }
                    let mut crowded_after = replicas.clone();
                    crowded_after.remove(host);
                    crowded_after.insert(*peer);
                    let mut other_after = peers.clone();
                    other_after.remove(peer);
                    other_after.insert(*host);

                    if imbalance(&crowded_after) + imbalance(&other_after)
                        < before[crowded] + before[other]
                    {
                        return Some((crowded, *host, other, *peer));
                    }
                }
            }
        }
    }
    None
}

// the free host farthest from `chosen`, then the one with most free sites, then the lowest id
fn pick_spread_host(
    chosen: &BTreeSet<HostId>,
    remaining: &BTreeMap<HostId, u32>,
    distances: &Distances,
) -> Option<HostId> {
    remaining
        .iter()
        .filter(|(id, sites)| **sites > 0 && !chosen.contains(*id))
        .max_by_key(|(id, sites)| {
            let spread = chosen
                .iter()
                .map(|other| distances.get(**id, *other))
                .min()
                .unwrap_or(0);
            (spread, **sites, Reverse(**id))
        })
        .map(|(id, _)| *id)
}

/// Placement that keeps every partition id supplied in `HostInfo::partition_ids`
/// and fills the remaining replicas by free sites, then spread, then id.
fn place_restored(
    hosts: &BTreeMap<HostId, HostInfo>,
    replica_count: u32,
    partition_count: u32,
    distances: &Distances,
) -> Result<Vec<BTreeSet<HostId>>> {
    let mut placement: Vec<BTreeSet<HostId>> = vec![BTreeSet::new(); partition_count as usize];
    let mut remaining: BTreeMap<HostId, u32> = hosts
        .iter()
        .map(|(id, info)| (*id, info.site_count))
        .collect();

    for (id, info) in hosts {
        let Some(partition_ids) = &info.partition_ids else {
            continue;
        };
        // a restored host gets exactly the partitions it lists
        if partition_ids.len() != info.site_count as usize {
            return Err(Error::InvalidTopology(format!(
                "host {id} restores {} partitions but has {} sites",
                partition_ids.len(),
                info.site_count
            )));
        }
        for partition in partition_ids {
            let replicas = placement.get_mut(*partition as usize).ok_or_else(|| {
                Error::InvalidTopology(format!(
                    "host {id} restores partition {partition} but there are only {partition_count} partitions"
                ))
            })?;
            if !replicas.insert(*id) {
                return Err(Error::InvalidTopology(format!(
                    "host {id} lists partition {partition} twice"
                )));
            }
            if replicas.len() > replica_count as usize {
                return Err(Error::InvalidTopology(format!(
                    "partition {partition} is restored on more than {replica_count} hosts"
                )));
            }
            if let Some(sites) = remaining.get_mut(id) {
                *sites -= 1;
            }
        }
    }

    for (partition, replicas) in placement.iter_mut().enumerate() {
        while replicas.len() < replica_count as usize {
            let next = remaining
                .iter()
                .filter(|(id, sites)| **sites > 0 && !replicas.contains(*id))
                .max_by_key(|(id, sites)| {
                    let spread = replicas
                        .iter()
                        .map(|other| distances.get(**id, *other))
                        .min()
                        .unwrap_or(0);
                    (**sites, spread, Reverse(**id))
                })
                .map(|(id, _)| *id)
                .ok_or_else(|| {
                    Error::InvalidTopology(format!(
                        "cannot complete restored placement of partition {partition}"
                    ))
                })?;
            replicas.insert(next);
            if let Some(sites) = remaining.get_mut(&next) {
                *sites -= 1;
            }
        }
    }

    Ok(placement)
}

/// Pick a live leader for every partition so that live hosts lead within one
/// partition of each other wherever the placement allows it.
///
/// Leaders in `current` that are still live replicas are kept; the rest go to
/// the live replica with the fewest leaders. Partitions without any live
/// replica keep their lowest host as leader. Imbalance is then removed by
/// moving leadership along chains of partitions from a most loaded host to a
/// host with at least two fewer leaders.
pub(crate) fn assign_leaders(
    replicas: &BTreeMap<PartitionId, BTreeSet<HostId>>,
    live: &BTreeSet<HostId>,
    current: &BTreeMap<PartitionId, HostId>,
) -> BTreeMap<PartitionId, HostId> {
    let mut counts: BTreeMap<HostId, u32> = replicas
        .values()
        .flatten()
        .filter(|id| live.contains(*id))
        .map(|id| (*id, 0))
        .collect();
    let mut leaders: BTreeMap<PartitionId, HostId> = BTreeMap::new();

    for (partition, hosts) in replicas {
        if let Some(leader) = current
            .get(partition)
            .filter(|leader| hosts.contains(*leader) && live.contains(*leader))
        {
            leaders.insert(*partition, *leader);
            if let Some(count) = counts.get_mut(leader) {
                *count += 1;
            }
        }
    }

    for (partition, hosts) in replicas {
        if leaders.contains_key(partition) {
            continue;
        }
        let candidate = hosts
            .iter()
            .filter(|id| live.contains(*id))
            .min_by_key(|id| (counts.get(*id).copied().unwrap_or(0), **id));
        match candidate {
            Some(leader) => {
                leaders.insert(*partition, *leader);
                if let Some(count) = counts.get_mut(leader) {
                    *count += 1;
                }
            }
            None => {
                if let Some(first) = hosts.first() {
                    trace!(partition, "partition has no live replica");
                    leaders.insert(*partition, *first);
                }
            }
        }
    }

    while shift_leader(replicas, live, &mut leaders, &mut counts) {}

    leaders
}

// one augmenting move; false once no host can give a leader to a host two below it
fn shift_leader(
    replicas: &BTreeMap<PartitionId, BTreeSet<HostId>>,
    live: &BTreeSet<HostId>,
    leaders: &mut BTreeMap<PartitionId, HostId>,
    counts: &mut BTreeMap<HostId, u32>,
) -> bool {
    let (Some(max), Some(min)) = (
        counts.values().max().copied(),
        counts.values().min().copied(),
    ) else {
        return false;
    };
    if max <= min + 1 {
        return false;
    }

    let mut led: BTreeMap<HostId, Vec<PartitionId>> = BTreeMap::new();
    for (partition, leader) in leaders.iter() {
        led.entry(*leader).or_default().push(*partition);
    }

    let sources: Vec<HostId> = counts
        .iter()
        .filter(|(_, count)| **count == max)
        .map(|(id, _)| *id)
        .collect();

    for source in sources {
        let mut via: BTreeMap<HostId, (HostId, PartitionId)> = BTreeMap::new();
        let mut seen = BTreeSet::from([source]);
        let mut queue = VecDeque::from([source]);

        while let Some(host) = queue.pop_front() {
            if counts.get(&host).copied().unwrap_or(max) + 2 <= max {
                let mut to = host;
                while let Some((from, partition)) = via.get(&to).copied() {
                    leaders.insert(partition, to);
                    to = from;
                }
                if let Some(count) = counts.get_mut(&source) {
                    *count -= 1;
                }
                if let Some(count) = counts.get_mut(&host) {
                    *count += 1;
                }
                trace!(from = source, to = host, "moved leadership");
                return true;
            }

            for partition in led.get(&host).into_iter().flatten() {
                let Some(hosts) = replicas.get(partition) else {
                    continue;
                };
                for next in hosts.iter().filter(|id| live.contains(*id)) {
                    if seen.insert(*next) {
                        via.insert(*next, (host, *partition));
                        queue.push_back(*next);
                    }
                }
            }
        }
    }

    false
}

pub(crate) fn partitions_from(
    replicas: BTreeMap<PartitionId, BTreeSet<HostId>>,
    leaders: &BTreeMap<PartitionId, HostId>,
) -> BTreeMap<PartitionId, Partition> {
    replicas
        .into_iter()
        .map(|(id, host_ids)| {
            let leader_host_id = leaders
                .get(&id)
                .copied()
                .or_else(|| host_ids.first().copied())
                .unwrap_or_default();
            (
                id,
                Partition {
                    id,
                    host_ids,
                    leader_host_id,
                },
            )
        })
        .collect()
}

/// Pairwise HA distances between the hosts of one request.
pub(crate) struct Distances(BTreeMap<(HostId, HostId), u32>);

impl Distances {
    pub(crate) fn new(hosts: &BTreeMap<HostId, HostInfo>) -> Distances {
        let groups: BTreeMap<HostId, String> = hosts
            .iter()
            .map(|(id, info)| (*id, info.ha_group.clone()))
            .collect();

        let mut tiers_by_group: BTreeMap<&str, BTreeMap<u32, BTreeSet<HostId>>> = BTreeMap::new();
        let mut matrix = BTreeMap::new();
        for (id, group) in groups.iter() {
            let tiers = tiers_by_group
                .entry(group.as_str())
                .or_insert_with(|| sort_host_ids_by_ha_distance(group, &groups));
            for (distance, others) in tiers.iter() {
                for other in others {
                    matrix.insert((*id, *other), *distance);
                }
            }
        }
        Distances(matrix)
    }

    fn get(&self, a: HostId, b: HostId) -> u32 {
        self.0.get(&(a, b)).copied().unwrap_or(0)
    }
}

/// Number of path segments separating two HA groups below their longest
/// common prefix. Identical paths are at distance 0.
///
/// ```
/// use partition_coordinator::topology::ha_distance;
///
/// assert_eq!(ha_distance("dc1.rack1.node1", "dc1.rack1.node2"), 2);
/// assert_eq!(ha_distance("dc1.rack1", "dc1.rack2.node7"), 3);
/// assert_eq!(ha_distance("dc1", "dc1"), 0);
/// ```
pub fn ha_distance(a: &str, b: &str) -> u32 {
    let a: Vec<&str> = a.split('.').collect();
    let b: Vec<&str> = b.split('.').collect();
    let common = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    (a.len() - common + b.len() - common) as u32
}

/// Group host ids by their HA distance from `group`, nearest tier first.
/// Ids within a tier are ascending; callers wanting the farthest hosts first
/// iterate the tiers in reverse.
pub fn sort_host_ids_by_ha_distance(
    group: &str,
    host_groups: &BTreeMap<HostId, String>,
) -> BTreeMap<u32, BTreeSet<HostId>> {
    let mut tiers: BTreeMap<u32, BTreeSet<HostId>> = BTreeMap::new();
    for (id, other) in host_groups {
        tiers.entry(ha_distance(group, other)).or_default().insert(*id);
    }
    tiers
}

/// Checks a `host_count x sites_per_host` cluster without HA groups.
pub fn validate_legacy_cluster_config(
    host_count: u32,
    sites_per_host: u32,
    kfactor: u32,
) -> Option<String> {
    if kfactor >= host_count {
        return Some("Not enough nodes to ensure K-Safety.".to_string());
    }
    if (host_count as u64 * sites_per_host as u64) % (kfactor as u64 + 1) != 0 {
        return Some(
            "Total number of sites is not divisible by the number of partitions.".to_string(),
        );
    }
    None
}

impl PlacementGraph {
    /// Describes every layout rule the graph breaks, `None` if it breaks none:
    ///
    /// * every partition has `kfactor + 1` live replicas
    /// * a partition's replica count in an HA group is within one of the
    ///   group's share of all replicas
    /// * live hosts lead within one partition of each other
    pub fn validate_layout(&self) -> Option<String> {
        let mut problems: Vec<String> = vec![];
        let replica_count = self.replica_count() as usize;

        for partition in self.partitions() {
            let live = partition
                .host_ids
                .iter()
                .filter(|id| self.host(**id).is_some_and(|host| !host.is_missing))
                .count();
            if live != replica_count {
                problems.push(format!(
                    "partition {} has {live} live replicas, expected {replica_count}",
                    partition.id
                ));
            }
        }

        let partition_count = self.partition_count() as u64;
        for (group, members) in self.ha_groups() {
            let group_sites: u64 = members
                .iter()
                .filter_map(|id| self.host(*id))
                .map(|host| host.site_count as u64)
                .sum();
            for partition in self.partitions() {
                let in_group = partition.host_ids.intersection(&members).count() as u64;
                if (in_group * partition_count).abs_diff(group_sites) > partition_count {
                    problems.push(format!(
                        "partition {} has {in_group} replicas in ha group {group:?}, which holds {group_sites} of {} replicas",
                        partition.id,
                        partition_count * self.replica_count() as u64
                    ));
                }
            }
        }

        let counts = self.leader_counts();
        if let (Some(max), Some(min)) = (counts.values().max(), counts.values().min()) {
            if max - min > 1 {
                problems.push(format!(
                    "leader counts range from {min} to {max} across live hosts"
                ));
            }
        }

        if problems.is_empty() {
            None
        } else {
            Some(problems.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn hosts(groups: &[(&str, u32)]) -> Vec<(HostId, HostInfo)> {
        groups
            .iter()
            .enumerate()
            .map(|(id, (group, sites))| (id as HostId, HostInfo::new(*group, *sites)))
            .collect()
    }

    fn build(kfactor: u32, groups: &[(&str, u32)]) -> Result<PlacementGraph> {
        TopologyBuilder::new(TopologyConfig::new(kfactor))
            .with_hosts(hosts(groups))
            .build()
    }

    // structural invariants every built graph must hold
    fn assert_consistent(graph: &PlacementGraph) {
        let mut held: BTreeMap<HostId, u32> = BTreeMap::new();
        for partition in graph.partitions() {
            assert_eq!(partition.host_ids.len() as u32, graph.replica_count());
            assert!(partition.host_ids.contains(&partition.leader_host_id));
            for host in &partition.host_ids {
                *held.entry(*host).or_default() += 1;
            }
        }
        for host in graph.hosts() {
            assert_eq!(held.get(&host.id).copied().unwrap_or(0), host.site_count);
        }
        assert_eq!(
            graph.partition_count() * graph.replica_count(),
            graph.sites_total()
        );
    }

    #[test]
    fn two_hosts_two_racks() {
        let graph = build(1, &[("A", 2), ("B", 2)]).unwrap();

        assert_eq!(graph.partition_count(), 2);
        for partition in graph.partitions() {
            assert_eq!(partition.host_ids, BTreeSet::from([0, 1]));
        }
        assert_eq!(graph.leader_counts(), BTreeMap::from([(0, 1), (1, 1)]));
        assert_eq!(graph.validate_layout(), None);
    }

    #[test]
    fn invalid_requests() {
        let too_few_hosts = build(2, &[("A", 3), ("B", 3)]).unwrap_err();
        assert!(too_few_hosts.to_string().contains("Topology request invalid"));

        let indivisible = build(1, &[("A", 3), ("B", 2)]).unwrap_err();
        assert!(indivisible.to_string().contains("Topology request invalid"));

        let crowded = build(1, &[("A", 4), ("B", 1), ("C", 1)]).unwrap_err();
        assert!(matches!(crowded, Error::InvalidTopology(_)));

        assert!(TopologyBuilder::new(TopologyConfig::new(0)).build().is_err());

        let huge_kfactor = TopologyBuilder::new(TopologyConfig::new(u32::MAX))
            .with_hosts(hosts(&[("A", 1), ("B", 1)]))
            .build()
            .unwrap_err();
        assert!(matches!(huge_kfactor, Error::InvalidTopology(_)));

        let huge_sites = build(1, &[("A", u32::MAX), ("B", u32::MAX)]).unwrap_err();
        assert!(huge_sites.to_string().contains("Topology request invalid"));
    }

    #[test]
    fn replicas_spread_across_racks() {
        let graph = build(1, &[("A", 2), ("A", 2), ("B", 2), ("B", 2)]).unwrap();
        let groups = graph.ha_groups();

        for partition in graph.partitions() {
            assert_eq!(partition.host_ids.intersection(&groups["A"]).count(), 1);
            assert_eq!(partition.host_ids.intersection(&groups["B"]).count(), 1);
        }
        assert_eq!(graph.validate_layout(), None);
    }

    #[test]
    fn five_hosts_two_racks() {
        let graph = build(1, &[("A", 2), ("A", 2), ("A", 2), ("B", 2), ("B", 2)]).unwrap();

        assert_eq!(graph.partition_count(), 5);
        assert_consistent(&graph);
        assert_eq!(graph.validate_layout(), None);
        assert!(graph.leader_counts().values().all(|count| *count == 1));
    }

    #[test]
    fn four_racks_three_replicas() {
        let racks = ["r1.a", "r1.b", "r2.a", "r2.b"];
        for sites in [3, 6] {
            let shape: Vec<(&str, u32)> = (0..8).map(|id| (racks[id % racks.len()], sites)).collect();
            let graph = build(2, &shape).unwrap();

            assert_consistent(&graph);
            assert_eq!(graph.validate_layout(), None, "{sites} sites per host");
            for partition in graph.partitions() {
                let groups: BTreeSet<&str> = partition
                    .host_ids
                    .iter()
                    .map(|id| graph.host(*id).unwrap().ha_group.as_str())
                    .collect();
                assert_eq!(groups.len(), 3, "partition {}", partition.id);
            }
        }
    }

    #[test]
    fn spread_swaps_out_crowded_replicas() {
        let shape = hosts(&[("A", 1), ("A", 1), ("B", 1), ("B", 1), ("C", 1), ("C", 1)]);
        let hosts: BTreeMap<HostId, HostInfo> = shape.into_iter().collect();
        let mut placement = vec![
            BTreeSet::from([0, 1]),
            BTreeSet::from([2, 3]),
            BTreeSet::from([4, 5]),
        ];

        spread_replicas(&hosts, &mut placement);

        let mut held: BTreeMap<HostId, u32> = BTreeMap::new();
        for replicas in &placement {
            let groups: BTreeSet<&str> = replicas
                .iter()
                .map(|id| hosts[id].ha_group.as_str())
                .collect();
            assert_eq!(groups.len(), 2, "{replicas:?}");
            for id in replicas {
                *held.entry(*id).or_default() += 1;
            }
        }
        assert_eq!(held.len(), 6);
        assert!(held.values().all(|count| *count == 1));
    }

    #[test]
    fn builds_are_repeatable() {
        let shape = [("r1.a", 3), ("r1.b", 3), ("r2.a", 3), ("r2.b", 3), ("r3", 3)];
        let first = build(2, &shape).unwrap();
        for _ in 0..10 {
            assert_eq!(build(2, &shape).unwrap(), first);
        }
    }

    #[test]
    fn missing_hosts_do_not_lead() {
        let graph = TopologyBuilder::new(TopologyConfig::new(1))
            .with_hosts(hosts(&[("A", 2), ("B", 2)]))
            .with_live_hosts([0])
            .build()
            .unwrap();

        assert!(graph.host(1).unwrap().is_missing);
        assert!(graph.partitions().all(|p| p.leader_host_id == 0));
        assert!(!graph.has_missing_partitions());
        assert!(graph.validate_layout().unwrap().contains("live replicas"));
    }

    #[test]
    fn partitions_without_live_replicas() {
        let graph = TopologyBuilder::new(TopologyConfig::new(0))
            .with_hosts(hosts(&[("A", 1), ("B", 1)]))
            .with_live_hosts([0])
            .build()
            .unwrap();

        assert!(graph.has_missing_partitions());
        assert_eq!(graph.leader_of(1), Some(1));
    }

    #[test]
    fn restore_keeps_supplied_partitions() {
        let original = build(1, &[("A", 2), ("A", 2), ("B", 2), ("B", 2), ("C", 4)]).unwrap();

        let restored = TopologyBuilder::new(TopologyConfig::new(1).with_restore_placement(true))
            .with_hosts(original.host_infos())
            .build()
            .unwrap();

        for host in original.hosts() {
            assert_eq!(
                restored.partitions_for_host(host.id),
                original.partitions_for_host(host.id)
            );
        }
    }

    #[test]
    fn partial_restore_fills_the_rest() {
        let mut shape = hosts(&[("A", 2), ("A", 2), ("B", 2), ("B", 2)]);
        shape[0].1 = shape[0].1.clone().with_partition_ids(vec![2, 3]);

        let restored = TopologyBuilder::new(TopologyConfig::new(1).with_restore_placement(true))
            .with_hosts(shape.clone())
            .build()
            .unwrap();
        assert_consistent(&restored);
        assert_eq!(
            restored.partitions_for_host(0),
            Some(&BTreeSet::from([2, 3]))
        );

        // without restore placement the hints are ignored
        let fresh = TopologyBuilder::new(TopologyConfig::new(1))
            .with_hosts(shape.clone())
            .build()
            .unwrap();
        assert_eq!(fresh.partitions_for_host(0), Some(&BTreeSet::from([0, 1])));

        shape[1].1 = shape[1].1.clone().with_partition_ids(vec![9]);
        let error = TopologyBuilder::new(TopologyConfig::new(1).with_restore_placement(true))
            .with_hosts(shape)
            .build()
            .unwrap_err();
        assert!(error.to_string().contains("Topology request invalid"));
    }

    #[test]
    fn restored_hosts_list_every_site() {
        let shape = vec![
            (0, HostInfo::new("A", 2).with_partition_ids(vec![0])),
            (1, HostInfo::new("B", 2)),
            (2, HostInfo::new("C", 2)),
        ];

        let error = TopologyBuilder::new(TopologyConfig::new(1).with_restore_placement(true))
            .with_hosts(shape.clone())
            .build()
            .unwrap_err();
        assert!(error.to_string().contains("host 0 restores 1 partitions but has 2 sites"));

        // hints are only checked when restoring
        assert!(
            TopologyBuilder::new(TopologyConfig::new(1))
                .with_hosts(shape)
                .build()
                .is_ok()
        );
    }

    #[test]
    fn ha_distance_counts_diverging_segments() {
        assert_eq!(ha_distance("a.b.c", "a.b.c"), 0);
        assert_eq!(ha_distance("a.b", "a"), 1);
        assert_eq!(ha_distance("a.b", "c.d"), 4);
        assert_eq!(ha_distance("", "x"), 2);
    }

    #[test]
    fn host_ids_sorted_by_distance() {
        let groups: BTreeMap<HostId, String> = [(0, "r1.a"), (1, "r1.b"), (2, "r2.a"), (3, "r1.a")]
            .into_iter()
            .map(|(id, group)| (id, group.to_string()))
            .collect();

        let tiers = sort_host_ids_by_ha_distance("r1.a", &groups);
        let expected: BTreeMap<u32, BTreeSet<HostId>> = [
            (0, BTreeSet::from([0, 3])),
            (2, BTreeSet::from([1])),
            (4, BTreeSet::from([2])),
        ]
        .into_iter()
        .collect();
        assert_eq!(tiers, expected);
        assert_eq!(tiers.values().next_back(), Some(&BTreeSet::from([2])));
    }

    #[test]
    fn legacy_config() {
        assert_eq!(validate_legacy_cluster_config(3, 4, 1), None);
        assert_eq!(
            validate_legacy_cluster_config(2, 4, 2).as_deref(),
            Some("Not enough nodes to ensure K-Safety.")
        );
        assert_eq!(
            validate_legacy_cluster_config(3, 3, 1).as_deref(),
            Some("Total number of sites is not divisible by the number of partitions.")
        );
        assert_eq!(validate_legacy_cluster_config(u32::MAX, u32::MAX, 0), None);
        assert!(validate_legacy_cluster_config(u32::MAX, 3, u32::MAX - 2).is_some());
    }

    #[test]
    fn leader_balance_moves_along_chains() {
        // host 0 starts with two leaders and host 2 with none
        let replicas = BTreeMap::from([
            (0, BTreeSet::from([0, 1])),
            (1, BTreeSet::from([0, 2])),
            (2, BTreeSet::from([1, 2])),
        ]);
        let current = BTreeMap::from([(0, 0), (1, 0), (2, 1)]);
        let live = BTreeSet::from([0, 1, 2]);

        let leaders = assign_leaders(&replicas, &live, &current);
        let mut counts: BTreeMap<HostId, u32> = BTreeMap::new();
        for leader in leaders.values() {
            *counts.entry(*leader).or_default() += 1;
        }
        assert_eq!(counts, BTreeMap::from([(0, 1), (1, 1), (2, 1)]));
    }

    #[test]
    fn random_shapes() {
        let racks = ["r1.a", "r1.b", "r2.a", "r2.b", "r3"];
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..200 {
            let kfactor = rng.random_range(0..=2);
            let host_count = rng.random_range(1..=9);
            let uniform = rng.random_bool(0.5);
            let uniform_sites = rng.random_range(1..=6);
            let shape: Vec<(&str, u32)> = (0..host_count)
                .map(|_| {
                    let sites = if uniform {
                        uniform_sites
                    } else {
                        rng.random_range(1..=6)
                    };
                    (racks[rng.random_range(0..racks.len())], sites)
                })
                .collect();

            let replica_count = kfactor + 1;
            let total: u32 = shape.iter().map(|(_, sites)| sites).sum();
            let partitions = total / replica_count;
            let feasible = total % replica_count == 0
                && host_count >= replica_count
                && shape.iter().all(|(_, sites)| *sites <= partitions);

            match build(kfactor, &shape) {
                Ok(graph) => {
                    assert!(feasible, "{shape:?} k={kfactor} should be rejected");
                    assert_consistent(&graph);
                    if uniform {
                        let counts = graph.leader_counts();
                        let max = counts.values().max().copied().unwrap_or(0);
                        let min = counts.values().min().copied().unwrap_or(0);
                        assert!(max - min <= 1, "{shape:?} k={kfactor}: {counts:?}");
                        assert_eq!(graph.validate_layout(), None, "{shape:?} k={kfactor}");
                    }
                }
                Err(error) => {
                    assert!(!feasible, "{shape:?} k={kfactor}: {error}");
                    assert!(matches!(error, Error::InvalidTopology(_)));
                }
            }
        }
    }
}
