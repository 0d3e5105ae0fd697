//! brief example how a Hashinator and a PlacementGraph can be used together to coordinate a cluster if
//! - hosts are added to the cluster (and with them new partitions)
//! - a host fails and is replaced by a new one

extern crate partition_coordinator;

use partition_coordinator::{
    Hashinator, HostId, HostInfo, PartitionId, PlacementGraph, TopologyBuilder, TopologyConfig,
    TopologyMutator, ValueType,
};
use rand::{Rng, distr::Alphanumeric};
use std::collections::{BTreeMap, BTreeSet, HashMap};

fn main() {
    // each partition is stored on (1 + kfactor) hosts
    let kfactor = 1;

    // create our initial cluster of 4 hosts in 2 racks, 4 sites each
    let mut coordinator = Coordinator::new(
        kfactor,
        vec![
            (0, HostInfo::new("rack1", 4).with_ip("127.0.0.1")),
            (1, HostInfo::new("rack1", 4).with_ip("127.0.0.2")),
            (2, HostInfo::new("rack2", 4).with_ip("127.0.0.3")),
            (3, HostInfo::new("rack2", 4).with_ip("127.0.0.4")),
        ],
    );

    // store all known keys to test later if we can retrieve all of them
    let mut known_keys = vec![];

    for _ in 0..10000 {
        let value = random_string();
        let key = format!("key_{value}");
        known_keys.push(key.clone());
        coordinator.post(key, value);
    }

    println!("\n# distribution of keys across cluster");
    coordinator.print_utilization();
    coordinator.check(&known_keys);

    // add two hosts in a third rack, which adds (2 * 4) / 2 = 4 partitions
    coordinator.add_hosts(vec![
        (4, HostInfo::new("rack3", 4).with_ip("127.0.0.5")),
        (5, HostInfo::new("rack3", 4).with_ip("127.0.0.6")),
    ]);

    println!("\n# distribution of keys across cluster, after hosts joined and ranges moved");
    coordinator.print_utilization();
    coordinator.check(&known_keys);

    // host 1 dies, a new host 6 takes over its partitions
    coordinator.replace_host(1, 6);

    println!("\n# distribution of keys across cluster, after host 1 was replaced");
    coordinator.print_utilization();
    coordinator.check(&known_keys);

    if let Some(problems) = coordinator.graph.validate_layout() {
        println!("layout problems: {problems}");
    }
    println!("\n{}", coordinator.graph.to_json_pretty().unwrap());
}

/// struct Node represents a real server of our cluster. It stores key/value pairs per partition
#[derive(Default)]
struct Node {
    partitions: BTreeMap<PartitionId, HashMap<String, String>>,
}

impl Node {
    /// simulate a http POST call to store a given key/value pair
    fn post(&mut self, partition: PartitionId, key: String, value: String) {
        self.partitions.entry(partition).or_default().insert(key, value);
    }

    /// simulate a http GET call to retrieve the value for given key
    fn get(&self, partition: PartitionId, key: &str) -> Option<&String> {
        self.partitions.get(&partition).and_then(|store| store.get(key))
    }

    /// returns all (key, value) pairs of `partition` whose token passes `filter`
    fn fetch(&self, partition: PartitionId, filter: impl Fn(&str) -> bool) -> Vec<(String, String)> {
        self.partitions
            .get(&partition)
            .into_iter()
            .flatten()
            .filter(|(key, _)| filter(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn drop_keys(&mut self, partition: PartitionId, keys: &[String]) {
        if let Some(store) = self.partitions.get_mut(&partition) {
            for key in keys {
                store.remove(key);
            }
        }
    }

    /// returns the amount of stored values
    fn size(&self) -> usize {
        self.partitions.values().map(HashMap::len).sum()
    }
}

/// struct Coordinator keeps track of all hosts in our cluster
/// it routes post and get calls to the replicas of a key's partition
/// and moves entries when partitions or hosts change
struct Coordinator {
    hashinator: Hashinator,
    graph: PlacementGraph,
    nodes: BTreeMap<HostId, Node>,
}

impl Coordinator {
    fn new(kfactor: u32, hosts: Vec<(HostId, HostInfo)>) -> Self {
        let graph = TopologyBuilder::new(TopologyConfig::new(kfactor))
            .with_hosts(hosts)
            .build()
            .unwrap();
        let hashinator = Hashinator::new(graph.partition_count()).unwrap();
        let nodes = graph.hosts().map(|host| (host.id, Node::default())).collect();

        Coordinator {
            hashinator,
            graph,
            nodes,
        }
    }

    fn token(&self, key: &str) -> i32 {
        self.hashinator
            .token_for_parameter(ValueType::String, &key.into())
            .unwrap()
    }

    fn partition(&self, key: &str) -> PartitionId {
        self.hashinator.partition_for_token(self.token(key))
    }

    fn live_replicas(&self, partition: PartitionId) -> Vec<HostId> {
        self.graph
            .partition(partition)
            .map(|p| {
                p.host_ids
                    .iter()
                    .copied()
                    .filter(|id| self.graph.host(*id).is_some_and(|host| !host.is_missing))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// simulate a http POST call to store a given key/value pair
    fn post(&mut self, key: String, value: String) {
        let partition = self.partition(&key);
        for host in self.live_replicas(partition) {
            if let Some(node) = self.nodes.get_mut(&host) {
                node.post(partition, key.clone(), value.clone());
            }
        }
    }

    /// returns Ok if every live replica holds the key, or Err(usize) with the amount of replicas missing it
    fn test_get(&self, key: &str) -> Result<(), usize> {
        let partition = self.partition(key);
        let missing = self
            .live_replicas(partition)
            .iter()
            .filter(|host| {
                self.nodes
                    .get(*host)
                    .and_then(|node| node.get(partition, key))
                    .is_none()
            })
            .count();

        match missing {
            0 => Ok(()),
            _ => Err(missing),
        }
    }

    fn check(&self, keys: &[String]) {
        for key in keys {
            if let Err(missing) = self.test_get(key) {
                println!("error: {key} not found on {missing} hosts");
            }
        }
    }

    /// add hosts and as many partitions as their sites allow, then stream
    /// every range that moved from its previous owner to the new partitions
    fn add_hosts(&mut self, hosts: Vec<(HostId, HostInfo)>) {
        let (graph, added) = TopologyMutator::new(&self.graph).add_hosts(&hosts).unwrap();
        let grown = self.hashinator.add_partitions(added.len() as u32).unwrap();
        assert_eq!(grown.partition_count(), graph.partition_count());

        for (id, _) in &hosts {
            self.nodes.insert(*id, Node::default());
        }
        let previous = std::mem::replace(&mut self.hashinator, grown);
        self.graph = graph;

        for target in added {
            for handoff in self.hashinator.ring().find_sources(target, previous.ring()) {
                let Some(leader) = self.graph.leader_of(handoff.source) else {
                    continue;
                };
                let values = self.nodes[&leader].fetch(handoff.source, |key| {
                    handoff.range.contains(self.token(key))
                });
                let moved: Vec<String> = values.iter().map(|(key, _)| key.clone()).collect();

                for host in self.live_replicas(target) {
                    if let Some(node) = self.nodes.get_mut(&host) {
                        for (key, value) in &values {
                            node.post(target, key.clone(), value.clone());
                        }
                    }
                }
                for host in self.live_replicas(handoff.source) {
                    if let Some(node) = self.nodes.get_mut(&host) {
                        node.drop_keys(handoff.source, &moved);
                    }
                }
            }
        }
    }

    /// mark `failed` missing, replace it with `replacement` and copy its partitions from surviving replicas
    fn replace_host(&mut self, failed: HostId, replacement: HostId) {
        let removed = TopologyMutator::new(&self.graph).remove_host(failed).unwrap();
        let group = removed.host(failed).unwrap().ha_group.clone();
        let live: BTreeSet<HostId> = removed.live_host_ids();

        let recovered = TopologyMutator::new(&removed)
            .recover_host(&live, replacement, &group, None)
            .unwrap();
        self.nodes.remove(&failed);
        self.nodes.insert(replacement, Node::default());
        self.graph = recovered;

        let partitions: Vec<PartitionId> = self
            .graph
            .partitions_for_host(replacement)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        for partition in partitions {
            let Some(source) = self
                .live_replicas(partition)
                .into_iter()
                .find(|id| *id != replacement)
            else {
                continue;
            };
            let values = self.nodes[&source].fetch(partition, |_| true);
            if let Some(node) = self.nodes.get_mut(&replacement) {
                for (key, value) in values {
                    node.post(partition, key, value);
                }
            }
        }
    }

    /// print for each host how many values it currently stores
    fn print_utilization(&self) {
        for (id, node) in &self.nodes {
            let ip = self.graph.host(*id).map(|host| host.ip.as_str()).unwrap_or("?");
            println!("host {id} ({ip}) contains {} values", node.size())
        }
    }
}

/// generate a random String to test that our values are stored, retrieved and moved correctly
fn random_string() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(char::from)
        .collect()
}
