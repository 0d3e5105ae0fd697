use std::collections::BTreeSet;

use partition_coordinator::{
    ConfigFormat, Hashinator, HostInfo, PlacementGraph, TopologyBuilder, TopologyConfig,
    TopologyMutator, ValueType,
};
use pretty_assertions::assert_eq;

fn cluster() -> PlacementGraph {
    TopologyBuilder::new(TopologyConfig::new(1))
        .with_host(0, HostInfo::new("rack1", 3))
        .with_host(1, HostInfo::new("rack2", 3))
        .with_host(2, HostInfo::new("rack3", 2))
        .build()
        .unwrap()
}

#[test]
fn hosts_and_partitions_grow_together() {
    let graph = cluster();
    let hashinator = Hashinator::new(graph.partition_count()).unwrap();
    assert_eq!(graph.partition_count(), 4);

    let (grown_graph, added) = TopologyMutator::new(&graph)
        .add_hosts(&[(3, HostInfo::new("rack4", 2)), (4, HostInfo::new("rack5", 2))])
        .unwrap();
    let grown = hashinator.add_partitions(added.len() as u32).unwrap();

    assert_eq!(added, vec![4, 5]);
    assert_eq!(grown.partition_count(), grown_graph.partition_count());
    assert_eq!(grown.version(), hashinator.version() + 1);
    assert_eq!(grown_graph.version(), graph.version() + 1);

    // every key routes to a partition with a live leader
    for key in 0..1000i64 {
        let partition = grown
            .partition_for_parameter(ValueType::BigInt, &key.into())
            .unwrap();
        let leader = grown_graph.leader_of(partition).unwrap();
        assert!(!grown_graph.host(leader).unwrap().is_missing);
    }

    // keys either stay where they were or move to one of the new partitions
    for key in 0..1000i64 {
        let before = hashinator
            .partition_for_parameter(ValueType::BigInt, &key.into())
            .unwrap();
        let after = grown
            .partition_for_parameter(ValueType::BigInt, &key.into())
            .unwrap();
        assert!(after == before || added.contains(&after));
    }

    // the new partitions receive exactly what the handoffs describe
    for target in &added {
        let moved: u64 = grown
            .ring()
            .find_sources(*target, hashinator.ring())
            .iter()
            .map(|handoff| handoff.range.width())
            .sum();
        let owned: u64 = grown.ranges(*target).iter().map(|range| range.width()).sum();
        assert_eq!(moved, owned);
    }
}

#[test]
fn hashinator_survives_a_config_round_trip_after_growth() {
    let grown = Hashinator::new(4).unwrap().add_partitions(2).unwrap();

    for format in [ConfigFormat::Raw, ConfigFormat::Cooked] {
        let bytes = grown.config_bytes(format).unwrap();
        let decoded = Hashinator::from_config_bytes(&bytes, format, grown.version()).unwrap();
        assert_eq!(decoded.signature(), grown.signature());
        for key in ["a", "b", "key_17", ""] {
            assert_eq!(
                decoded
                    .partition_for_parameter(ValueType::String, &key.into())
                    .unwrap(),
                grown
                    .partition_for_parameter(ValueType::String, &key.into())
                    .unwrap()
            );
        }
    }
}

#[test]
fn failed_host_is_replaced_and_persisted() {
    let graph = cluster();
    let removed = TopologyMutator::new(&graph).remove_host(1).unwrap();
    assert!(removed.validate_layout().is_some());

    let live: BTreeSet<u32> = removed.live_host_ids();
    assert!(
        TopologyMutator::new(&removed)
            .recover_host(&live, 9, "rack9", None)
            .is_none()
    );

    let recovered = TopologyMutator::new(&removed)
        .recover_host(&live, 9, "rack2", None)
        .unwrap();
    assert_eq!(recovered.partitions_for_host(9), graph.partitions_for_host(1));
    assert_eq!(recovered.validate_layout(), None);

    let json = recovered.to_json().unwrap();
    let decoded = PlacementGraph::from_json(&json).unwrap();
    assert_eq!(decoded, recovered);

    let restored = TopologyBuilder::new(TopologyConfig::new(1).with_restore_placement(true))
        .with_hosts(decoded.host_infos())
        .build()
        .unwrap();
    for host in recovered.hosts() {
        assert_eq!(
            restored.partitions_for_host(host.id),
            recovered.partitions_for_host(host.id)
        );
    }
}
