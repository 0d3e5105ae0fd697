//! basic example to showcase routing keys with a Hashinator and growing it by one partition

extern crate partition_coordinator;
use partition_coordinator::{Hashinator, ParameterValue, ValueType};

fn main() {
    let hashinator = Hashinator::new(3).unwrap();

    // return the partition that stores the key 'foo'
    println!(
        "partition for key foo: {}",
        hashinator
            .partition_for_parameter(ValueType::String, &"foo".into())
            .unwrap()
    );

    // numbers route the same way whether they arrive as numbers, strings or bytes
    let values: [ParameterValue; 3] = [
        1_000_000i64.into(),
        "1000000".into(),
        1_000_000i64.to_be_bytes().to_vec().into(),
    ];
    for value in values {
        println!(
            "partition for {value:?}: {}",
            hashinator
                .partition_for_parameter(ValueType::BigInt, &value)
                .unwrap()
        );
    }

    // return the token ranges owned by each partition
    for partition in 0..hashinator.partition_count() {
        let ranges = hashinator.ring().coalesced_ranges(partition);
        println!("partition {partition} owns {} ranges, first {}", ranges.len(), ranges[0]);
    }

    let grown = hashinator.add_partitions(1).unwrap();
    println!(
        "version {} -> {}, signature {} -> {}",
        hashinator.version(),
        grown.version(),
        hashinator.signature(),
        grown.signature()
    );

    // return the ranges partition 3 has to fetch, and where to fetch them from
    for handoff in grown.ring().find_sources(3, hashinator.ring()).iter().take(5) {
        println!("copy {} from partition {}", handoff.range, handoff.source);
    }
}
