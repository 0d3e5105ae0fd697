//! Partitioning core of a replicated, partitioned database cluster.
//!
//! Two independent structures decide where data lives:
//!
//! * [`Hashinator`] routes a typed key value to a partition id. It hashes the
//!   normalized value to a 32-bit token and looks the token up on an elastic
//!   [`HashRing`], which can grow by partitions while moving as few tokens as
//!   possible.
//! * [`PlacementGraph`] maps every partition to `kfactor + 1` replica hosts
//!   spread over HA groups, with one live leader each. [`TopologyBuilder`]
//!   creates graphs, [`TopologyMutator`] derives new ones when hosts are
//!   added, removed or replaced, and [`PartitionGroups`] lists the runs of
//!   partitions sharing a host set.
//!
//! Everything is a value: operations take immutable input and return new
//! rings and graphs, so they can run concurrently from any number of threads
//! and always produce the same output for the same input.
//!
//! ```
//! use partition_coordinator::{Hashinator, HostInfo, TopologyBuilder, TopologyConfig, ValueType};
//!
//! let graph = TopologyBuilder::new(TopologyConfig::new(1))
//!     .with_host(0, HostInfo::new("rack1", 2))
//!     .with_host(1, HostInfo::new("rack2", 2))
//!     .build()
//!     .unwrap();
//! let hashinator = Hashinator::new(graph.partition_count()).unwrap();
//!
//! let partition = hashinator
//!     .partition_for_parameter(ValueType::BigInt, &42i64.into())
//!     .unwrap();
//! let leader = graph.leader_of(partition).unwrap();
//! assert!(graph.partition(partition).unwrap().host_ids.contains(&leader));
//! ```

pub mod config;
pub mod error;
pub mod hashinator;
pub mod hashring;
pub mod topology;

pub use config::{DEFAULT_TOTAL_TOKENS, HashinatorConfig, TopologyConfig};
pub use error::{Error, Result};
pub use hashinator::{ConfigFormat, Hashinator, ParameterValue, PartitionKey, ValueType};
pub use hashring::coordinator::{Handoff, merge_ranges};
pub use hashring::{HashRing, TokenRange};
pub use topology::{
    Host, HostId, HostInfo, Partition, PartitionGroup, PartitionGroups, PartitionId,
    PlacementGraph, TopologyBuilder, TopologyMutator,
};
