//! JSON document of a placement graph.
//!
//! The document carries the derived counts (`hostCount`, `partitionCount`,
//! `replicationFactor`, `sitesPerHost`, `hasMissingPartitions`) next to the
//! hosts and partitions so control-plane readers do not need to recompute
//! them. Decoding rebuilds the graph and rejects documents whose counts or
//! host partition lists disagree with the partitions.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{Host, HostId, Partition, PartitionId, PlacementGraph};
use crate::error::{Error, Result};

const FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopologyDocument {
    format: u32,
    version: u64,
    host_count: u32,
    partition_count: u32,
    /// extra replicas per partition (the k-factor)
    replication_factor: u32,
    sites_per_host: u32,
    has_missing_partitions: bool,
    ha_groups: Vec<HaGroupDocument>,
    partitions: Vec<PartitionDocument>,
    hosts: Vec<HostDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HaGroupDocument {
    name: String,
    host_ids: Vec<HostId>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartitionDocument {
    id: PartitionId,
    leader_host_id: HostId,
    host_ids: Vec<HostId>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostDocument {
    id: HostId,
    #[serde(default)]
    ip: String,
    ha_group: String,
    target_site_count: u32,
    #[serde(default)]
    is_missing: bool,
    partitions: Vec<PartitionId>,
}

fn mismatch(field: &str, document: impl std::fmt::Display, derived: impl std::fmt::Display) -> Error {
    Error::InvalidTopology(format!(
        "{field} is {document} in the document but {derived} in the graph"
    ))
}

impl PlacementGraph {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_document())?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    fn to_document(&self) -> TopologyDocument {
        TopologyDocument {
            format: FORMAT,
            version: self.version(),
            host_count: self.host_count(),
            partition_count: self.partition_count(),
            replication_factor: self.kfactor(),
            sites_per_host: self.sites_per_host(),
            has_missing_partitions: self.has_missing_partitions(),
            ha_groups: self
                .ha_groups()
                .into_iter()
                .map(|(name, host_ids)| HaGroupDocument {
                    name,
                    host_ids: host_ids.into_iter().collect(),
                })
                .collect(),
            partitions: self
                .partitions()
                .map(|partition| PartitionDocument {
                    id: partition.id,
                    leader_host_id: partition.leader_host_id,
                    host_ids: partition.host_ids.iter().copied().collect(),
                })
                .collect(),
            hosts: self
                .hosts()
                .map(|host| HostDocument {
                    id: host.id,
                    ip: host.ip.clone(),
                    ha_group: host.ha_group.clone(),
                    target_site_count: host.site_count,
                    is_missing: host.is_missing,
                    partitions: self
                        .partitions_for_host(host.id)
                        .map(|ids| ids.iter().copied().collect())
                        .unwrap_or_default(),
                })
                .collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<PlacementGraph> {
        let document: TopologyDocument = serde_json::from_str(json)?;
        if document.format != FORMAT {
            return Err(Error::InvalidTopology(format!(
                "unknown topology format {}",
                document.format
            )));
        }

        let mut hosts: BTreeMap<HostId, Host> = BTreeMap::new();
        let mut listed: BTreeMap<HostId, BTreeSet<PartitionId>> = BTreeMap::new();
        for host in document.hosts {
            listed.insert(host.id, host.partitions.into_iter().collect());
            let previous = hosts.insert(
                host.id,
                Host {
                    id: host.id,
                    ip: host.ip,
                    ha_group: host.ha_group,
                    site_count: host.target_site_count,
                    is_missing: host.is_missing,
                },
            );
            if previous.is_some() {
                return Err(Error::InvalidTopology(format!(
                    "host {} is listed twice",
                    host.id
                )));
            }
        }

        let mut partitions: BTreeMap<PartitionId, Partition> = BTreeMap::new();
        for partition in document.partitions {
            let id = partition.id;
            let previous = partitions.insert(
                id,
                Partition {
                    id,
                    host_ids: partition.host_ids.into_iter().collect(),
                    leader_host_id: partition.leader_host_id,
                },
            );
            if previous.is_some() {
                return Err(Error::InvalidTopology(format!("partition {id} is listed twice")));
            }
        }

        let graph = PlacementGraph::assemble(
            document.version,
            document.replication_factor,
            hosts,
            partitions,
        )?;

        for (id, partitions) in listed {
            if graph.partitions_for_host(id) != Some(&partitions) {
                return Err(Error::InvalidTopology(format!(
                    "partition list of host {id} disagrees with the partitions"
                )));
            }
        }
        if document.host_count != graph.host_count() {
            return Err(mismatch("hostCount", document.host_count, graph.host_count()));
        }
        if document.partition_count != graph.partition_count() {
            return Err(mismatch(
                "partitionCount",
                document.partition_count,
                graph.partition_count(),
            ));
        }
        if document.sites_per_host != graph.sites_per_host() {
            return Err(mismatch(
                "sitesPerHost",
                document.sites_per_host,
                graph.sites_per_host(),
            ));
        }
        if document.has_missing_partitions != graph.has_missing_partitions() {
            return Err(mismatch(
                "hasMissingPartitions",
                document.has_missing_partitions,
                graph.has_missing_partitions(),
            ));
        }
        let groups: Vec<(String, Vec<HostId>)> = graph
            .ha_groups()
            .into_iter()
            .map(|(name, ids)| (name, ids.into_iter().collect()))
            .collect();
        let listed_groups: Vec<(String, Vec<HostId>)> = document
            .ha_groups
            .into_iter()
            .map(|group| (group.name, group.host_ids))
            .collect();
        if groups != listed_groups {
            return Err(Error::InvalidTopology(
                "haGroups disagree with the hosts".to_string(),
            ));
        }

        Ok(graph)
    }
}
