//! Error types shared by the ring, the hashinator and the topology builder.

use crate::hashinator::ValueType;
use crate::topology::{HostId, PartitionId};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned synchronously to the direct caller. Nothing is retried or
/// partially applied: an `Err` means no new ring or graph was produced.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested cluster shape cannot be placed (site count not divisible
    /// by the replication factor, too few distinct hosts, bad restore hints).
    #[error("Topology request invalid: {0}")]
    InvalidTopology(String),

    /// A host id passed to `add_hosts` is repeated or already in the graph.
    #[error("new host descriptions must contain unique and unused hostid (host {0})")]
    DuplicateHost(HostId),

    /// Removing a host would leave a partition without any live replica.
    #[error("k-safety violation: partition {0} would have no live replica")]
    KSafetyViolation(PartitionId),

    /// The token is not inside any range owned by the partition.
    #[error("token {token} is not owned by partition {partition}")]
    UnownedToken { partition: PartitionId, token: i32 },

    /// The value type cannot be used as a partitioning key.
    #[error("unsupported partitioning type {0:?}")]
    UnsupportedType(ValueType),

    /// The value cannot be coerced to the declared partitioning type.
    #[error("invalid {value_type:?} value: {reason}")]
    InvalidValue {
        value_type: ValueType,
        reason: String,
    },

    /// Malformed ring parameters or hashinator configuration bytes.
    #[error("invalid hashinator config: {0}")]
    InvalidConfig(String),

    #[error("topology json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cooked hashinator config error: {0}")]
    Cooked(String),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Error::Cooked(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Error::Cooked(err.to_string())
    }
}
