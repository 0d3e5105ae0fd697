//! Routing of typed key values to partitions.
//!
//! A [`Hashinator`] is an immutable [`HashRing`] plus a version and the
//! signature of its raw config bytes. A value is normalized, hashed to a
//! 32-bit token with SipHash-2-4, and the token is looked up on the ring.

use std::collections::BTreeMap;
use std::hash::{BuildHasher, Hasher};

use tracing::debug;

use crate::config::HashinatorConfig;
use crate::error::{Error, Result};
use crate::hashring::{DefaultHashBuilder, HashRing, TokenRange};
use crate::topology::PartitionId;

mod value;

pub use value::{DECIMAL_SCALE, HashKey, ParameterValue, ValueType, normalize, parse_decimal};

// candidates tried per partition-key search before giving up
const PARTITION_KEY_SEARCH_LIMIT: u32 = 1 << 24;

/// Encoding of hashinator config bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Raw,
    Cooked,
}

/// A key that routes to `partition`.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionKey {
    pub partition: PartitionId,
    pub key: ParameterValue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hashinator {
    ring: HashRing,
    version: u64,
    signature: i64,
}

impl Hashinator {
    /// Hashinator for `partition_count` partitions on a default 1024 token ring.
    pub fn new(partition_count: u32) -> Result<Hashinator> {
        Self::with_config(partition_count, &HashinatorConfig::default())
    }

    pub fn with_config(partition_count: u32, config: &HashinatorConfig) -> Result<Hashinator> {
        Ok(Self::from_ring(
            HashRing::from_config(partition_count, config)?,
            0,
        ))
    }

    pub fn from_ring(ring: HashRing, version: u64) -> Hashinator {
        let signature = ring.signature();
        Hashinator {
            ring,
            version,
            signature,
        }
    }

    /// Decode config bytes produced by [`Hashinator::config_bytes`].
    pub fn from_config_bytes(bytes: &[u8], format: ConfigFormat, version: u64) -> Result<Hashinator> {
        let ring = match format {
            ConfigFormat::Raw => HashRing::from_raw_bytes(bytes)?,
            ConfigFormat::Cooked => HashRing::from_cooked_bytes(bytes)?,
        };
        Ok(Self::from_ring(ring, version))
    }

    pub fn config_bytes(&self, format: ConfigFormat) -> Result<Vec<u8>> {
        match format {
            ConfigFormat::Raw => Ok(self.ring.to_raw_bytes()),
            ConfigFormat::Cooked => self.ring.to_cooked_bytes(),
        }
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Signature of the raw config bytes; equal for raw and cooked decodes of the same ring.
    pub fn signature(&self) -> i64 {
        self.signature
    }

    pub fn partition_count(&self) -> u32 {
        self.ring.partition_count()
    }

    /// Returns a new hashinator with `count` more partitions and the next version.
    pub fn add_partitions(&self, count: u32) -> Result<Hashinator> {
        let ring = self.ring.add_partitions(count)?;
        debug!(
            version = self.version + 1,
            partition_count = ring.partition_count(),
            "hashinator grown"
        );
        Ok(Self::from_ring(ring, self.version + 1))
    }

    pub fn partition_for_token(&self, token: i32) -> PartitionId {
        self.ring.partition_for_token(token)
    }

    pub fn token_for_parameter(&self, value_type: ValueType, value: &ParameterValue) -> Result<i32> {
        Ok(token_for_key(&normalize(value_type, value)?))
    }

    /// Returns the partition a value of the declared `value_type` routes to.
    ///
    /// Nulls of every type route to the anchor token and therefore to partition 0.
    pub fn partition_for_parameter(
        &self,
        value_type: ValueType,
        value: &ParameterValue,
    ) -> Result<PartitionId> {
        let token = self.token_for_parameter(value_type, value)?;
        Ok(self.ring.partition_for_token(token))
    }

    pub fn ranges(&self, partition: PartitionId) -> Vec<TokenRange> {
        self.ring.ranges(partition)
    }

    pub fn predecessors(&self, partition: PartitionId) -> BTreeMap<i32, PartitionId> {
        self.ring.predecessors(partition)
    }

    pub fn predecessor(&self, partition: PartitionId, token: i32) -> Result<PartitionId> {
        self.ring.predecessor(partition, token)
    }

    /// One key per partition that routes to that partition, for integer,
    /// string and varbinary columns. Keys are the smallest non-negative
    /// integers (in the column's representation) that land on each partition.
    pub fn partition_keys(&self, value_type: ValueType) -> Result<Vec<PartitionKey>> {
        let candidate: fn(u32) -> ParameterValue = match value_type {
            ValueType::Integer => |i| ParameterValue::Integer(i as i32),
            ValueType::String => |i| ParameterValue::String(i.to_string()),
            ValueType::VarBinary => |i| ParameterValue::Bytes(i.to_be_bytes().to_vec()),
            other => return Err(Error::UnsupportedType(other)),
        };

        let wanted = self.partition_count() as usize;
        let mut keys: BTreeMap<PartitionId, ParameterValue> = BTreeMap::new();
        for i in 0..PARTITION_KEY_SEARCH_LIMIT {
            if keys.len() == wanted {
                break;
            }
            let key = candidate(i);
            let partition = self.partition_for_parameter(value_type, &key)?;
            keys.entry(partition).or_insert(key);
        }

        if keys.len() < wanted {
            debug!(
                found = keys.len(),
                wanted, "some partitions have no short partition key"
            );
        }

        Ok(keys
            .into_iter()
            .map(|(partition, key)| PartitionKey { partition, key })
            .collect())
    }
}

/// Hash a canonical key to a token: SipHash-2-4 folded to 32 bits. Null is
/// pinned to the anchor token `i32::MIN`.
pub fn token_for_key(key: &HashKey) -> i32 {
    let mut hasher = DefaultHashBuilder.build_hasher();
    match key {
        HashKey::Null => return i32::MIN,
        HashKey::Long(value) => hasher.write(&value.to_be_bytes()),
        HashKey::Decimal(value) => hasher.write(&value.to_be_bytes()),
        HashKey::Bytes(bytes) => hasher.write(bytes),
    }
    let hash = hasher.finish();
    (hash ^ (hash >> 32)) as u32 as i32
}
