extern crate siphasher;

use siphasher::sip::SipHasher;
use std::hash::BuildHasher;

use tracing::debug;

use crate::config::{DEFAULT_TOTAL_TOKENS, HashinatorConfig};
use crate::error::{Error, Result};
use crate::topology::PartitionId;

mod codec;
pub mod coordinator;
mod crud;
mod iterator;

pub use codec::signature;
pub use coordinator::TokenRange;
pub use iterator::HashRingIterator;

/// SipHash-2-4 with zero keys: stable across processes, platforms and releases.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct DefaultHashBuilder;

impl BuildHasher for DefaultHashBuilder {
    type Hasher = SipHasher;

    fn build_hasher(&self) -> Self::Hasher {
        SipHasher::new()
    }
}

// Token is an internal struct for one ring entry: the first token value of a
// range and the partition that owns the range.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Token {
    key: i32,
    partition: PartitionId,
}

impl Token {
    fn new(key: i32, partition: PartitionId) -> Token {
        Token { key, partition }
    }
}

/// HashRing maps every 32-bit signed token to exactly one partition.
///
/// The ring is a sorted list of `total_tokens` entries. An entry owns every
/// token from its key up to (excluding) the next entry's key; the last entry
/// owns everything up to `i32::MAX`. The first entry always has key
/// `i32::MIN`, so every token has an owner.
///
/// Rings are values: elastic growth (`add_partitions`) returns a new ring and
/// never changes the number of entries.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HashRing {
    ring: Vec<Token>,
    partition_count: u32,
}

impl HashRing {
    /// Create a ring for `partition_count` partitions with the default 1024 tokens.
    pub fn new(partition_count: u32) -> Result<HashRing> {
        Self::with_total_tokens(partition_count, DEFAULT_TOTAL_TOKENS)
    }

    pub fn from_config(partition_count: u32, config: &HashinatorConfig) -> Result<HashRing> {
        Self::with_total_tokens(partition_count, config.total_tokens)
    }

    /// Create a ring for `partition_count` partitions.
    ///
    /// Token `i` sits at `i32::MIN + i * 2^32 / total_tokens` and belongs to
    /// partition `i % partition_count`, so the anchor belongs to partition 0
    /// and partitions with an index below `total_tokens % partition_count`
    /// own one token more than the others.
    ///
    /// # Arguments
    ///
    /// * `partition_count` - number of partitions, at least 1
    /// * `total_tokens` - number of ring entries, at least `partition_count`
    pub fn with_total_tokens(partition_count: u32, total_tokens: u32) -> Result<HashRing> {
        if partition_count == 0 {
            return Err(Error::InvalidConfig(
                "a ring needs at least one partition".to_string(),
            ));
        }
        if total_tokens < partition_count {
            return Err(Error::InvalidConfig(format!(
                "{total_tokens} tokens cannot cover {partition_count} partitions"
            )));
        }

        let span = 1i64 << 32;
        let ring = (0..total_tokens)
            .map(|i| {
                let key = i32::MIN as i64 + (i as i64 * span) / total_tokens as i64;
                Token::new(key as i32, i % partition_count)
            })
            .collect();

        debug!(partition_count, total_tokens, "created token ring");

        Ok(HashRing {
            ring,
            partition_count,
        })
    }

    /// Build a ring from `(token, partition)` entries.
    ///
    /// The entries must be sorted by strictly ascending token, start at
    /// `i32::MIN` owned by partition 0, and cover partitions `0..n` without gaps.
    pub fn from_entries<I>(entries: I) -> Result<HashRing>
    where
        I: IntoIterator<Item = (i32, PartitionId)>,
    {
        let ring: Vec<Token> = entries
            .into_iter()
            .map(|(key, partition)| Token::new(key, partition))
            .collect();

        match ring.first() {
            None => return Err(Error::InvalidConfig("ring has no tokens".to_string())),
            Some(first) if first.key != i32::MIN => {
                return Err(Error::InvalidConfig(format!(
                    "first token is {} instead of the anchor {}",
                    first.key,
                    i32::MIN
                )));
            }
            // nulls hash to the anchor and must land on partition 0
            Some(first) if first.partition != 0 => {
                return Err(Error::InvalidConfig(format!(
                    "anchor token belongs to partition {} instead of 0",
                    first.partition
                )));
            }
            Some(_) => {}
        }

        if let Some(pair) = ring.windows(2).find(|pair| pair[0].key >= pair[1].key) {
            return Err(Error::InvalidConfig(format!(
                "tokens are not strictly ascending at {}",
                pair[1].key
            )));
        }

        let max_partition = ring.iter().map(|t| t.partition).max().unwrap_or(0);
        if max_partition as usize >= ring.len() {
            return Err(Error::InvalidConfig(format!(
                "partition {max_partition} is out of range for {} tokens",
                ring.len()
            )));
        }
        let partition_count = max_partition + 1;
        let mut seen = vec![false; partition_count as usize];
        for token in &ring {
            seen[token.partition as usize] = true;
        }
        if let Some(missing) = seen.iter().position(|owned| !owned) {
            return Err(Error::InvalidConfig(format!(
                "partition {missing} owns no token"
            )));
        }

        Ok(HashRing {
            ring,
            partition_count,
        })
    }

    /// Get the number of tokens (ring entries).
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns true if the ring has no entries. Rings built through the
    /// public constructors always have at least one.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Number of tokens owned by each partition, indexed by partition id.
    pub fn token_counts(&self) -> Vec<u32> {
        let mut counts = vec![0; self.partition_count as usize];
        for token in &self.ring {
            counts[token.partition as usize] += 1;
        }
        counts
    }

    /// Number of tokens `partition` owns in a balanced ring of `partition_count` partitions.
    pub fn target_share(total_tokens: u32, partition_count: u32, partition: PartitionId) -> u32 {
        let base = total_tokens / partition_count;
        if partition < total_tokens % partition_count {
            base + 1
        } else {
            base
        }
    }
}
