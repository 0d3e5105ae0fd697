//! Byte encodings of a ring.
//!
//! Raw: `[u32 entry_count][(i32 token, u32 partition)]*`, big-endian, sorted by token.
//! Cooked: MessagePack of a columnar `{ tokens, partitions }` document.

use std::hash::{BuildHasher, Hasher};

use serde::{Deserialize, Serialize};

use super::{DefaultHashBuilder, HashRing};
use crate::error::{Error, Result};
use crate::topology::PartitionId;

const ENTRY_WIDTH: usize = 8;

#[derive(Serialize, Deserialize)]
struct CookedRing {
    tokens: Vec<i32>,
    partitions: Vec<PartitionId>,
}

impl HashRing {
    pub fn to_raw_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.ring.len() * ENTRY_WIDTH);
        bytes.extend_from_slice(&(self.ring.len() as u32).to_be_bytes());
        for token in &self.ring {
            bytes.extend_from_slice(&token.key.to_be_bytes());
            bytes.extend_from_slice(&token.partition.to_be_bytes());
        }
        bytes
    }

    pub fn from_raw_bytes(bytes: &[u8]) -> Result<HashRing> {
        let (header, body) = bytes
            .split_first_chunk::<4>()
            .ok_or_else(|| Error::InvalidConfig("missing entry count".to_string()))?;
        let count = u32::from_be_bytes(*header) as usize;

        if body.len() != count * ENTRY_WIDTH {
            return Err(Error::InvalidConfig(format!(
                "expected {count} entries ({} bytes), found {} bytes",
                count * ENTRY_WIDTH,
                body.len()
            )));
        }

        let entries = body.chunks_exact(ENTRY_WIDTH).map(|entry| {
            let (token, partition) = entry.split_at(4);
            (
                i32::from_be_bytes([token[0], token[1], token[2], token[3]]),
                u32::from_be_bytes([partition[0], partition[1], partition[2], partition[3]]),
            )
        });

        HashRing::from_entries(entries)
    }

    pub fn to_cooked_bytes(&self) -> Result<Vec<u8>> {
        let cooked = CookedRing {
            tokens: self.ring.iter().map(|t| t.key).collect(),
            partitions: self.ring.iter().map(|t| t.partition).collect(),
        };
        Ok(rmp_serde::to_vec(&cooked)?)
    }

    pub fn from_cooked_bytes(bytes: &[u8]) -> Result<HashRing> {
        let cooked: CookedRing = rmp_serde::from_slice(bytes)?;
        if cooked.tokens.len() != cooked.partitions.len() {
            return Err(Error::Cooked(format!(
                "{} tokens but {} partitions",
                cooked.tokens.len(),
                cooked.partitions.len()
            )));
        }
        HashRing::from_entries(cooked.tokens.into_iter().zip(cooked.partitions))
    }

    /// Signature of the raw encoding of this ring.
    pub fn signature(&self) -> i64 {
        signature(&self.to_raw_bytes())
    }
}

/// Stable 64-bit hash of raw config bytes, used to detect stale configuration
/// without comparing payloads.
pub fn signature(bytes: &[u8]) -> i64 {
    let mut hasher = DefaultHashBuilder.build_hasher();
    hasher.write(bytes);
    hasher.finish() as i64
}
