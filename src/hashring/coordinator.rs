use std::collections::BTreeMap;
use std::fmt::{self, Display};

#[cfg(feature = "derive")]
use serde::{Deserialize, Serialize};

use super::HashRing;
use crate::error::{Error, Result};
use crate::topology::PartitionId;

/// TokenRange is a half-open interval `[start, end)` of tokens.
///
/// * `start` - first token of the range
/// * `end` - first token after the range; `None` if the range runs through `i32::MAX` (wraps to the anchor)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "derive", derive(Serialize, Deserialize))]
pub struct TokenRange {
    pub start: i32,
    pub end: Option<i32>,
}

impl TokenRange {
    pub fn new(start: i32, end: Option<i32>) -> TokenRange {
        TokenRange { start, end }
    }

    pub fn contains(&self, token: i32) -> bool {
        let (start, end) = self.bounds();
        let token = token as i64;
        start <= token && token < end
    }

    /// Number of token values inside the range.
    pub fn width(&self) -> u64 {
        let (start, end) = self.bounds();
        (end - start) as u64
    }

    // [start, end) widened to i64 so the wrapping range has a finite end
    fn bounds(&self) -> (i64, i64) {
        let end = match self.end {
            Some(end) => end as i64,
            None => i32::MAX as i64 + 1,
        };
        (self.start as i64, end)
    }

    fn from_bounds(start: i64, end: i64) -> TokenRange {
        let end = if end > i32::MAX as i64 {
            None
        } else {
            Some(end as i32)
        };
        TokenRange::new(start as i32, end)
    }
}

impl Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, wrap)", self.start),
        }
    }
}

/// A range that changes owner between two rings, and the partition that
/// currently holds its data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "derive", derive(Serialize, Deserialize))]
pub struct Handoff {
    pub range: TokenRange,
    pub source: PartitionId,
}

impl HashRing {
    /// Range owned by the ring entry at `index`.
    fn entry_range(&self, index: usize) -> TokenRange {
        let start = self.ring[index].key;
        let end = self.ring.get(index + 1).map(|next| next.key);
        TokenRange::new(start, end)
    }

    /// Returns one range per token owned by `partition`, sorted by start.
    /// Unknown partitions own no ranges.
    pub fn ranges(&self, partition: PartitionId) -> Vec<TokenRange> {
        self.ring
            .iter()
            .enumerate()
            .filter(|(_, token)| token.partition == partition)
            .map(|(index, _)| self.entry_range(index))
            .collect()
    }

    /// Like `ranges`, with adjacent ranges merged.
    pub fn coalesced_ranges(&self, partition: PartitionId) -> Vec<TokenRange> {
        merge_ranges(self.ranges(partition))
    }

    /// For every token boundary owned by `partition`, the partition owning the
    /// entry just before it on the ring. The anchor's predecessor is the
    /// owner of the last entry.
    pub fn predecessors(&self, partition: PartitionId) -> BTreeMap<i32, PartitionId> {
        self.ring
            .iter()
            .enumerate()
            .filter(|(_, token)| token.partition == partition)
            .map(|(index, token)| (token.key, self.ring[self.previous_index(index)].partition))
            .collect()
    }

    /// The partition owning the ring entry before the range of `partition`
    /// that contains `token`.
    ///
    /// Returns `Error::UnownedToken` if `token` is not owned by `partition`.
    pub fn predecessor(&self, partition: PartitionId, token: i32) -> Result<PartitionId> {
        let index = self.entry_index(token);
        if self.ring[index].partition != partition {
            return Err(Error::UnownedToken { partition, token });
        }
        Ok(self.ring[self.previous_index(index)].partition)
    }

    fn previous_index(&self, index: usize) -> usize {
        if index == 0 {
            self.ring.len() - 1
        } else {
            index - 1
        }
    }

    /// Ranges that `target` owns in this ring but another partition owned in
    /// `previous`, each with the partition to stream it from.
    ///
    /// # Examples
    ///
    /// ```
    /// use partition_coordinator::HashRing;
    ///
    /// let before = HashRing::new(2).unwrap();
    /// let after = before.add_partitions(1).unwrap();
    ///
    /// // partition 2 is new: everything it owns comes from partitions 0 and 1
    /// let handoffs = after.find_sources(2, &before);
    /// assert!(handoffs.iter().all(|h| h.source < 2));
    /// let moved: u64 = handoffs.iter().map(|h| h.range.width()).sum();
    /// let owned: u64 = after.ranges(2).iter().map(|r| r.width()).sum();
    /// assert_eq!(moved, owned);
    /// ```
    pub fn find_sources(&self, target: PartitionId, previous: &HashRing) -> Vec<Handoff> {
        let mut handoffs: Vec<Handoff> = vec![];

        let supplies: Vec<(TokenRange, PartitionId)> = (0..previous.ring.len())
            .map(|index| (previous.entry_range(index), previous.ring[index].partition))
            .collect();

        for needed in self.ranges(target) {
            for (supply, source) in supplies.iter() {
                if *source == target {
                    continue;
                }
                if let Some(range) = intersect(&needed, supply) {
                    match handoffs.last_mut() {
                        Some(last) if last.source == *source && last.range.end == Some(range.start) => {
                            last.range.end = range.end;
                        }
                        _ => handoffs.push(Handoff {
                            range,
                            source: *source,
                        }),
                    }
                }
            }
        }

        handoffs
    }
}

/// Merge sorted ranges that touch each other.
pub fn merge_ranges(mut ranges: Vec<TokenRange>) -> Vec<TokenRange> {
    ranges.sort();

    let mut merged: Vec<TokenRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(current) if current.end == Some(range.start) => current.end = range.end,
            _ => merged.push(range),
        }
    }
    merged
}

fn intersect(a: &TokenRange, b: &TokenRange) -> Option<TokenRange> {
    let (a_start, a_end) = a.bounds();
    let (b_start, b_end) = b.bounds();
    let start = a_start.max(b_start);
    let end = a_end.min(b_end);

    if start < end {
        Some(TokenRange::from_bounds(start, end))
    } else {
        None
    }
}
