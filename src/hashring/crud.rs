use tracing::{debug, trace};

use super::HashRing;
use crate::error::{Error, Result};
use crate::topology::PartitionId;

impl HashRing {
    /// Returns the partition owning `token`: the owner of the greatest ring key <= `token`.
    pub fn partition_for_token(&self, token: i32) -> PartitionId {
        self.ring[self.entry_index(token)].partition
    }

    // index of the ring entry whose range contains `token`
    pub(super) fn entry_index(&self, token: i32) -> usize {
        // the anchor is i32::MIN, so at least one key is <= token
        self.ring.partition_point(|t| t.key <= token) - 1
    }

    /// Returns a new ring with `count` additional partitions.
    ///
    /// New partitions get ids `n..n + count`. Tokens are moved only from
    /// partitions that hold more than their share for the new partition
    /// count; partitions at or below their share are never touched. Adding
    /// `count` partitions at once gives exactly the ring obtained by adding
    /// one partition `count` times.
    pub fn add_partitions(&self, count: u32) -> Result<HashRing> {
        let mut ring = self.clone();
        for _ in 0..count {
            ring = ring.add_partition()?;
        }
        debug!(
            added = count,
            partition_count = ring.partition_count,
            "added partitions to token ring"
        );
        Ok(ring)
    }

    fn add_partition(&self) -> Result<HashRing> {
        let total = self.ring.len() as u32;
        let new_partition = self.partition_count;
        let new_count = self.partition_count + 1;
        if new_count > total {
            return Err(Error::InvalidConfig(format!(
                "{total} tokens cannot cover {new_count} partitions"
            )));
        }

        let mut excess: Vec<u32> = self
            .token_counts()
            .iter()
            .enumerate()
            .map(|(partition, count)| {
                count.saturating_sub(HashRing::target_share(total, new_count, partition as u32))
            })
            .collect();
        let mut needed = HashRing::target_share(total, new_count, new_partition);

        // walk down from i32::MAX so donors keep their lowest token, which
        // keeps the anchor on its current owner
        let mut ring = self.ring.clone();
        for token in ring.iter_mut().rev() {
            if needed == 0 {
                break;
            }
            let donor = token.partition as usize;
            if excess[donor] > 0 {
                trace!(token = token.key, donor, to = new_partition, "moving token");
                excess[donor] -= 1;
                needed -= 1;
                token.partition = new_partition;
            }
        }

        Ok(HashRing {
            ring,
            partition_count: new_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::HashRing;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn lookup_picks_greatest_key_not_above_token() {
        let ring = HashRing::from_entries(vec![(i32::MIN, 0), (-10, 1), (10, 2)]).unwrap();

        assert_eq!(ring.partition_for_token(i32::MIN), 0);
        assert_eq!(ring.partition_for_token(-11), 0);
        assert_eq!(ring.partition_for_token(-10), 1);
        assert_eq!(ring.partition_for_token(9), 1);
        assert_eq!(ring.partition_for_token(10), 2);
        assert_eq!(ring.partition_for_token(i32::MAX), 2);
    }

    #[test]
    fn add_one_partition_to_one() {
        let ring = HashRing::with_total_tokens(1, 8).unwrap();
        let grown = ring.add_partitions(1).unwrap();

        assert_eq!(grown.partition_count(), 2);
        assert_eq!(grown.token_counts(), vec![4, 4]);
        // the upper half of the ring moves to the new partition
        assert_eq!(grown.partition_for_token(-1), 0);
        assert_eq!(grown.partition_for_token(0), 1);
        assert_eq!(grown.partition_for_token(i32::MIN), 0);
    }

    #[test]
    fn add_partitions_keeps_shares_balanced() {
        let ring = HashRing::new(3).unwrap();
        let grown = ring.add_partitions(4).unwrap();

        assert_eq!(grown.len(), 1024);
        let counts = grown.token_counts();
        for (partition, count) in counts.iter().enumerate() {
            assert_eq!(*count, HashRing::target_share(1024, 7, partition as u32));
        }
    }

    #[test]
    fn add_partitions_only_moves_tokens_to_new_partitions() {
        let ring = HashRing::new(5).unwrap();
        let grown = ring.add_partitions(2).unwrap();

        for (before, after) in ring.iter().zip(grown.iter()) {
            assert_eq!(before.0, after.0);
            if before.1 != after.1 {
                assert!(after.1 >= 5, "token {} moved to old partition", after.0);
            }
        }
    }

    #[test]
    fn add_zero_partitions_is_identity() {
        let ring = HashRing::new(4).unwrap();
        assert_eq!(ring.add_partitions(0).unwrap(), ring);
    }

    #[test]
    fn cannot_grow_beyond_token_count() {
        let ring = HashRing::with_total_tokens(3, 4).unwrap();
        assert!(ring.add_partitions(1).is_ok());
        assert!(ring.add_partitions(2).is_err());
    }

    proptest! {
        #[test]
        fn prop_every_token_maps_into_range(partitions in 1u32..200, token in any::<i32>()) {
            let ring = HashRing::new(partitions).unwrap();
            prop_assert!(ring.partition_for_token(token) < partitions);
        }

        #[test]
        fn prop_add_all_at_once_equals_one_at_a_time(start in 1u32..40, added in 1u32..12) {
            let ring = HashRing::new(start).unwrap();
            let at_once = ring.add_partitions(added).unwrap();

            let mut stepwise = ring.clone();
            for _ in 0..added {
                stepwise = stepwise.add_partitions(1).unwrap();
            }

            prop_assert_eq!(at_once, stepwise);
        }

        #[test]
        fn prop_new_partitions_get_construction_share(start in 1u32..40, added in 1u32..12) {
            let grown = HashRing::new(start).unwrap().add_partitions(added).unwrap();
            let fresh = HashRing::new(start + added).unwrap();
            prop_assert_eq!(grown.token_counts(), fresh.token_counts());
            prop_assert_eq!(grown.partition_for_token(i32::MIN), 0);
        }
    }
}
