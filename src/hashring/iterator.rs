use super::{HashRing, Token};
use crate::topology::PartitionId;

/// Yields `(token, partition)` ring entries in ascending token order.
pub struct HashRingIterator {
    ring: std::vec::IntoIter<Token>,
}

impl Iterator for HashRingIterator {
    type Item = (i32, PartitionId);

    fn next(&mut self) -> Option<Self::Item> {
        self.ring.next().map(|token| (token.key, token.partition))
    }
}

impl IntoIterator for HashRing {
    type Item = (i32, PartitionId);

    type IntoIter = HashRingIterator;

    fn into_iter(self) -> Self::IntoIter {
        HashRingIterator {
            ring: self.ring.into_iter(),
        }
    }
}

impl HashRing {
    /// Borrowing iterator over `(token, partition)` ring entries.
    pub fn iter(&self) -> impl Iterator<Item = (i32, PartitionId)> + '_ {
        self.ring.iter().map(|token| (token.key, token.partition))
    }
}
