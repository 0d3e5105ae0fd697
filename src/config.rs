use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of ring entries a hashinator is created with unless configured otherwise.
pub const DEFAULT_TOTAL_TOKENS: u32 = 1024;

/// Parameters of the token ring.
///
/// `total_tokens` is fixed for the lifetime of a ring: elastic growth only
/// reassigns tokens, it never adds or removes ring entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HashinatorConfig {
    pub total_tokens: u32,
}

impl Default for HashinatorConfig {
    fn default() -> Self {
        Self {
            total_tokens: DEFAULT_TOTAL_TOKENS,
        }
    }
}

impl HashinatorConfig {
    pub fn with_total_tokens(mut self, total_tokens: u32) -> Self {
        self.total_tokens = total_tokens;
        self
    }
}

/// Parameters of a topology build.
///
/// * `kfactor` - number of extra replicas per partition (each partition has `kfactor + 1` hosts)
/// * `restore_placement` - reproduce the partition ids supplied per host instead of computing fresh ones
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopologyConfig {
    pub kfactor: u32,
    pub restore_placement: bool,
}

impl TopologyConfig {
    pub fn new(kfactor: u32) -> Self {
        Self {
            kfactor,
            ..Default::default()
        }
    }

    pub fn with_restore_placement(mut self, restore_placement: bool) -> Self {
        self.restore_placement = restore_placement;
        self
    }

    /// Replicas per partition, `InvalidTopology` if `kfactor + 1` does not fit a `u32`.
    pub fn replica_count(&self) -> Result<u32> {
        self.kfactor.checked_add(1).ok_or_else(|| {
            Error::InvalidTopology(format!("kfactor {} is out of range", self.kfactor))
        })
    }
}
