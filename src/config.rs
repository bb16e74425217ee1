//! Tree shape of one wallet: total leaves, leaves per child subtree and hash-chain length.

use serde::{Deserialize, Serialize};

use crate::{
    errors::OtpError,
    types::{cache_depth_for_height, MAX_TREE_HEIGHT},
};

/// Validated tree shape. Construct through [`TreeConfig::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTreeConfig", into = "RawTreeConfig")]
pub struct TreeConfig {
    num_leaves: u64,
    num_subtree_leaves: u64,
    hash_chain_len: u32,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTreeConfig {
    num_leaves: u64,
    num_subtree_leaves: u64,
    hash_chain_len: u32,
}

impl TryFrom<RawTreeConfig> for TreeConfig {
    type Error = OtpError;
    fn try_from(raw: RawTreeConfig) -> Result<Self, Self::Error> {
        Self::new(raw.num_leaves, raw.num_subtree_leaves, raw.hash_chain_len)
    }
}

impl From<TreeConfig> for RawTreeConfig {
    fn from(c: TreeConfig) -> Self {
        Self {
            num_leaves: c.num_leaves,
            num_subtree_leaves: c.num_subtree_leaves,
            hash_chain_len: c.hash_chain_len,
        }
    }
}

impl TreeConfig {
    /// # Errors
    ///
    /// Returns `OtpError::Config` if `num_subtree_leaves < 2`, either count is not a power
    /// of two, `num_leaves` is not a multiple of `num_subtree_leaves`, the total height
    /// exceeds `MAX_TREE_HEIGHT`, or `hash_chain_len` is zero.
    pub fn new(
        num_leaves: u64,
        num_subtree_leaves: u64,
        hash_chain_len: u32,
    ) -> Result<Self, OtpError> {
        if num_subtree_leaves < 2 {
            return Err(OtpError::Config("numSubtreeLeaves must be at least 2"));
        }
        if !num_subtree_leaves.is_power_of_two() {
            return Err(OtpError::Config("numSubtreeLeaves must be a power of two"));
        }
        if !num_leaves.is_power_of_two() {
            return Err(OtpError::Config("numLeaves must be a power of two"));
        }
        if num_leaves % num_subtree_leaves != 0 {
            return Err(OtpError::Config("numLeaves must be divisible by numSubtreeLeaves"));
        }
        if num_leaves.trailing_zeros() > MAX_TREE_HEIGHT {
            return Err(OtpError::Config("tree height exceeds the supported maximum"));
        }
        if hash_chain_len == 0 {
            return Err(OtpError::Config("hashChainLen must be at least 1"));
        }
        if num_leaves.checked_mul(u64::from(hash_chain_len)).is_none() {
            return Err(OtpError::Config("total otp count overflows u64"));
        }
        Ok(Self { num_leaves, num_subtree_leaves, hash_chain_len })
    }

    #[must_use]
    pub const fn num_leaves(&self) -> u64 {
        self.num_leaves
    }

    #[must_use]
    pub const fn num_subtree_leaves(&self) -> u64 {
        self.num_subtree_leaves
    }

    #[must_use]
    pub const fn hash_chain_len(&self) -> u32 {
        self.hash_chain_len
    }

    #[must_use]
    pub const fn num_subtrees(&self) -> u64 {
        self.num_leaves / self.num_subtree_leaves
    }

    #[must_use]
    pub const fn subtree_height(&self) -> u32 {
        self.num_subtree_leaves.trailing_zeros()
    }

    #[must_use]
    pub const fn parent_height(&self) -> u32 {
        self.num_subtrees().trailing_zeros()
    }

    #[must_use]
    pub const fn cache_depth(&self) -> u32 {
        cache_depth_for_height(self.subtree_height())
    }

    /// Leaves below one cached node.
    #[must_use]
    pub const fn block_len(&self) -> u64 {
        1u64 << (self.subtree_height() - self.cache_depth())
    }

    #[must_use]
    pub const fn child_otps_per_subtree(&self) -> u64 {
        self.num_subtree_leaves * self.hash_chain_len as u64
    }

    #[must_use]
    pub const fn total_otps(&self) -> u64 {
        self.child_otps_per_subtree() * self.num_subtrees()
    }
}
