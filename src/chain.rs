use crate::{
    config::TreeConfig,
    errors::OtpError,
    hashers::{ct_eq_node, hash_n, MasterSeed},
    types::Node,
};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Position of one hash chain: parent tree, child subtree, leaf within the subtree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LeafCoords {
    pub parent_tree_idx: u32,
    pub subtree_idx: u64,
    pub leaf_idx: u64,
}

/// Derives chain seeds, leaves (chain tips) and credentials for one tree shape.
#[derive(Clone, Copy, Debug)]
pub struct ChainGenerator<'a> {
    seed: &'a MasterSeed,
    config: &'a TreeConfig,
}

impl<'a> ChainGenerator<'a> {
    #[must_use]
    pub const fn new(seed: &'a MasterSeed, config: &'a TreeConfig) -> Self {
        Self { seed, config }
    }

    fn check(&self, coords: &LeafCoords) -> Result<(), OtpError> {
        if coords.subtree_idx >= self.config.num_subtrees() {
            return Err(OtpError::OutOfRange {
                what: "subtree index",
                index: coords.subtree_idx,
                min: 0,
                max: self.config.num_subtrees(),
            });
        }
        if coords.leaf_idx >= self.config.num_subtree_leaves() {
            return Err(OtpError::OutOfRange {
                what: "leaf index",
                index: coords.leaf_idx,
                min: 0,
                max: self.config.num_subtree_leaves(),
            });
        }
        Ok(())
    }

    /// Raw chain seed (the age-L credential).
    ///
    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` for coordinates outside the tree shape.
    pub fn chain_seed(&self, coords: &LeafCoords) -> Result<Node, OtpError> {
        self.check(coords)?;
        Ok(self.seed.chain_seed(coords.parent_tree_idx, coords.subtree_idx, coords.leaf_idx))
    }

    /// Leaf = H^L( seed(coords) )
    ///
    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` for coordinates outside the tree shape.
    pub fn derive_leaf(&self, coords: &LeafCoords) -> Result<Node, OtpError> {
        Ok(hash_n(&self.chain_seed(coords)?, self.config.hash_chain_len()))
    }

    /// Credential of `age` = H^(L-age)( seed(coords) ), `age` in `[1, L]`.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` for coordinates outside the tree shape or an age
    /// outside `[1, L]`.
    pub fn derive_credential(&self, coords: &LeafCoords, age: u32) -> Result<Node, OtpError> {
        let len = self.config.hash_chain_len();
        if age == 0 || age > len {
            return Err(OtpError::OutOfRange {
                what: "credential age",
                index: u64::from(age),
                min: 1,
                max: u64::from(len) + 1,
            });
        }
        Ok(hash_n(&self.chain_seed(coords)?, len - age))
    }

    /// Leaves `[start, start + len)` of one subtree.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` if the range leaves the subtree.
    pub fn block_leaves(
        &self,
        parent_tree_idx: u32,
        subtree_idx: u64,
        start: u64,
        len: u64,
    ) -> Result<Vec<Node>, OtpError> {
        let end = start.saturating_add(len);
        if end > self.config.num_subtree_leaves() || len == 0 {
            return Err(OtpError::OutOfRange {
                what: "leaf range end",
                index: end,
                min: 1,
                max: self.config.num_subtree_leaves() + 1,
            });
        }
        self.check(&LeafCoords { parent_tree_idx, subtree_idx, leaf_idx: start })?;
        Ok(self.derive_range(parent_tree_idx, subtree_idx, start, len))
    }

    #[cfg(not(feature = "parallel"))]
    fn derive_range(
        &self,
        parent_tree_idx: u32,
        subtree_idx: u64,
        start: u64,
        len: u64,
    ) -> Vec<Node> {
        LeafStream::new(*self, parent_tree_idx, subtree_idx, start, start + len).collect()
    }

    #[cfg(feature = "parallel")]
    fn derive_range(
        &self,
        parent_tree_idx: u32,
        subtree_idx: u64,
        start: u64,
        len: u64,
    ) -> Vec<Node> {
        let rounds = self.config.hash_chain_len();
        (start..start + len)
            .into_par_iter()
            .map(|i| hash_n(&self.seed.chain_seed(parent_tree_idx, subtree_idx, i), rounds))
            .collect()
    }

    /// All leaves of one subtree.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` if `subtree_idx` is outside the parent tree.
    pub fn subtree_leaves(
        &self,
        parent_tree_idx: u32,
        subtree_idx: u64,
    ) -> Result<Vec<Node>, OtpError> {
        self.block_leaves(parent_tree_idx, subtree_idx, 0, self.config.num_subtree_leaves())
    }
}

/// Streaming leaf derivation: yields one subtree's leaves without materializing the subtree.
pub struct LeafStream<'a> {
    gen: ChainGenerator<'a>,
    parent_tree_idx: u32,
    subtree_idx: u64,
    i: u64,
    end: u64,
}

impl<'a> LeafStream<'a> {
    #[must_use]
    pub const fn new(
        gen: ChainGenerator<'a>,
        parent_tree_idx: u32,
        subtree_idx: u64,
        start: u64,
        end: u64,
    ) -> Self {
        Self { gen, parent_tree_idx, subtree_idx, i: start, end }
    }
}

impl Iterator for LeafStream<'_> {
    type Item = Node;
    fn next(&mut self) -> Option<Self::Item> {
        if self.i >= self.end {
            return None;
        }
        let seed = self.gen.seed.chain_seed(self.parent_tree_idx, self.subtree_idx, self.i);
        self.i += 1;
        Some(hash_n(&seed, self.gen.config.hash_chain_len()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.end.saturating_sub(self.i)).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

/// Stateless chain check: H^age(credential) == leaf.
///
/// Accepting the same credential twice is not prevented here; replay protection
/// belongs to whoever tracks consumed otp ids.
#[must_use]
pub fn verify_credential(credential: &Node, age: u32, leaf: &Node) -> bool {
    ct_eq_node(&hash_n(credential, age), leaf)
}
