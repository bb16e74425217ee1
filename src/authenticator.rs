//! Client-side facade: derives the wallet's trees from its seed and assembles
//! every piece of proof material the verifier asks for.

use tracing::{debug, info};

use crate::{
    chain::{ChainGenerator, LeafCoords},
    config::TreeConfig,
    errors::OtpError,
    hashers::{commitment, commitment_key, hash_n, MasterSeed},
    merkle,
    numbering::{OtpCoords, OtpNumbering},
    record::{CachedLeaves, WalletRecord},
    rotation::{ChildRotation, ConfirmMaterial, OtpProof, ParentRotationPlan},
    types::{AuthPath, CachedLayer, Node},
};

/// One wallet's credential engine. Owns its seed; no shared state.
#[derive(Clone, Debug)]
pub struct Authenticator {
    numbering: OtpNumbering,
    seed: MasterSeed,
    parent_tree_idx: u32,
    subtree_roots: Vec<Node>,
    root: Node,
}

impl Authenticator {
    /// Build the parent tree `parent_tree_idx` for the given shape.
    ///
    /// Without a mnemonic a random seed is drawn. `cached` skips re-deriving the
    /// child subtree roots.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::Config` for an invalid shape, and the errors of
    /// [`Self::with_seed`] for unusable cached leaves.
    pub fn init(
        num_leaves: u64,
        num_subtree_leaves: u64,
        hash_chain_len: u32,
        parent_tree_idx: u32,
        seed_mnemonic: Option<&str>,
        cached: Option<CachedLeaves>,
    ) -> Result<Self, OtpError> {
        let config = TreeConfig::new(num_leaves, num_subtree_leaves, hash_chain_len)?;
        let seed = seed_mnemonic.map_or_else(MasterSeed::random, MasterSeed::from_mnemonic);
        Self::with_seed(config, parent_tree_idx, seed, cached)
    }

    /// # Errors
    ///
    /// Returns `OtpError::Format` when cached leaves belong to another parent tree,
    /// `OtpError::InvalidLength` when their count is not the subtree count, and
    /// `OtpError::ProofMismatch` when subtree 0 does not re-derive to the cached root.
    pub fn with_seed(
        config: TreeConfig,
        parent_tree_idx: u32,
        seed: MasterSeed,
        cached: Option<CachedLeaves>,
    ) -> Result<Self, OtpError> {
        let gen = ChainGenerator::new(&seed, &config);
        let subtree_roots = match cached {
            Some(c) => {
                if c.parent_tree_idx != parent_tree_idx {
                    return Err(OtpError::Format("cached leaves belong to another parent tree"));
                }
                let got = c.subtree_roots.len();
                if got as u64 != config.num_subtrees() {
                    let expected = usize::try_from(config.num_subtrees()).unwrap_or(usize::MAX);
                    return Err(OtpError::InvalidLength { expected, got });
                }
                let first = merkle::build(&gen.subtree_leaves(parent_tree_idx, 0)?)?;
                if first != c.subtree_roots[0] {
                    return Err(OtpError::ProofMismatch {
                        context: "cached subtree 0 root vs derived",
                        expected: c.subtree_roots[0],
                        actual: first,
                    });
                }
                c.subtree_roots
            }
            None => (0..config.num_subtrees())
                .map(|s| merkle::build(&gen.subtree_leaves(parent_tree_idx, s)?))
                .collect::<Result<Vec<_>, _>>()?,
        };
        let root = merkle::build(&subtree_roots)?;
        info!(%root, parent_tree_idx, subtrees = subtree_roots.len(), "authenticator initialized");
        Ok(Self {
            numbering: OtpNumbering::new(config),
            seed,
            parent_tree_idx,
            subtree_roots,
            root,
        })
    }

    /// Restore from a stored record and the wallet mnemonic.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::ProofMismatch` (expected = stored root) when the mnemonic
    /// does not reproduce the stored root, plus any error of [`Self::with_seed`].
    pub fn from_record(record: &WalletRecord, mnemonic: &str) -> Result<Self, OtpError> {
        let config = record.config()?;
        let mut auth = Self::with_seed(
            config,
            record.current_parent_tree_idx,
            MasterSeed::from_mnemonic(mnemonic),
            record.cached_leaves_data.clone(),
        )?;
        if auth.root != record.root_hash {
            return Err(OtpError::ProofMismatch {
                context: "derived root vs wallet record",
                expected: record.root_hash,
                actual: auth.root,
            });
        }
        auth.numbering = OtpNumbering::at_subtree(config, record.current_subtree_idx)?;
        Ok(auth)
    }

    #[must_use]
    pub fn to_record(&self, address: impl Into<String>, owner: impl Into<String>) -> WalletRecord {
        let config = self.config();
        WalletRecord {
            address: address.into(),
            root_hash: self.root,
            num_leaves: config.num_leaves(),
            num_subtree_leaves: config.num_subtree_leaves(),
            hash_chain_len: config.hash_chain_len(),
            current_parent_tree_idx: self.parent_tree_idx,
            current_subtree_idx: self.numbering.current_subtree_idx(),
            cached_leaves_data: Some(self.cached_leaves()),
            owner: owner.into(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        self.numbering.config()
    }

    #[must_use]
    pub const fn root(&self) -> Node {
        self.root
    }

    #[must_use]
    pub const fn parent_tree_idx(&self) -> u32 {
        self.parent_tree_idx
    }

    #[must_use]
    pub const fn current_subtree_idx(&self) -> u64 {
        self.numbering.current_subtree_idx()
    }

    #[must_use]
    pub const fn numbering(&self) -> &OtpNumbering {
        &self.numbering
    }

    #[must_use]
    pub const fn offset_of_current_subtree(&self) -> u64 {
        self.numbering.offset_of_current_subtree()
    }

    #[must_use]
    pub fn cached_leaves(&self) -> CachedLeaves {
        CachedLeaves {
            parent_tree_idx: self.parent_tree_idx,
            subtree_roots: self.subtree_roots.clone(),
        }
    }

    fn generator(&self) -> ChainGenerator<'_> {
        ChainGenerator::new(&self.seed, self.numbering.config())
    }

    const fn leaf_coords(&self, coords: &OtpCoords) -> LeafCoords {
        LeafCoords {
            parent_tree_idx: self.parent_tree_idx,
            subtree_idx: coords.subtree_idx,
            leaf_idx: coords.leaf_idx,
        }
    }

    /// Credential plus the path from its leaf up to the cached layer.
    fn otp_proof(&self, coords: &OtpCoords) -> Result<OtpProof, OtpError> {
        let block_len = self.config().block_len();
        let block_start = coords.leaf_idx - coords.leaf_idx % block_len;
        let block = self
            .generator()
            .block_leaves(self.parent_tree_idx, coords.subtree_idx, block_start, block_len)?;
        let audit_path = merkle::proof(&block, coords.leaf_idx - block_start)?;
        let credential = self.generator().derive_credential(&self.leaf_coords(coords), coords.age)?;
        Ok(OtpProof { otp_id: coords.otp_id, credential, audit_path })
    }

    /// Proof bundle for `otp_id` in the current subtree.
    ///
    /// Reserved slots of a non-last subtree also carry the next subtree's
    /// rotation material.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` outside the current subtree and
    /// `OtpError::Exhausted` for the last subtree's reserved slots, whose
    /// credentials are only handed out through [`Self::prepare_parent_rotation`].
    pub fn confirm_material(&self, otp_id: u64) -> Result<ConfirmMaterial, OtpError> {
        let coords = self.numbering.current_coords(otp_id)?;
        let kind = self.numbering.slot_kind(&coords);
        if kind.is_parent_low() {
            return Err(OtpError::Exhausted {
                otp_id,
                subtree_idx: coords.subtree_idx,
                slot_idx: coords.slot_idx,
            });
        }
        let child_rotation = if kind.is_reserved() {
            Some(self.child_rotation(coords.subtree_idx + 1)?)
        } else {
            None
        };
        let proof = self.otp_proof(&coords)?;
        debug!(
            otp_id,
            subtree_idx = coords.subtree_idx,
            leaf_idx = coords.leaf_idx,
            age = coords.age,
            ?kind,
            "confirm material assembled"
        );
        Ok(ConfirmMaterial { proof, kind, child_rotation })
    }

    /// Cached layer of a child subtree, checked against its stored root.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` for an unknown subtree and
    /// `OtpError::ProofMismatch` if the re-derived layer disagrees with the parent tree.
    pub fn child_cached_layer(&self, subtree_idx: u64) -> Result<CachedLayer, OtpError> {
        let leaves = self.generator().subtree_leaves(self.parent_tree_idx, subtree_idx)?;
        let layer = merkle::materialize_cached_layer(&leaves, self.config().cache_depth())?;
        let stored = usize::try_from(subtree_idx)
            .ok()
            .and_then(|i| self.subtree_roots.get(i))
            .copied()
            .ok_or(OtpError::OutOfRange {
                what: "subtree index",
                index: subtree_idx,
                min: 0,
                max: self.subtree_roots.len() as u64,
            })?;
        let actual = merkle::root_from_cached_layer(&layer)?;
        if actual != stored {
            return Err(OtpError::ProofMismatch {
                context: "child cached layer vs parent leaf",
                expected: stored,
                actual,
            });
        }
        Ok(layer)
    }

    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` for an unknown subtree.
    pub fn auth_path_for_child_tree(&self, subtree_idx: u64) -> Result<AuthPath, OtpError> {
        merkle::proof(&self.subtree_roots, subtree_idx)
    }

    /// # Errors
    ///
    /// See [`Self::child_cached_layer`].
    pub fn child_rotation(&self, subtree_idx: u64) -> Result<ChildRotation, OtpError> {
        Ok(ChildRotation {
            subtree_idx,
            cached_layer: self.child_cached_layer(subtree_idx)?,
            auth_path: self.auth_path_for_child_tree(subtree_idx)?,
        })
    }

    /// Full leaf-to-root path for any otp id of the current parent tree, assembled
    /// from the subtree's cached layer and the parent tree path.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` for an unknown otp id and
    /// `OtpError::ProofMismatch` if the assembled path does not reach the root.
    pub fn full_auth_path(&self, otp_id: u64) -> Result<AuthPath, OtpError> {
        let coords = self.numbering.coords(otp_id)?;
        let layer = self.child_cached_layer(coords.subtree_idx)?;
        let block_len = self.config().block_len();
        let block_start = coords.leaf_idx - coords.leaf_idx % block_len;
        let block = self
            .generator()
            .block_leaves(self.parent_tree_idx, coords.subtree_idx, block_start, block_len)?;
        let path = merkle::proof_from_cached_layer(&layer, &block, coords.leaf_idx)?
            .extend(&self.auth_path_for_child_tree(coords.subtree_idx)?);

        let credential =
            self.generator().derive_credential(&self.leaf_coords(&coords), coords.age)?;
        let leaf = hash_n(&credential, coords.age);
        let global_leaf = coords.subtree_idx * self.config().num_subtree_leaves() + coords.leaf_idx;
        if !merkle::verify(&self.root, &path, &leaf, global_leaf) {
            return Err(OtpError::ProofMismatch {
                context: "assembled path vs parent root",
                expected: self.root,
                actual: merkle::fold_path(&leaf, &path),
            });
        }
        Ok(path)
    }

    /// Follow an accepted child rotation.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::RotationOrder` on the last subtree.
    pub fn advance_subtree(&mut self) -> Result<u64, OtpError> {
        let idx = self.numbering.advance_subtree()?;
        debug!(subtree_idx = idx, "subtree cursor advanced");
        Ok(idx)
    }

    /// The authenticator of the following parent tree; `self` is untouched.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::Format`/`OtpError::InvalidLength` for a malformed seed.
    pub fn next_parent_tree(&self, new_seed_hex: Option<&str>) -> Result<Self, OtpError> {
        let seed = match new_seed_hex {
            Some(h) => MasterSeed::from_hex(h)?,
            None => self.seed.clone(),
        };
        let next_idx = self.parent_tree_idx.checked_add(1).ok_or(OtpError::OutOfRange {
            what: "parent tree index",
            index: u64::from(self.parent_tree_idx),
            min: 0,
            max: u64::from(u32::MAX),
        })?;
        Self::with_seed(*self.config(), next_idx, seed, None)
    }

    /// Assemble the whole three-stage parent rotation before anything is submitted.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::RotationOrder` unless the cursor is on the last subtree,
    /// plus seed and derivation errors.
    pub fn prepare_parent_rotation(
        &self,
        new_seed_hex: Option<&str>,
    ) -> Result<ParentRotationPlan, OtpError> {
        let current = self.numbering.current_subtree_idx();
        if !self.numbering.is_last_subtree(current) {
            return Err(OtpError::RotationOrder {
                operation: "prepare parent rotation",
                state: "not on the last subtree",
            });
        }
        let next = self.next_parent_tree(new_seed_hex)?;
        let reveal_coords = self.numbering.coords(self.numbering.reserved_otp_id(current, 0))?;
        let finalize_coords = self.numbering.coords(self.numbering.reserved_otp_id(current, 1))?;
        let reveal = self.otp_proof(&reveal_coords)?;
        let finalize = self.otp_proof(&finalize_coords)?;
        let first_child = next.child_rotation(0)?;
        let plan = ParentRotationPlan {
            new_parent_tree_idx: next.parent_tree_idx,
            new_root: next.root,
            commitment_key: commitment_key(&reveal.credential),
            commitment: commitment(&next.root, &reveal.credential),
            reveal,
            finalize,
            first_child,
        };
        info!(
            new_root = %plan.new_root,
            new_parent_tree_idx = plan.new_parent_tree_idx,
            "parent rotation prepared"
        );
        Ok(plan)
    }

    /// Switch to the next parent tree and reset the subtree cursor. Returns the new root.
    ///
    /// # Errors
    ///
    /// Same as [`Self::next_parent_tree`]; on error `self` is unchanged.
    pub fn generate_next_parent_tree(
        &mut self,
        new_seed_hex: Option<&str>,
    ) -> Result<Node, OtpError> {
        let next = self.next_parent_tree(new_seed_hex)?;
        *self = next;
        info!(
            root = %self.root,
            parent_tree_idx = self.parent_tree_idx,
            "switched to next parent tree"
        );
        Ok(self.root)
    }
}
