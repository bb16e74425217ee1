//! Reference model of the on-chain verifier.
//!
//! Holds only public data: the parent root, the cached layer of the current
//! child subtree and a monotonically increasing otp cursor. Every entry point
//! mirrors one contract call:
//!
//! | call | entry point |
//! |---|---|
//! | confirm operation | [`Verifier::confirm_operation`] |
//! | child-subtree rotation | [`Verifier::rotate_child_tree`] |
//! | parent rotation stage 1 | [`Verifier::commit_parent_root`] |
//! | parent rotation stage 2 | [`Verifier::reveal_parent_root`] |
//! | parent rotation stage 3 | [`Verifier::finalize_parent_rotation`] |
//!
//! A credential that validates is burned even when the rest of the call is
//! rejected; tree indices only move when the whole call succeeds. The stage-2
//! reveal is the one exception: its credential is burned only once the revealed
//! root matches the first commitment stored under the credential's key.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::{
    config::TreeConfig,
    errors::OtpError,
    hashers::{commitment, commitment_key, ct_eq_node, hash_n},
    merkle,
    numbering::{OtpCoords, OtpNumbering, SlotKind, RESERVED_SLOTS},
    rotation::{ChildRotation, OtpProof, ParentStage, RotationState},
    types::{AuthPath, CachedLayer, Node},
};

#[derive(Clone, Debug)]
pub struct Verifier {
    numbering: OtpNumbering,
    root_hash: Node,
    parent_tree_idx: u32,
    cached_layer: CachedLayer,
    next_otp: u64,
    state: RotationState,
    owner: String,
}

impl Verifier {
    /// Deploy a verifier for `root_hash`; `first_child` introduces subtree 0.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` if `first_child` is not subtree 0 and
    /// `OtpError::ProofMismatch` if it does not resolve to `root_hash`.
    pub fn deploy(
        config: TreeConfig,
        root_hash: Node,
        parent_tree_idx: u32,
        owner: impl Into<String>,
        first_child: &ChildRotation,
    ) -> Result<Self, OtpError> {
        if first_child.subtree_idx != 0 {
            return Err(OtpError::OutOfRange {
                what: "first child subtree",
                index: first_child.subtree_idx,
                min: 0,
                max: 1,
            });
        }
        first_child.check(&root_hash, config.cache_depth())?;
        let mut v = Self {
            numbering: OtpNumbering::new(config),
            root_hash,
            parent_tree_idx,
            cached_layer: first_child.cached_layer.clone(),
            next_otp: 0,
            state: RotationState::Active,
            owner: owner.into(),
        };
        v.refresh_state();
        info!(root = %root_hash, parent_tree_idx, "verifier deployed");
        Ok(v)
    }

    #[must_use]
    pub const fn root_hash(&self) -> Node {
        self.root_hash
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
    pub const fn next_otp(&self) -> u64 {
        self.next_otp
    }

    #[must_use]
    pub const fn state(&self) -> &RotationState {
        &self.state
    }

    #[must_use]
    pub const fn cached_layer(&self) -> &CachedLayer {
        &self.cached_layer
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn config(&self) -> &TreeConfig {
        self.numbering.config()
    }

    /// Recompute Active / SubtreeLow / ParentLow from the otp cursor.
    fn refresh_state(&mut self) {
        if !matches!(
            self.state,
            RotationState::Active | RotationState::SubtreeLow | RotationState::ParentLow
        ) {
            return;
        }
        let per = self.config().child_otps_per_subtree();
        let local = self.next_otp.saturating_sub(self.numbering.offset_of_current_subtree());
        let current = self.numbering.current_subtree_idx();
        self.state = if local + RESERVED_SLOTS < per {
            RotationState::Active
        } else if self.numbering.is_last_subtree(current) {
            RotationState::ParentLow
        } else {
            RotationState::SubtreeLow
        };
    }

    /// Validate a credential against the current subtree without consuming it.
    fn check_otp(&self, proof: &OtpProof) -> Result<(OtpCoords, SlotKind), OtpError> {
        let coords = self.numbering.current_coords(proof.otp_id)?;
        if proof.otp_id < self.next_otp {
            return Err(OtpError::Replay { otp_id: proof.otp_id, next: self.next_otp });
        }
        let steps = (self.config().subtree_height() - self.config().cache_depth()) as usize;
        if proof.audit_path.len() != steps {
            return Err(OtpError::InvalidLength { expected: steps, got: proof.audit_path.len() });
        }
        let leaf = hash_n(&proof.credential, coords.age);
        let layer = &self.cached_layer;
        if !merkle::verify_against_layer(layer, &proof.audit_path, &leaf, coords.leaf_idx) {
            let expected = usize::try_from(coords.leaf_idx >> steps)
                .ok()
                .and_then(|i| layer.nodes.get(i))
                .copied()
                .unwrap_or(Node::ZERO);
            return Err(OtpError::ProofMismatch {
                context: "credential vs cached layer",
                expected,
                actual: merkle::fold_path(&leaf, &proof.audit_path),
            });
        }
        Ok((coords, self.numbering.slot_kind(&coords)))
    }

    fn burn(&mut self, coords: &OtpCoords) {
        self.next_otp = coords.otp_id + 1;
        debug!(otp_id = coords.otp_id, "credential burned");
    }

    fn ensure_alive(&self) -> Result<(), OtpError> {
        if self.state == RotationState::Destroyed {
            return Err(OtpError::Destroyed);
        }
        Ok(())
    }

    /// Generic OTP-gated operation: accept `(audit_path, credential, otp_id)`.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` outside the current subtree, `OtpError::Exhausted`
    /// for reserved slots, `OtpError::Replay` for consumed ids and
    /// `OtpError::ProofMismatch` for a wrong credential or path.
    pub fn confirm_operation(
        &mut self,
        audit_path: &AuthPath,
        credential: &Node,
        otp_id: u64,
    ) -> Result<OtpCoords, OtpError> {
        self.ensure_alive()?;
        let coords = self.numbering.current_coords(otp_id)?;
        if self.numbering.slot_kind(&coords).is_reserved() {
            return Err(OtpError::Exhausted {
                otp_id,
                subtree_idx: coords.subtree_idx,
                slot_idx: coords.slot_idx,
            });
        }
        let proof = OtpProof { otp_id, credential: *credential, audit_path: audit_path.clone() };
        let (coords, _) = self
            .check_otp(&proof)
            .inspect_err(|e| warn!(otp_id, error = %e, "operation rejected"))?;
        self.burn(&coords);
        self.refresh_state();
        info!(otp_id, state = self.state.name(), "operation confirmed");
        Ok(coords)
    }

    /// Introduce the next child subtree, gated by a reserved credential of the current one.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::RotationOrder` outside `SubtreeLow`, credential errors as in
    /// [`Self::confirm_operation`], `OtpError::OutOfRange` for a rotation that does not
    /// target the next subtree and `OtpError::ProofMismatch` when the layer and path do
    /// not resolve to the parent root.
    pub fn rotate_child_tree(
        &mut self,
        proof: &OtpProof,
        rotation: &ChildRotation,
    ) -> Result<u64, OtpError> {
        if self.state != RotationState::SubtreeLow {
            return Err(self.state.order_error("rotate child tree"));
        }
        let (coords, kind) = self.check_otp(proof).inspect_err(|e| {
            warn!(otp_id = proof.otp_id, error = %e, "child rotation credential rejected");
        })?;
        if !matches!(
            kind,
            SlotKind::SubtreeLow { last_subtree: false }
                | SlotKind::SafetyMargin { last_subtree: false }
        ) {
            return Err(OtpError::RotationOrder {
                operation: "rotate child tree",
                state: "ordinary slot",
            });
        }
        self.burn(&coords);

        let expected = self.numbering.current_subtree_idx() + 1;
        let outcome = if rotation.subtree_idx == expected {
            rotation.check(&self.root_hash, self.config().cache_depth())
        } else {
            Err(OtpError::OutOfRange {
                what: "child subtree index",
                index: rotation.subtree_idx,
                min: expected,
                max: expected + 1,
            })
        };
        if let Err(e) = outcome {
            warn!(
                otp_id = coords.otp_id,
                subtree_idx = rotation.subtree_idx,
                error = %e,
                "child rotation rejected, credential burned"
            );
            return Err(e);
        }

        let new_idx = self.numbering.advance_subtree()?;
        self.cached_layer = rotation.cached_layer.clone();
        self.next_otp = self.numbering.offset_of_current_subtree();
        self.state = RotationState::Active;
        self.refresh_state();
        info!(subtree_idx = new_idx, "child subtree rotated");
        Ok(new_idx)
    }

    /// Stage 1: store `C = H16(newRoot || credA)` under `key = H16(tag || credA)`.
    ///
    /// Only the first commitment per key is kept; later ones under the same key
    /// are ignored and the call returns `false`.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::RotationOrder` unless the parent tree is low or already
    /// committed.
    pub fn commit_parent_root(&mut self, key: Node, commitment: Node) -> Result<bool, OtpError> {
        if self.state == RotationState::ParentLow {
            self.state = RotationState::RotatingParent(ParentStage::Committed(BTreeMap::new()));
        }
        match &mut self.state {
            RotationState::RotatingParent(ParentStage::Committed(pending)) => {
                if pending.contains_key(&key) {
                    debug!(%key, "commitment key already taken, ignored");
                    return Ok(false);
                }
                pending.insert(key, commitment);
                info!(%key, %commitment, pending = pending.len(), "parent commitment recorded");
                Ok(true)
            }
            other => Err(other.order_error("commit parent root")),
        }
    }

    /// Stage 2: disclose the new root with the last subtree's transition credential.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::RotationOrder` without a prior commitment, `OtpError::OutOfRange`
    /// for any otp id other than the transition slot, credential errors, and
    /// `OtpError::ProofMismatch` when the first commitment stored under the credential's
    /// key is missing or does not match. A rejected reveal does not burn the credential.
    pub fn reveal_parent_root(&mut self, new_root: Node, proof: &OtpProof) -> Result<(), OtpError> {
        let pending = match &self.state {
            RotationState::RotatingParent(ParentStage::Committed(pending)) => pending,
            other => return Err(other.order_error("reveal parent root")),
        };
        let expected_id = self.numbering.reserved_otp_id(self.numbering.current_subtree_idx(), 0);
        if proof.otp_id != expected_id {
            return Err(OtpError::OutOfRange {
                what: "reveal otp id",
                index: proof.otp_id,
                min: expected_id,
                max: expected_id + 1,
            });
        }
        let (coords, _) = self.check_otp(proof).inspect_err(|e| {
            warn!(otp_id = proof.otp_id, error = %e, "reveal credential rejected");
        })?;

        let actual = commitment(&new_root, &proof.credential);
        match pending.get(&commitment_key(&proof.credential)).copied() {
            Some(stored) if ct_eq_node(&stored, &actual) => {}
            Some(stored) => {
                warn!(%new_root, "revealed root does not match the first commitment");
                return Err(OtpError::ProofMismatch {
                    context: "revealed root vs stage-1 commitment",
                    expected: stored,
                    actual,
                });
            }
            None => {
                warn!(%new_root, "no commitment stored for this credential");
                return Err(OtpError::ProofMismatch {
                    context: "no stage-1 commitment for this credential",
                    expected: Node::ZERO,
                    actual,
                });
            }
        }

        self.burn(&coords);
        self.state = RotationState::RotatingParent(ParentStage::Revealed { new_root });
        info!(%new_root, "parent root revealed");
        Ok(())
    }

    /// Stage 3: spend the final credential and switch to the revealed root.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::RotationOrder` before stage 2, `OtpError::OutOfRange` for any
    /// otp id other than the final slot or a first child that is not subtree 0,
    /// credential errors, and `OtpError::ProofMismatch` when the first child does not
    /// resolve to the revealed root.
    pub fn finalize_parent_rotation(
        &mut self,
        proof: &OtpProof,
        first_child: &ChildRotation,
    ) -> Result<u32, OtpError> {
        let new_root = match &self.state {
            RotationState::RotatingParent(ParentStage::Revealed { new_root }) => *new_root,
            other => return Err(other.order_error("finalize parent rotation")),
        };
        let expected_id = self.numbering.reserved_otp_id(self.numbering.current_subtree_idx(), 1);
        if proof.otp_id != expected_id {
            return Err(OtpError::OutOfRange {
                what: "finalize otp id",
                index: proof.otp_id,
                min: expected_id,
                max: expected_id + 1,
            });
        }
        let (coords, _) = self.check_otp(proof).inspect_err(|e| {
            warn!(otp_id = proof.otp_id, error = %e, "finalize credential rejected");
        })?;
        self.burn(&coords);

        let outcome = if first_child.subtree_idx == 0 {
            first_child.check(&new_root, self.config().cache_depth())
        } else {
            Err(OtpError::OutOfRange {
                what: "first child subtree",
                index: first_child.subtree_idx,
                min: 0,
                max: 1,
            })
        };
        if let Err(e) = outcome {
            warn!(%new_root, error = %e, "parent finalization rejected, credential burned");
            return Err(e);
        }

        self.root_hash = new_root;
        self.parent_tree_idx += 1;
        self.numbering.reset();
        self.cached_layer = first_child.cached_layer.clone();
        self.next_otp = 0;
        self.state = RotationState::Active;
        self.refresh_state();
        info!(root = %new_root, parent_tree_idx = self.parent_tree_idx, "parent tree rotated");
        Ok(self.parent_tree_idx)
    }

    /// Owner-initiated sweep; terminal.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::Unauthorized` for a non-owner and `OtpError::Destroyed` when
    /// already destroyed.
    pub fn destroy(&mut self, caller: &str) -> Result<(), OtpError> {
        self.ensure_alive()?;
        if caller != self.owner {
            warn!(caller, "destroy attempted by non-owner");
            return Err(OtpError::Unauthorized);
        }
        self.state = RotationState::Destroyed;
        info!(owner = %self.owner, "wallet destroyed");
        Ok(())
    }
}
