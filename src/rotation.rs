//! Rotation protocol state and the proof material the client hands to the verifier.
//!
//! Child-subtree rotation is a single call. Parent-tree rotation is a
//! three-stage commit / reveal / finalize exchange:
//!
//! 1. commit `C = H16(newRoot || credA)` under the key `K = H16(tag || credA)`
//!    while `credA` is still secret,
//! 2. reveal `newRoot` together with `credA` (the last subtree's transition slot);
//!    it must match the first commitment stored under `K`,
//! 3. finalize with `credB` (the last subtree's final slot) and the new parent
//!    tree's subtree-0 cached layer and auth path.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    errors::OtpError,
    hashers::{commitment, commitment_key},
    merkle,
    numbering::SlotKind,
    types::{AuthPath, CachedLayer, Node},
};

/// One credential together with its audit path from the leaf up to the cached layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpProof {
    pub otp_id: u64,
    pub credential: Node,
    pub audit_path: AuthPath,
}

/// Material introducing a child subtree: its cached layer and its path in the parent tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildRotation {
    pub subtree_idx: u64,
    pub cached_layer: CachedLayer,
    pub auth_path: AuthPath,
}

impl ChildRotation {
    /// Root of the introduced subtree, recomputed from its cached layer.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::InvalidLeafCount` for a malformed layer.
    pub fn child_root(&self) -> Result<Node, OtpError> {
        merkle::root_from_cached_layer(&self.cached_layer)
    }

    /// Check this material against a parent root.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::ProofMismatch` when the layer and path do not resolve to `parent_root`.
    pub fn check(&self, parent_root: &Node, cache_depth: u32) -> Result<Node, OtpError> {
        if self.cached_layer.depth != cache_depth {
            return Err(OtpError::Format("cached layer depth does not match the tree shape"));
        }
        let child_root = self.child_root()?;
        if !merkle::verify(parent_root, &self.auth_path, &child_root, self.subtree_idx) {
            return Err(OtpError::ProofMismatch {
                context: "child subtree root vs parent root",
                expected: *parent_root,
                actual: merkle::fold_path(&child_root, &self.auth_path),
            });
        }
        Ok(child_root)
    }
}

/// Everything `confirm_material` returns for one otp id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmMaterial {
    pub proof: OtpProof,
    pub kind: SlotKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_rotation: Option<ChildRotation>,
}

/// A fully assembled parent rotation. Build it completely before submitting stage 1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentRotationPlan {
    pub new_parent_tree_idx: u32,
    pub new_root: Node,
    pub commitment_key: Node,
    pub commitment: Node,
    pub reveal: OtpProof,
    pub finalize: OtpProof,
    pub first_child: ChildRotation,
}

impl ParentRotationPlan {
    /// Recompute the stage-1 commitment from the stage-2 inputs.
    #[must_use]
    pub fn expected_commitment(&self) -> Node {
        commitment(&self.new_root, &self.reveal.credential)
    }

    #[must_use]
    pub fn expected_commitment_key(&self) -> Node {
        commitment_key(&self.reveal.credential)
    }
}

/// Stage reached by a parent rotation in progress.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParentStage {
    /// Stage 1 done; the first commitment seen for each key.
    Committed(BTreeMap<Node, Node>),
    /// Stage 2 done; the revealed new root awaits finalization.
    Revealed { new_root: Node },
}

/// Verifier-side rotation state.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum RotationState {
    #[default]
    Active,
    SubtreeLow,
    ParentLow,
    RotatingParent(ParentStage),
    Destroyed,
}

impl RotationState {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::SubtreeLow => "SubtreeLow",
            Self::ParentLow => "ParentLow",
            Self::RotatingParent(ParentStage::Committed(_)) => "RotatingParent(Stage1)",
            Self::RotatingParent(ParentStage::Revealed { .. }) => "RotatingParent(Stage2)",
            Self::Destroyed => "Destroyed",
        }
    }

    #[must_use]
    pub const fn is_low(&self) -> bool {
        matches!(self, Self::SubtreeLow | Self::ParentLow)
    }

    pub(crate) const fn order_error(&self, operation: &'static str) -> OtpError {
        if matches!(self, Self::Destroyed) {
            OtpError::Destroyed
        } else {
            OtpError::RotationOrder { operation, state: self.name() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashers::h16;

    fn rotation_over(leaves: &[Node], subtree: u64, depth: u32) -> (Node, ChildRotation) {
        let roots: Vec<Node> = (0..4u64)
            .map(|i| {
                if i == subtree {
                    merkle::build(leaves).unwrap()
                } else {
                    h16(&i.to_le_bytes())
                }
            })
            .collect();
        let parent = merkle::build(&roots).unwrap();
        let rot = ChildRotation {
            subtree_idx: subtree,
            cached_layer: merkle::materialize_cached_layer(leaves, depth).unwrap(),
            auth_path: merkle::proof(&roots, subtree).unwrap(),
        };
        (parent, rot)
    }

    #[test]
    fn child_rotation_checks_layer_and_path() {
        let leaves: Vec<Node> = (0..16u64).map(|i| h16(&i.to_be_bytes())).collect();
        let (parent, rot) = rotation_over(&leaves, 2, 1);
        assert_eq!(rot.check(&parent, 1).unwrap(), merkle::build(&leaves).unwrap());
        assert!(matches!(rot.check(&parent, 2), Err(OtpError::Format(_))));

        let mut wrong_index = rot.clone();
        wrong_index.subtree_idx = 3;
        assert!(matches!(wrong_index.check(&parent, 1), Err(OtpError::ProofMismatch { .. })));

        let mut tampered = rot;
        tampered.cached_layer.nodes[0].0[0] ^= 1;
        assert!(matches!(tampered.check(&parent, 1), Err(OtpError::ProofMismatch { .. })));
    }

    #[test]
    fn state_names_and_order_errors() {
        assert_eq!(RotationState::default(), RotationState::Active);
        assert!(RotationState::ParentLow.is_low());
        assert_eq!(
            RotationState::RotatingParent(ParentStage::Committed(BTreeMap::new())).name(),
            "RotatingParent(Stage1)"
        );
        assert_eq!(RotationState::Destroyed.order_error("commit"), OtpError::Destroyed);
        assert!(matches!(
            RotationState::Active.order_error("commit"),
            OtpError::RotationOrder { .. }
        ));
    }
}
