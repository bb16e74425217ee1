//! OTP numbering: global otp id ⇄ (subtree, slot, leaf, age).
//!
//! Within a subtree the slots walk the hash chains layer by layer: the first
//! `numSubtreeLeaves` slots reveal age-1 credentials of every leaf, the next
//! ones age-2 credentials, and so on. The last two slots of every subtree are
//! reserved for rotation.

use serde::{Deserialize, Serialize};

use crate::{config::TreeConfig, errors::OtpError};

/// Number of trailing slots per subtree that never authorize an ordinary operation.
pub const RESERVED_SLOTS: u64 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OtpCoords {
    pub otp_id: u64,
    pub subtree_idx: u64,
    pub slot_idx: u64,
    pub leaf_idx: u64,
    pub age: u32,
}

/// Role of a slot within its subtree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlotKind {
    Ordinary,
    /// `slot == childOTPs - 2`: carries the transition proof. In the last
    /// subtree this is also the parent-low signal.
    SubtreeLow { last_subtree: bool },
    /// `slot == childOTPs - 1`.
    SafetyMargin { last_subtree: bool },
}

impl SlotKind {
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        !matches!(self, Self::Ordinary)
    }

    #[must_use]
    pub const fn is_parent_low(self) -> bool {
        matches!(
            self,
            Self::SubtreeLow { last_subtree: true } | Self::SafetyMargin { last_subtree: true }
        )
    }
}

/// Cursor over the subtrees of the current parent tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtpNumbering {
    config: TreeConfig,
    current_subtree_idx: u64,
}

impl OtpNumbering {
    #[must_use]
    pub const fn new(config: TreeConfig) -> Self {
        Self { config, current_subtree_idx: 0 }
    }

    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` if `current_subtree_idx` is not a subtree of the parent tree.
    pub fn at_subtree(config: TreeConfig, current_subtree_idx: u64) -> Result<Self, OtpError> {
        if current_subtree_idx >= config.num_subtrees() {
            return Err(OtpError::OutOfRange {
                what: "subtree index",
                index: current_subtree_idx,
                min: 0,
                max: config.num_subtrees(),
            });
        }
        Ok(Self { config, current_subtree_idx })
    }

    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        &self.config
    }

    #[must_use]
    pub const fn current_subtree_idx(&self) -> u64 {
        self.current_subtree_idx
    }

    #[must_use]
    pub const fn is_last_subtree(&self, subtree_idx: u64) -> bool {
        subtree_idx + 1 == self.config.num_subtrees()
    }

    #[must_use]
    pub const fn offset_of_current_subtree(&self) -> u64 {
        self.config.child_otps_per_subtree() * self.current_subtree_idx
    }

    /// Translate an index into the current subtree's buffer to a global otp id.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` if `local` is not a slot of a subtree.
    pub fn global_otp_id(&self, local: u64) -> Result<u64, OtpError> {
        let per = self.config.child_otps_per_subtree();
        if local >= per {
            return Err(OtpError::OutOfRange {
                what: "local otp index",
                index: local,
                min: 0,
                max: per,
            });
        }
        Ok(self.offset_of_current_subtree() + local)
    }

    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` for `otp_id` at or beyond the parent tree's total.
    pub fn coords(&self, otp_id: u64) -> Result<OtpCoords, OtpError> {
        let total = self.config.total_otps();
        if otp_id >= total {
            return Err(OtpError::OutOfRange { what: "otp id", index: otp_id, min: 0, max: total });
        }
        let per = self.config.child_otps_per_subtree();
        let leaves = self.config.num_subtree_leaves();
        let slot_idx = otp_id % per;
        // slot / leaves < hash_chain_len, which is a u32
        let layer = u32::try_from(slot_idx / leaves).unwrap_or(u32::MAX - 1);
        Ok(OtpCoords {
            otp_id,
            subtree_idx: otp_id / per,
            slot_idx,
            leaf_idx: slot_idx % leaves,
            age: layer + 1,
        })
    }

    /// Same as [`Self::coords`] but restricted to the current subtree.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::OutOfRange` for ids outside `[offset, offset + childOTPs)`.
    pub fn current_coords(&self, otp_id: u64) -> Result<OtpCoords, OtpError> {
        let start = self.offset_of_current_subtree();
        let end = start + self.config.child_otps_per_subtree();
        if otp_id < start || otp_id >= end {
            return Err(OtpError::OutOfRange {
                what: "otp id",
                index: otp_id,
                min: start,
                max: end,
            });
        }
        self.coords(otp_id)
    }

    #[must_use]
    pub const fn slot_kind(&self, coords: &OtpCoords) -> SlotKind {
        let per = self.config.child_otps_per_subtree();
        let last_subtree = self.is_last_subtree(coords.subtree_idx);
        if coords.slot_idx + RESERVED_SLOTS < per {
            SlotKind::Ordinary
        } else if coords.slot_idx + RESERVED_SLOTS == per {
            SlotKind::SubtreeLow { last_subtree }
        } else {
            SlotKind::SafetyMargin { last_subtree }
        }
    }

    /// Global id of the given reserved slot (0 = transition, 1 = safety margin) of a subtree.
    #[must_use]
    pub const fn reserved_otp_id(&self, subtree_idx: u64, which: u64) -> u64 {
        let per = self.config.child_otps_per_subtree();
        subtree_idx * per + per - RESERVED_SLOTS + which
    }

    /// Move the cursor to the next subtree.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::RotationOrder` on the last subtree; that one rotates the parent
    /// tree instead.
    pub fn advance_subtree(&mut self) -> Result<u64, OtpError> {
        if self.is_last_subtree(self.current_subtree_idx) {
            return Err(OtpError::RotationOrder {
                operation: "advance subtree",
                state: "last subtree",
            });
        }
        self.current_subtree_idx += 1;
        Ok(self.current_subtree_idx)
    }

    pub fn reset(&mut self) {
        self.current_subtree_idx = 0;
    }
}
