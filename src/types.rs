use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::OtpError;

pub const NODE_LEN: usize = 16;               // keccak256 truncated to 128 bits
pub const SEED_LEN: usize = 32;               // master seed
pub const MAX_DEPTH_OF_CACHE: u32 = 7;        // at most 128 cached nodes per subtree
pub const MAX_TREE_HEIGHT: u32 = 32;          // total height, parent + subtree

/// 128-bit tree node, chain value, credential or commitment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Node(pub [u8; NODE_LEN]);

impl Node {
    pub const ZERO: Self = Self([0u8; NODE_LEN]);

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; NODE_LEN] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a node from hex, with or without a `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::Format` for non-hex input and `OtpError::InvalidLength`
    /// when the decoded value is not exactly 16 bytes.
    pub fn from_hex(s: &str) -> Result<Self, OtpError> {
        let raw = hex::decode(s.trim().trim_start_matches("0x"))
            .map_err(|_| OtpError::Format("node is not valid hex"))?;
        Self::try_from(raw.as_slice())
    }
}

impl TryFrom<&[u8]> for Node {
    type Error = OtpError;
    fn try_from(b: &[u8]) -> Result<Self, Self::Error> {
        if b.len() != NODE_LEN {
            return Err(OtpError::InvalidLength { expected: NODE_LEN, got: b.len() });
        }
        let mut arr = [0u8; NODE_LEN];
        arr.copy_from_slice(b);
        Ok(Self(arr))
    }
}

impl FromStr for Node {
    type Err = OtpError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.to_hex())
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Audit path from a leaf up to (but not including) a root or cached node.
///
/// `directions[i]` is `true` when the node at level `i` is a right child,
/// so the bits read as the leaf index, least significant first.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthPath {
    pub siblings: Vec<Node>,
    pub directions: Vec<bool>,
}

impl AuthPath {
    #[must_use]
    pub fn len(&self) -> usize {
        self.siblings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.siblings.is_empty()
    }

    /// Index encoded by the direction bits, `None` when the path is malformed.
    #[must_use]
    pub fn index(&self) -> Option<u64> {
        if self.siblings.len() != self.directions.len() || self.directions.len() > 64 {
            return None;
        }
        Some(
            self.directions
                .iter()
                .enumerate()
                .fold(0u64, |acc, (level, &right)| acc | (u64::from(right) << level)),
        )
    }

    /// Append `upper` above this path.
    #[must_use]
    pub fn extend(mut self, upper: &Self) -> Self {
        self.siblings.extend_from_slice(&upper.siblings);
        self.directions.extend_from_slice(&upper.directions);
        self
    }
}

/// Horizontal slice of a subtree at `depth` below its root (`2^depth` nodes).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedLayer {
    pub depth: u32,
    pub nodes: Vec<Node>,
}

impl CachedLayer {
    /// # Errors
    ///
    /// Returns `OtpError::InvalidLength` when `nodes.len() != 2^depth`.
    pub fn new(depth: u32, nodes: Vec<Node>) -> Result<Self, OtpError> {
        let expected = 1usize
            .checked_shl(depth)
            .ok_or(OtpError::Format("cached layer depth too large"))?;
        if nodes.len() != expected {
            return Err(OtpError::InvalidLength { expected, got: nodes.len() });
        }
        Ok(Self { depth, nodes })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Depth of the cached layer for a subtree of the given height.
#[must_use]
pub const fn cache_depth_for_height(height: u32) -> u32 {
    if height <= 3 {
        0
    } else if height - 3 < MAX_DEPTH_OF_CACHE {
        height - 3
    } else {
        MAX_DEPTH_OF_CACHE
    }
}
