use core::fmt;

use rand_core::{OsRng, RngCore};
use sha3::{Digest, Keccak256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    errors::OtpError,
    ser::{le32, le64},
    types::{Node, NODE_LEN, SEED_LEN},
};

pub const TAG_MASTER: &[u8] = b"otp.master";
pub const TAG_CHAIN_SEED: &[u8] = b"otp.chain.seed";
pub const TAG_COMMIT_KEY: &[u8] = b"otp.commit.key";

/// H16(x) = Keccak256(x)[..16], matching `bytes16(keccak256(x))` on the chain side.
#[must_use]
pub fn h16(data: &[u8]) -> Node {
    let digest = Keccak256::digest(data);
    let mut out = [0u8; NODE_LEN];
    out.copy_from_slice(&digest[..NODE_LEN]);
    Node(out)
}

/// Parent = H16( left || right )
#[inline]
#[must_use]
pub fn hash_node(left: &Node, right: &Node) -> Node {
    let mut cat = [0u8; 2 * NODE_LEN];
    cat[..NODE_LEN].copy_from_slice(&left.0);
    cat[NODE_LEN..].copy_from_slice(&right.0);
    h16(&cat)
}

/// Apply H16 to `x` `n` times.
#[must_use]
pub fn hash_n(x: &Node, n: u32) -> Node {
    let mut acc = *x;
    for _ in 0..n {
        acc = h16(&acc.0);
    }
    acc
}

/// Stage-1 commitment C = H16( new_root || credential )
#[must_use]
pub fn commitment(new_root: &Node, credential: &Node) -> Node {
    hash_node(new_root, credential)
}

/// Stage-1 lookup key K = H16( "otp.commit.key" || credential )
///
/// Independent of the new root, so a commitment made after the credential is
/// disclosed cannot take the place of the first one stored under `K`.
#[must_use]
pub fn commitment_key(credential: &Node) -> Node {
    let mut buf = [0u8; TAG_COMMIT_KEY.len() + NODE_LEN];
    buf[..TAG_COMMIT_KEY.len()].copy_from_slice(TAG_COMMIT_KEY);
    buf[TAG_COMMIT_KEY.len()..].copy_from_slice(&credential.0);
    h16(&buf)
}

/// Constant-time equality for two nodes.
#[must_use]
pub fn ct_eq_node(a: &Node, b: &Node) -> bool {
    a.0.ct_eq(&b.0).into()
}

/// Wallet master secret every chain seed is derived from.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MasterSeed([u8; SEED_LEN]);

impl MasterSeed {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SEED_LEN]) -> Self {
        Self(bytes)
    }

    /// SEED = Keccak256( "otp.master" || words joined by single spaces )
    #[must_use]
    pub fn from_mnemonic(mnemonic: &str) -> Self {
        let normalized = mnemonic.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut h = Keccak256::new();
        h.update(TAG_MASTER);
        h.update(normalized.as_bytes());
        let digest = h.finalize();
        let mut out = [0u8; SEED_LEN];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Fresh seed from the OS RNG.
    #[must_use]
    pub fn random() -> Self {
        let mut out = [0u8; SEED_LEN];
        OsRng.fill_bytes(&mut out);
        Self(out)
    }

    /// # Errors
    ///
    /// Returns `OtpError::Format` for non-hex input and `OtpError::InvalidLength`
    /// when the value is not 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self, OtpError> {
        let mut raw = hex::decode(s.trim().trim_start_matches("0x"))
            .map_err(|_| OtpError::Format("seed is not valid hex"))?;
        if raw.len() != SEED_LEN {
            let got = raw.len();
            raw.zeroize();
            return Err(OtpError::InvalidLength { expected: SEED_LEN, got });
        }
        let mut out = [0u8; SEED_LEN];
        out.copy_from_slice(&raw);
        raw.zeroize();
        Ok(Self(out))
    }

    /// ChainSeed = H16( "otp.chain.seed" || SEED || LE32(parent) || LE64(subtree) || LE64(leaf) )
    #[must_use]
    pub fn chain_seed(&self, parent_tree_idx: u32, subtree_idx: u64, leaf_idx: u64) -> Node {
        let mut buf = Vec::with_capacity(TAG_CHAIN_SEED.len() + SEED_LEN + 4 + 8 + 8);
        buf.extend_from_slice(TAG_CHAIN_SEED);
        buf.extend_from_slice(&self.0);
        buf.extend_from_slice(&le32(parent_tree_idx));
        buf.extend_from_slice(&le64(subtree_idx));
        buf.extend_from_slice(&le64(leaf_idx));
        let seed = h16(&buf);
        buf.zeroize();
        seed
    }
}

impl fmt::Debug for MasterSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSeed([REDACTED])")
    }
}
