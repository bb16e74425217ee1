use crate::{
    errors::OtpError,
    hashers::{ct_eq_node, hash_node},
    types::{AuthPath, CachedLayer, Node},
};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "parallel")]
const PAR_MIN_WIDTH: usize = 1 << 12;

fn height_of(len: usize) -> Result<u32, OtpError> {
    if len == 0 || !len.is_power_of_two() {
        return Err(OtpError::InvalidLeafCount(len));
    }
    Ok(len.trailing_zeros())
}

/// Fold the first `width` nodes of `nodes` into the first `width / 2` slots.
fn fold_in_place(nodes: &mut [Node], width: usize) {
    #[cfg(feature = "parallel")]
    if width >= PAR_MIN_WIDTH {
        let next: Vec<Node> = nodes[..width]
            .par_chunks_exact(2)
            .map(|pair| hash_node(&pair[0], &pair[1]))
            .collect();
        nodes[..width / 2].copy_from_slice(&next);
        return;
    }
    for i in 0..width / 2 {
        nodes[i] = hash_node(&nodes[2 * i], &nodes[2 * i + 1]);
    }
}

/// Root of a tree over `leaves` (length must be a power of two).
///
/// # Errors
///
/// Returns `OtpError::InvalidLeafCount` for an empty or non power-of-two leaf set.
pub fn build(leaves: &[Node]) -> Result<Node, OtpError> {
    height_of(leaves.len())?;
    let mut nodes = leaves.to_vec();
    let mut width = nodes.len();
    while width > 1 {
        fold_in_place(&mut nodes, width);
        width /= 2;
    }
    Ok(nodes[0])
}

/// Audit path for `leaves[index]`, bottom-up.
///
/// # Errors
///
/// Returns `OtpError::InvalidLeafCount` for a bad leaf set and `OtpError::OutOfRange`
/// when `index` is not a leaf position.
pub fn proof(leaves: &[Node], index: u64) -> Result<AuthPath, OtpError> {
    let height = height_of(leaves.len())?;
    let Some(mut idx) = usize::try_from(index).ok().filter(|&i| i < leaves.len()) else {
        return Err(OtpError::OutOfRange {
            what: "leaf index",
            index,
            min: 0,
            max: leaves.len() as u64,
        });
    };
    let mut nodes = leaves.to_vec();
    let mut width = nodes.len();
    let mut path = AuthPath {
        siblings: Vec::with_capacity(height as usize),
        directions: Vec::with_capacity(height as usize),
    };
    while width > 1 {
        path.siblings.push(nodes[idx ^ 1]);
        path.directions.push(idx & 1 == 1);
        fold_in_place(&mut nodes, width);
        width /= 2;
        idx >>= 1;
    }
    Ok(path)
}

/// Fold `leaf` up along `path` using the path's own direction bits.
#[must_use]
pub fn fold_path(leaf: &Node, path: &AuthPath) -> Node {
    let mut acc = *leaf;
    for (sib, &right) in path.siblings.iter().zip(&path.directions) {
        acc = if right { hash_node(sib, &acc) } else { hash_node(&acc, sib) };
    }
    acc
}

/// Verify `leaf` sits at `index` under `root`.
///
/// The direction bits must spell `index`, so a valid path for one position
/// cannot be replayed for another.
#[must_use]
pub fn verify(root: &Node, path: &AuthPath, leaf: &Node, index: u64) -> bool {
    match path.index() {
        Some(encoded) if encoded == index => ct_eq_node(&fold_path(leaf, path), root),
        _ => false,
    }
}

/// Reduce `leaves` to the layer `depth` levels below the root.
///
/// # Errors
///
/// Returns `OtpError::InvalidLeafCount` for a bad leaf set and `OtpError::OutOfRange`
/// when `depth` exceeds the tree height.
pub fn materialize_cached_layer(leaves: &[Node], depth: u32) -> Result<CachedLayer, OtpError> {
    let height = height_of(leaves.len())?;
    if depth > height {
        return Err(OtpError::OutOfRange {
            what: "cache depth",
            index: u64::from(depth),
            min: 0,
            max: u64::from(height) + 1,
        });
    }
    let mut nodes = leaves.to_vec();
    let mut width = nodes.len();
    let target = 1usize << depth;
    while width > target {
        fold_in_place(&mut nodes, width);
        width /= 2;
    }
    nodes.truncate(width);
    CachedLayer::new(depth, nodes)
}

/// Root of the subtree a cached layer was cut from.
///
/// # Errors
///
/// Returns `OtpError::InvalidLeafCount` if the layer is not `2^depth` wide.
pub fn root_from_cached_layer(layer: &CachedLayer) -> Result<Node, OtpError> {
    if layer.nodes.len() != 1usize << layer.depth {
        return Err(OtpError::InvalidLeafCount(layer.nodes.len()));
    }
    build(&layer.nodes)
}

/// Complete a full audit path for `leaf_index` from the cached slice plus the
/// recomputed `block` of leaves under the cached node that covers it.
///
/// Only `block.len()` leaves are hashed below the layer; the upper part is
/// folded over the `2^depth` cached nodes.
///
/// # Errors
///
/// Returns `OtpError::OutOfRange` when `leaf_index` falls outside the tree,
/// `OtpError::InvalidLeafCount` for a malformed block, and `OtpError::ProofMismatch`
/// when the block does not reduce to the cached node.
pub fn proof_from_cached_layer(
    layer: &CachedLayer,
    block: &[Node],
    leaf_index: u64,
) -> Result<AuthPath, OtpError> {
    let block_height = height_of(block.len())?;
    let index_within_layer = leaf_index >> block_height;
    let Some(&cached) = usize::try_from(index_within_layer).ok().and_then(|i| layer.nodes.get(i))
    else {
        return Err(OtpError::OutOfRange {
            what: "leaf index",
            index: leaf_index,
            min: 0,
            max: (layer.nodes.len() as u64) << block_height,
        });
    };
    let block_root = build(block)?;
    if !ct_eq_node(&block_root, &cached) {
        return Err(OtpError::ProofMismatch {
            context: "recomputed block vs cached layer node",
            expected: cached,
            actual: block_root,
        });
    }
    let lower = proof(block, leaf_index & ((1u64 << block_height) - 1))?;
    let upper = proof(&layer.nodes, index_within_layer)?;
    Ok(lower.extend(&upper))
}

/// Verifier-side check of a short path that ends at the cached layer.
#[must_use]
pub fn verify_against_layer(
    layer: &CachedLayer,
    path: &AuthPath,
    leaf: &Node,
    leaf_index: u64,
) -> bool {
    let steps = path.len();
    if steps >= 64 {
        return false;
    }
    let Some(node) = usize::try_from(leaf_index >> steps).ok().and_then(|i| layer.nodes.get(i))
    else {
        return false;
    };
    let local = leaf_index & ((1u64 << steps) - 1);
    verify(node, path, leaf, local)
}
