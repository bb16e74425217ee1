use crate::{
    errors::OtpError,
    rotation::OtpProof,
    types::{AuthPath, CachedLayer, Node, MAX_DEPTH_OF_CACHE, MAX_TREE_HEIGHT, NODE_LEN},
};

#[inline]
#[must_use]
pub const fn le64(x: u64) -> [u8; 8] {
    x.to_le_bytes()
}

#[inline]
#[must_use]
pub const fn le32(x: u32) -> [u8; 4] {
    x.to_le_bytes()
}

const STEP_LEN: usize = NODE_LEN + 1;

fn read_exact<'a>(src: &mut &'a [u8], n: usize) -> Result<&'a [u8], OtpError> {
    if src.len() < n {
        return Err(OtpError::Format("short input"));
    }
    let (a, b) = src.split_at(n);
    *src = b;
    Ok(a)
}

fn read_u32(src: &mut &[u8]) -> Result<u32, OtpError> {
    let mut b = [0u8; 4];
    b.copy_from_slice(read_exact(src, 4)?);
    Ok(u32::from_le_bytes(b))
}

fn read_u64(src: &mut &[u8]) -> Result<u64, OtpError> {
    let mut b = [0u8; 8];
    b.copy_from_slice(read_exact(src, 8)?);
    Ok(u64::from_le_bytes(b))
}

fn read_node(src: &mut &[u8]) -> Result<Node, OtpError> {
    Node::try_from(read_exact(src, NODE_LEN)?)
}

/// Canonical `AuthPath`: `LE32(count)` || count * ( 16-byte sibling || direction byte )
#[must_use]
pub fn encode_auth_path(path: &AuthPath) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + path.siblings.len() * STEP_LEN);
    write_auth_path(&mut v, path);
    v
}

fn write_auth_path(v: &mut Vec<u8>, path: &AuthPath) {
    v.extend_from_slice(&le32(u32::try_from(path.siblings.len()).unwrap_or(0)));
    for (sib, right) in path.siblings.iter().zip(&path.directions) {
        v.extend_from_slice(&sib.0);
        v.push(u8::from(*right));
    }
}

fn read_auth_path(src: &mut &[u8]) -> Result<AuthPath, OtpError> {
    let count = read_u32(src)?;
    if count > MAX_TREE_HEIGHT {
        return Err(OtpError::Format("auth path longer than the maximum tree height"));
    }
    let mut siblings = Vec::with_capacity(count as usize);
    let mut directions = Vec::with_capacity(count as usize);
    for _ in 0..count {
        siblings.push(read_node(src)?);
        directions.push(match read_exact(src, 1)?[0] {
            0 => false,
            1 => true,
            _ => return Err(OtpError::Format("direction byte must be 0 or 1")),
        });
    }
    Ok(AuthPath { siblings, directions })
}

/// Decode an auth path from bytes.
///
/// # Errors
///
/// Returns `OtpError` if the data is short, carries trailing bytes, or a direction byte is not 0/1.
pub fn decode_auth_path(mut b: &[u8]) -> Result<AuthPath, OtpError> {
    let path = read_auth_path(&mut b)?;
    if !b.is_empty() {
        return Err(OtpError::Format("trailing bytes"));
    }
    Ok(path)
}

/// Canonical `OtpProof`: `LE64(otp_id)` || credential || `AuthPath`
#[must_use]
pub fn encode_otp_proof(proof: &OtpProof) -> Vec<u8> {
    let mut v = Vec::with_capacity(8 + NODE_LEN + 4 + proof.audit_path.len() * STEP_LEN);
    v.extend_from_slice(&le64(proof.otp_id));
    v.extend_from_slice(&proof.credential.0);
    write_auth_path(&mut v, &proof.audit_path);
    v
}

/// # Errors
///
/// Returns `OtpError` on short input, trailing bytes or a malformed path.
pub fn decode_otp_proof(mut b: &[u8]) -> Result<OtpProof, OtpError> {
    let otp_id = read_u64(&mut b)?;
    let credential = read_node(&mut b)?;
    let audit_path = read_auth_path(&mut b)?;
    if !b.is_empty() {
        return Err(OtpError::Format("trailing bytes"));
    }
    Ok(OtpProof { otp_id, credential, audit_path })
}

/// Canonical `CachedLayer`: `LE32(depth)` || `LE32(count)` || count * node
#[must_use]
pub fn encode_cached_layer(layer: &CachedLayer) -> Vec<u8> {
    let mut v = Vec::with_capacity(8 + layer.nodes.len() * NODE_LEN);
    v.extend_from_slice(&le32(layer.depth));
    v.extend_from_slice(&le32(u32::try_from(layer.nodes.len()).unwrap_or(0)));
    for n in &layer.nodes {
        v.extend_from_slice(&n.0);
    }
    v
}

/// # Errors
///
/// Returns `OtpError` if the depth exceeds the cache bound, the count is not `2^depth`,
/// or the byte length does not match.
pub fn decode_cached_layer(mut b: &[u8]) -> Result<CachedLayer, OtpError> {
    let depth = read_u32(&mut b)?;
    if depth > MAX_DEPTH_OF_CACHE {
        return Err(OtpError::Format("cached layer deeper than the cache bound"));
    }
    let count = read_u32(&mut b)? as usize;
    if count != 1usize << depth {
        return Err(OtpError::InvalidLength { expected: 1usize << depth, got: count });
    }
    if b.len() != count * NODE_LEN {
        return Err(OtpError::InvalidLength { expected: count * NODE_LEN, got: b.len() });
    }
    let nodes = b
        .chunks_exact(NODE_LEN)
        .map(Node::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    CachedLayer::new(depth, nodes)
}
