#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

//! Hash-chain OTP authentication engine
//!
//! A wallet's one-time passwords are the links of per-leaf hash chains. The
//! chain tips are the leaves of small child Merkle subtrees, whose roots in turn
//! are the leaves of a parent tree; only the parent root and the cached layer of
//! the active subtree ever need to be public.

// Fixed choices:
// - Hash: Keccak-256 truncated to 16 bytes
// - Interior node: H16(left || right), no domain byte
// - Chain seed: H16("otp.chain.seed" || master || LE32(parent) || LE64(subtree) || LE64(leaf))
// - Cached layer: at most 7 levels below a subtree root

pub mod types;
pub mod errors;
pub mod ser;
pub mod hashers;
pub mod config;
pub mod chain;
pub mod merkle;
pub mod numbering;
pub mod rotation;
pub mod verifier;
pub mod authenticator;
pub mod record;

pub use types::*;
pub use errors::{OtpError, Result};
pub use hashers::{commitment, commitment_key, h16, hash_n, hash_node, MasterSeed};
pub use config::TreeConfig;
pub use chain::{verify_credential, ChainGenerator, LeafCoords};
pub use numbering::{OtpCoords, OtpNumbering, SlotKind};
pub use rotation::{
    ChildRotation, ConfirmMaterial, OtpProof, ParentRotationPlan, ParentStage, RotationState,
};
pub use verifier::Verifier;
pub use authenticator::Authenticator;
pub use record::{CachedLeaves, WalletRecord};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_VERSION: u32 = 1;
