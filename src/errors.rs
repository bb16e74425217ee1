use thiserror::Error;

use crate::types::Node;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OtpError {
    #[error("invalid tree configuration: {0}")]
    Config(&'static str),

    #[error("invalid length: expected {expected} got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("format error: {0}")]
    Format(&'static str),

    #[error("leaf count {0} is not a non-zero power of two")]
    InvalidLeafCount(usize),

    #[error("{what} out of range: {index} not in [{min}, {max})")]
    OutOfRange { what: &'static str, index: u64, min: u64, max: u64 },

    #[error("otp {otp_id} exhausted: slot {slot_idx} of subtree {subtree_idx} is reserved")]
    Exhausted { otp_id: u64, subtree_idx: u64, slot_idx: u64 },

    #[error("proof mismatch ({context}): expected {expected} got {actual}")]
    ProofMismatch { context: &'static str, expected: Node, actual: Node },

    #[error("rotation order violated: {operation} not allowed in state {state}")]
    RotationOrder { operation: &'static str, state: &'static str },

    #[error("otp {otp_id} already consumed, next usable is {next}")]
    Replay { otp_id: u64, next: u64 },

    #[error("caller is not the wallet owner")]
    Unauthorized,

    #[error("wallet destroyed")]
    Destroyed,
}

pub type Result<T> = core::result::Result<T, OtpError>;
