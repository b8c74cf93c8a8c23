//! The root error type, composed from small per-component error enums — the same pattern this
//! crate's reference model uses (`client/common/failure_reason.rs`'s `BroadcastFailureReason`,
//! `KeygenFailureReason`, `SigningFailureReason` all composing into per-ceremony failure types).

use crate::codec::CodecError;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AdkgError {
    #[error("AEAD decryption failed")]
    DecryptFailure,
    #[error("polynomial commitment verification failed")]
    CommitmentMismatch,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("proof of knowledge / DLEQ verification failed")]
    BadProof,
    #[error("implicated party's public key does not match its claimed private key")]
    InvalidPublicKey,
    #[error("RBC predicate rejected the proposed message")]
    PredicateFail,
    #[error("transport send/receive failed: {0}")]
    Transport(String),
    #[error("message deserialization failed")]
    Deserialize,
    #[error("instance was cancelled")]
    Cancelled,
}
