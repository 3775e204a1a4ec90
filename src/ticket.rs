//! Wire representation of proof-of-retrievability tickets.
//!
//! A ticket is the serialized output of one proof run. The JSON field
//! names and base64 byte encoding are part of the protocol: provers and
//! verifiers exchange tickets bit-exactly, and the mining difficulty check
//! hashes the serialized form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wire;

/// One step of the sequential proof chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileInfo {
    /// The shard bytes the chain visited at this step.
    #[serde(with = "wire::base64_bytes")]
    pub file_segment: Vec<u8>,
    /// `"(r,s)"` signature over this step's chained digest.
    #[serde(with = "wire::base64_bytes")]
    pub signature: Vec<u8>,
    /// SHA-256 of the shard, tying the segment back to the stored dataset.
    #[serde(with = "wire::base64_bytes")]
    pub merkle_proof: Vec<u8>,
}

/// A complete proof-of-retrievability ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ticket {
    /// Prover's public key as a PKIX/DER document.
    #[serde(with = "wire::base64_bytes")]
    pub public_key: Vec<u8>,
    /// Seed the chain was keyed with: miner-chosen for scratch-off
    /// tickets, challenger-chosen for retrievability audits.
    #[serde(with = "wire::base64_bytes")]
    pub seed: Vec<u8>,
    /// The `k` proof steps in chain order.
    pub proof_files: Vec<FileInfo>,
}

/// Errors reported by the ticket codec.
#[derive(Debug, Error)]
pub enum TicketCodecError {
    /// The ticket bytes were not a valid JSON ticket document.
    #[error("malformed ticket: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Ticket {
    /// Serializes the ticket to its canonical JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TicketCodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a ticket from its canonical JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TicketCodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
