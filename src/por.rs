//! Proof-of-retrievability over an erasure-coded dataset.
//!
//! The proof is a sequential hash chain. An identity string `id =
//! blockchain_val || public_key_der` and a seed pick the first shard
//! index; each step hashes `id || previous_signature || shard`, signs the
//! digest, and lets the fresh signature pick the next index. A verifier
//! holding the same shards replays the chain with its *own* shard bytes,
//! so a prover that lost a visited shard cannot produce signatures that
//! verify.
//!
//! The same routine serves two callers: a client auditing an alderman
//! (the client picks the seed), and a miner grinding scratch-off tickets
//! (the miner draws random seeds until the hashed ticket beats the
//! difficulty target).

use std::sync::atomic::{AtomicBool, Ordering};

use num_bigint::BigUint;
use rand::RngCore;
use thiserror::Error;

use crate::erasure::EncodedDataset;
use crate::keys::{self, sha256, KeyError, Keypair, ZERO_SIGNATURE};
use crate::ticket::{FileInfo, Ticket, TicketCodecError};

/// Size in bytes of the random seed drawn per mining attempt.
pub const MINING_SEED_SIZE: usize = 12;

/// Errors reported by the prover. Verification never errors; it answers
/// `false`.
#[derive(Debug, Error)]
pub enum PorError {
    /// The dataset holds no shards, so no chain index can be derived.
    #[error("dataset holds no shards")]
    EmptyDataset,
    /// Key material failed to encode or sign.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// The produced ticket failed to serialize.
    #[error(transparent)]
    Codec(#[from] TicketCodecError),
}

/// Reduces a digest to a shard index via big-endian interpretation mod `n`.
fn chain_index(digest: &[u8; 32], shard_count: usize) -> usize {
    let reduced = BigUint::from_bytes_be(digest) % BigUint::from(shard_count as u64);
    reduced.iter_u64_digits().next().unwrap_or(0) as usize
}

/// Produces a proof-of-retrievability ticket over `k` chain steps.
///
/// The ticket binds the prover's key, the opaque `blockchain_val` context,
/// and the `seed`; the chain may revisit a shard index. Returns the
/// canonical ticket bytes ready for the wire.
pub fn produce_por(
    keypair: &Keypair,
    blockchain_val: &[u8],
    dataset: &EncodedDataset,
    k: usize,
    seed: &[u8],
) -> Result<Vec<u8>, PorError> {
    if dataset.is_empty() {
        return Err(PorError::EmptyDataset);
    }
    let public_key = keypair.public_key_der()?;
    let mut id = blockchain_val.to_vec();
    id.extend_from_slice(&public_key);

    let mut seeded = id.clone();
    seeded.extend_from_slice(seed);
    let mut index = chain_index(&sha256(&seeded), dataset.len());

    let mut signature = ZERO_SIGNATURE.to_vec();
    let mut proof_files = Vec::with_capacity(k);
    for _ in 0..k {
        let shard = &dataset.shards()[index];
        let mut step = id.clone();
        step.extend_from_slice(&signature);
        step.extend_from_slice(shard);
        signature = keypair.sign_digest(&sha256(&step))?;

        proof_files.push(FileInfo {
            file_segment: shard.clone(),
            signature: signature.clone(),
            merkle_proof: dataset.hashes()[index].to_vec(),
        });

        let mut next = id.clone();
        next.extend_from_slice(&signature);
        index = chain_index(&sha256(&next), dataset.len());
    }

    let ticket = Ticket {
        public_key,
        seed: seed.to_vec(),
        proof_files,
    };
    Ok(ticket.to_bytes()?)
}

/// Verifies a ticket against the verifier's own copy of the dataset.
///
/// Each step must (1) name the shard hash the verifier expects at the
/// chain index, and (2) carry a signature that verifies over a digest the
/// verifier computes from its *own* shard bytes. Any parse failure, hash
/// mismatch, bad signature, or step-count mismatch answers `false`.
pub fn verify_por(
    dataset: &EncodedDataset,
    blockchain_val: &[u8],
    ticket_bytes: &[u8],
    k: usize,
) -> bool {
    let ticket = match Ticket::from_bytes(ticket_bytes) {
        Ok(ticket) => ticket,
        Err(err) => {
            log::debug!("rejecting ticket: {err}");
            return false;
        }
    };
    if dataset.is_empty() || ticket.proof_files.len() != k {
        return false;
    }
    let verifying_key = match keys::decode_public_key_der(&ticket.public_key) {
        Ok(key) => key,
        Err(err) => {
            log::debug!("rejecting ticket public key: {err}");
            return false;
        }
    };

    let mut id = blockchain_val.to_vec();
    id.extend_from_slice(&ticket.public_key);

    let mut seeded = id.clone();
    seeded.extend_from_slice(&ticket.seed);
    let mut index = chain_index(&sha256(&seeded), dataset.len());

    let mut signature = ZERO_SIGNATURE.to_vec();
    for step in &ticket.proof_files {
        if step.merkle_proof != dataset.hashes()[index] {
            return false;
        }
        let mut chained = id.clone();
        chained.extend_from_slice(&signature);
        chained.extend_from_slice(&dataset.shards()[index]);
        if !keys::verify_digest(&verifying_key, &sha256(&chained), &step.signature) {
            return false;
        }
        signature = step.signature.clone();

        let mut next = id.clone();
        next.extend_from_slice(&signature);
        index = chain_index(&sha256(&next), dataset.len());
    }
    true
}

/// True when the hashed ticket beats the difficulty target.
fn winning_ticket(blockchain_val: &[u8], ticket_bytes: &[u8], difficulty: &BigUint) -> bool {
    let mut preimage = blockchain_val.to_vec();
    preimage.extend_from_slice(ticket_bytes);
    BigUint::from_bytes_be(&sha256(&preimage)) < *difficulty
}

/// Grinds random seeds until a ticket hashes below `difficulty`.
///
/// `blockchain_val` is the opaque context binding the ticket to a point in
/// ledger history. The loop checks `cancel` between seeds so a caller can
/// abort the search when a new block arrives; a cancelled search returns
/// `Ok(None)`.
pub fn attempt_mine(
    keypair: &Keypair,
    blockchain_val: &[u8],
    dataset: &EncodedDataset,
    k: usize,
    difficulty: &BigUint,
    cancel: &AtomicBool,
) -> Result<Option<Vec<u8>>, PorError> {
    let mut rng = rand::thread_rng();
    let mut seed = [0u8; MINING_SEED_SIZE];
    while !cancel.load(Ordering::Relaxed) {
        rng.fill_bytes(&mut seed);
        let ticket = produce_por(keypair, blockchain_val, dataset, k, &seed)?;
        if winning_ticket(blockchain_val, &ticket, difficulty) {
            return Ok(Some(ticket));
        }
    }
    Ok(None)
}

/// Verifies a mined ticket: the proof chain must verify and the hashed
/// ticket must beat the difficulty target.
pub fn verify_mine(
    dataset: &EncodedDataset,
    blockchain_val: &[u8],
    ticket_bytes: &[u8],
    k: usize,
    difficulty: &BigUint,
) -> bool {
    verify_por(dataset, blockchain_val, ticket_bytes, k)
        && winning_ticket(blockchain_val, ticket_bytes, difficulty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erasure::create_erasure_coding;

    const BLOCKCHAIN_VAL: &[u8] = &[0u8; 6];

    fn dataset() -> EncodedDataset {
        create_erasure_coding(b"the rain in spain stays mainly in the plain", 4, 4).unwrap()
    }

    #[test]
    fn honest_proof_verifies() {
        let keypair = Keypair::generate();
        let encoding = dataset();
        let ticket = produce_por(&keypair, BLOCKCHAIN_VAL, &encoding, 5, b"seedbytes").unwrap();
        assert!(verify_por(&encoding, BLOCKCHAIN_VAL, &ticket, 5));
    }

    #[test]
    fn zero_step_proof_is_trivially_valid() {
        let keypair = Keypair::generate();
        let encoding = dataset();
        let ticket = produce_por(&keypair, BLOCKCHAIN_VAL, &encoding, 0, b"seed").unwrap();
        assert!(verify_por(&encoding, BLOCKCHAIN_VAL, &ticket, 0));
    }

    #[test]
    fn proof_is_deterministic_for_fixed_inputs() {
        let keypair = Keypair::generate();
        let encoding = dataset();
        let first = produce_por(&keypair, BLOCKCHAIN_VAL, &encoding, 3, b"fixed").unwrap();
        let second = produce_por(&keypair, BLOCKCHAIN_VAL, &encoding, 3, b"fixed").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn single_shard_chain_may_reselect() {
        let keypair = Keypair::generate();
        let encoding = EncodedDataset::from_parts(vec![vec![7u8; 16]], vec![0], 1, 0, 16).unwrap();
        let ticket = produce_por(&keypair, BLOCKCHAIN_VAL, &encoding, 3, b"seed").unwrap();
        assert!(verify_por(&encoding, BLOCKCHAIN_VAL, &ticket, 3));
    }

    #[test]
    fn mutated_shard_fails_verification() {
        let keypair = Keypair::generate();
        let encoding = dataset();
        let ticket = produce_por(&keypair, BLOCKCHAIN_VAL, &encoding, 5, b"seed").unwrap();
        // The verifier's copy diverges from what the prover signed.
        let mut shards: Vec<Vec<u8>> = encoding.shards().to_vec();
        for shard in &mut shards {
            shard[0] ^= 0xff;
        }
        let mutated = EncodedDataset::from_parts(
            shards,
            encoding.ordering().to_vec(),
            encoding.data_shards(),
            encoding.parity_shards(),
            encoding.original_len(),
        )
        .unwrap();
        assert!(!verify_por(&mutated, BLOCKCHAIN_VAL, &ticket, 5));
    }

    #[test]
    fn substituted_public_key_fails_verification() {
        let keypair = Keypair::generate();
        let impostor = Keypair::generate();
        let encoding = dataset();
        let ticket_bytes =
            produce_por(&keypair, BLOCKCHAIN_VAL, &encoding, 4, b"seed").unwrap();
        let mut ticket = Ticket::from_bytes(&ticket_bytes).unwrap();
        ticket.public_key = impostor.public_key_der().unwrap();
        let forged = ticket.to_bytes().unwrap();
        assert!(!verify_por(&encoding, BLOCKCHAIN_VAL, &forged, 4));
    }

    #[test]
    fn wrong_context_fails_verification() {
        let keypair = Keypair::generate();
        let encoding = dataset();
        let ticket = produce_por(&keypair, BLOCKCHAIN_VAL, &encoding, 4, b"seed").unwrap();
        assert!(!verify_por(&encoding, b"other block", &ticket, 4));
    }

    #[test]
    fn step_count_must_match() {
        let keypair = Keypair::generate();
        let encoding = dataset();
        let ticket = produce_por(&keypair, BLOCKCHAIN_VAL, &encoding, 3, b"seed").unwrap();
        assert!(!verify_por(&encoding, BLOCKCHAIN_VAL, &ticket, 4));
        assert!(!verify_por(&encoding, BLOCKCHAIN_VAL, &ticket, 2));
    }

    #[test]
    fn garbage_ticket_fails_verification() {
        assert!(!verify_por(&dataset(), BLOCKCHAIN_VAL, b"garbage", 1));
    }

    #[test]
    fn easy_difficulty_mines_and_verifies() {
        let keypair = Keypair::generate();
        let encoding = dataset();
        let difficulty = BigUint::from(2u8).pow(250);
        let cancel = AtomicBool::new(false);
        let ticket = attempt_mine(&keypair, BLOCKCHAIN_VAL, &encoding, 2, &difficulty, &cancel)
            .unwrap()
            .expect("difficulty 2^250 should be met quickly");
        assert!(verify_mine(&encoding, BLOCKCHAIN_VAL, &ticket, 2, &difficulty));
        // An impossible target rejects the same ticket.
        assert!(!verify_mine(
            &encoding,
            BLOCKCHAIN_VAL,
            &ticket,
            2,
            &BigUint::from(0u8)
        ));
    }

    #[test]
    fn cancelled_mining_stops_without_a_ticket() {
        let keypair = Keypair::generate();
        let encoding = dataset();
        let cancel = AtomicBool::new(true);
        let result = attempt_mine(
            &keypair,
            BLOCKCHAIN_VAL,
            &encoding,
            1,
            &BigUint::from(1u8),
            &cancel,
        )
        .unwrap();
        assert!(result.is_none());
    }
}
