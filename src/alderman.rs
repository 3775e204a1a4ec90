//! Alderman-side service state: channel acceptance, payment clocks,
//! miner audits, failure proofs and demerit bookkeeping.
//!
//! The demerit map and the per-channel payment clocks are process-wide
//! state for an alderman. They live in an explicit [`Alderman`] service
//! object passed to the methods that need them, never in globals, so
//! several aldermen can coexist in one process and tests stay isolated.

use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::channel::{
    ChannelError, ChannelMessage, ChannelSnapshot, MessageType, PaymentChannel, CHANNEL_ID_SIZE,
};
use crate::erasure::EncodedDataset;
use crate::keys::{sha256, Keypair};
use crate::por;
use crate::ticket::Ticket;
use crate::wire;

/// Demerit count at which a quorum evaluation is requested.
pub const DEFAULT_DEMERIT_THRESHOLD: u32 = 3;

/// Evidence that a miner answered a retrievability challenge with an
/// invalid proof: the challenge and the ticket it returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureProof {
    /// The challenge the proof was requested for.
    #[serde(rename = "challenge", with = "wire::base64_bytes")]
    pub challenge: Vec<u8>,
    /// The ticket the miner returned.
    #[serde(rename = "proof", with = "wire::base64_bytes")]
    pub proof: Vec<u8>,
}

/// Destination for signed failure proofs (the ledger, in production).
///
/// Implementations deduplicate: submitting the same proof bytes twice must
/// record them once.
pub trait LedgerSink {
    /// Submits a failure proof and its detached `"(r,s)"` signature.
    /// Returns `true` when the submission was newly recorded.
    fn submit_failure(&mut self, proof: &[u8], signature: &[u8]) -> bool;
}

/// In-memory [`LedgerSink`] used by tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    seen: HashSet<[u8; 32]>,
    submissions: Vec<(Vec<u8>, Vec<u8>)>,
}

impl MemoryLedger {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// The accepted submissions, in arrival order.
    pub fn submissions(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.submissions
    }
}

impl LedgerSink for MemoryLedger {
    fn submit_failure(&mut self, proof: &[u8], signature: &[u8]) -> bool {
        if !self.seen.insert(sha256(proof)) {
            return false;
        }
        self.submissions.push((proof.to_vec(), signature.to_vec()));
        true
    }
}

/// One alderman's service state.
pub struct Alderman<L: LedgerSink> {
    keypair: Keypair,
    ledger: L,
    demerit_threshold: u32,
    demerits: HashMap<Vec<u8>, u32>,
    last_payment: HashMap<Vec<u8>, SystemTime>,
}

impl<L: LedgerSink> Alderman<L> {
    /// Creates a service with the default demerit threshold.
    pub fn new(keypair: Keypair, ledger: L) -> Self {
        Self {
            keypair,
            ledger,
            demerit_threshold: DEFAULT_DEMERIT_THRESHOLD,
            demerits: HashMap::new(),
            last_payment: HashMap::new(),
        }
    }

    /// Overrides the demerit threshold.
    pub fn with_demerit_threshold(mut self, threshold: u32) -> Self {
        self.demerit_threshold = threshold;
        self
    }

    /// The alderman's key material.
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// The failure-proof sink.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    fn channel_key(client_public_key: &[u8], channel_id: &[u8]) -> Vec<u8> {
        let mut key = client_public_key.to_vec();
        key.extend_from_slice(channel_id);
        key
    }

    /// Accepts a client's ChannelOpen message.
    ///
    /// Validates the message and its snapshot, rejects duplicate channels,
    /// builds this side's replica seeded with `encoding` (the shards this
    /// alderman locally holds for the client), emits ChannelAccepted, and
    /// starts the payment clock at `now`.
    pub fn accept_channel(
        &mut self,
        open: ChannelMessage,
        encoding: Option<EncodedDataset>,
        now: SystemTime,
    ) -> Result<(PaymentChannel, ChannelMessage), ChannelError> {
        if open.msg_type() != MessageType::ChannelOpen {
            return Err(ChannelError::ProtocolViolation {
                expected: "a ChannelOpen",
                found: open.msg_type().to_string(),
            });
        }
        if open.prev_hash() != &[0u8; 32] {
            return Err(ChannelError::BrokenLink);
        }
        if !open.verify_signature() {
            return Err(ChannelError::BadSignature);
        }
        let snapshot: ChannelSnapshot = serde_json::from_slice(open.payload())
            .map_err(|err| ChannelError::MalformedMessage(err.to_string()))?;
        if !snapshot.messages.is_empty() {
            return Err(ChannelError::MalformedMessage(
                "open snapshot must not carry messages".into(),
            ));
        }
        if snapshot.channel_id.len() != CHANNEL_ID_SIZE || snapshot.channel_id != open.channel_id()
        {
            return Err(ChannelError::MalformedMessage(
                "snapshot channel id does not match message".into(),
            ));
        }
        if snapshot.client_public_key != open.sender_public_key() {
            return Err(ChannelError::MalformedMessage(
                "snapshot client key does not match sender".into(),
            ));
        }
        let key = Self::channel_key(&snapshot.client_public_key, &snapshot.channel_id);
        if self.last_payment.contains_key(&key) {
            return Err(ChannelError::ChannelExists);
        }

        let mut replica = PaymentChannel::from_snapshot(snapshot, vec![open], encoding);
        let accepted = replica.accept(&self.keypair)?;
        self.last_payment.insert(key, now);
        log::debug!("accepted channel; payment clock started");
        Ok((replica, accepted))
    }

    /// Resets a channel's payment clock after a SendPayment arrived.
    pub fn record_payment(
        &mut self,
        channel: &PaymentChannel,
        now: SystemTime,
    ) -> Result<(), ChannelError> {
        let head = channel.last_message().map(ChannelMessage::msg_type);
        if head != Some(MessageType::SendPayment) {
            return Err(ChannelError::ProtocolViolation {
                expected: "a SendPayment",
                found: head.map_or_else(|| "empty log".to_string(), |t| t.to_string()),
            });
        }
        let key = Self::channel_key(channel.client_public_key(), channel.channel_id());
        self.last_payment.insert(key, now);
        Ok(())
    }

    /// Closes the channel when the client's payment is overdue.
    ///
    /// Emits a CloseChannel message iff more than the channel's interval
    /// has elapsed since the last recorded payment; otherwise leaves the
    /// channel untouched and returns `None`.
    pub fn check_payment(
        &mut self,
        channel: &mut PaymentChannel,
        now: SystemTime,
    ) -> Result<Option<ChannelMessage>, ChannelError> {
        let key = Self::channel_key(channel.client_public_key(), channel.channel_id());
        let Some(&last) = self.last_payment.get(&key) else {
            return Ok(None);
        };
        let elapsed = now.duration_since(last).unwrap_or_default();
        if elapsed <= channel.interval() {
            return Ok(None);
        }
        log::warn!("payment overdue by {:?}; closing channel", elapsed - channel.interval());
        let close = channel.close(&self.keypair)?;
        self.last_payment.remove(&key);
        Ok(Some(close))
    }

    /// Audits another miner's proof over `dataset` for `challenge`.
    ///
    /// On success, optionally cross-checks the ticket's embedded key
    /// against the expected transport identity. On failure, publishes a
    /// signed [`FailureProof`] to the ledger sink and increments the
    /// demerit counter for the ticket's embedded key; crossing the
    /// threshold requests a quorum evaluation.
    pub fn verify_miner(
        &mut self,
        k: usize,
        challenge: &[u8],
        ticket_bytes: &[u8],
        dataset: &EncodedDataset,
        expected_miner: Option<&[u8]>,
    ) -> bool {
        if por::verify_por(dataset, challenge, ticket_bytes, k) {
            if let Some(expected) = expected_miner {
                let embedded = Ticket::from_bytes(ticket_bytes)
                    .map(|ticket| ticket.public_key)
                    .unwrap_or_default();
                if embedded != expected {
                    log::warn!("ticket key does not match the miner it came from");
                    return false;
                }
            }
            return true;
        }
        self.punish(challenge, ticket_bytes);
        false
    }

    fn punish(&mut self, challenge: &[u8], ticket_bytes: &[u8]) {
        match self.failure_proof(challenge, ticket_bytes) {
            Ok((proof, signature)) => {
                let new = self.ledger.submit_failure(&proof, &signature);
                log::debug!("failure proof submitted (new: {new})");
            }
            Err(err) => log::warn!("failed to build failure proof: {err}"),
        }
        match Ticket::from_bytes(ticket_bytes) {
            Ok(ticket) => {
                let count = self.demerits.entry(ticket.public_key).or_insert(0);
                *count += 1;
                if *count >= self.demerit_threshold {
                    log::warn!("demerit threshold reached; requesting quorum check");
                }
            }
            Err(_) => log::warn!("unparseable ticket; demerit not attributable"),
        }
    }

    /// Builds and signs the failure proof for a bad `(challenge, ticket)`
    /// pair. Returns the proof bytes and the detached signature.
    pub fn failure_proof(
        &self,
        challenge: &[u8],
        ticket_bytes: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), ChannelError> {
        let proof = FailureProof {
            challenge: challenge.to_vec(),
            proof: ticket_bytes.to_vec(),
        };
        let bytes = serde_json::to_vec(&proof)
            .map_err(|err| ChannelError::MalformedMessage(err.to_string()))?;
        let signature = self.keypair.sign_digest(&sha256(&bytes))?;
        Ok((bytes, signature))
    }

    /// Demerit count recorded against a miner's DER public key.
    pub fn demerits(&self, miner_public_key: &[u8]) -> u32 {
        self.demerits.get(miner_public_key).copied().unwrap_or(0)
    }

    /// True once a miner's demerits reached the quorum threshold.
    pub fn needs_quorum(&self, miner_public_key: &[u8]) -> bool {
        self.demerits(miner_public_key) >= self.demerit_threshold
    }

    /// Hands back the shards this endpoint holds for the channel, for a
    /// client re-downloading its file.
    pub fn download_file<'a>(&self, channel: &'a PaymentChannel) -> Option<&'a EncodedDataset> {
        channel.encoding()
    }
}

/// Evaluates a quorum vote: true iff at least `threshold` votes agree.
///
/// Used when the aldermen decide whether a peer that crossed the demerit
/// threshold should be expelled.
pub fn quorum_reached(votes: &[bool], threshold: usize) -> bool {
    votes.iter().filter(|&&vote| vote).count() >= threshold
}
