//! Off-ledger payment channels between a client and an alderman.
//!
//! A channel is a totally ordered, hash-linked log of signed messages.
//! Each endpoint owns its own replica; every message carries the SHA-256
//! of its predecessor's canonical JSON form, so the two replicas cannot
//! silently diverge. Messages are immutable once appended and the log is
//! append-only.
//!
//! The sequence is modeled on lightning-style channels: the client opens
//! and funds the channel, periodically challenges the alderman to prove
//! it still holds the client's shards, and pays per verified proof; either
//! side may close, after which the log accepts nothing further.

use std::fmt;
use std::time::Duration;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::erasure::EncodedDataset;
use crate::keys::{self, sha256, KeyError, Keypair};
use crate::por::{self, PorError};
use crate::wire;

/// Size in bytes of a channel identifier.
pub const CHANNEL_ID_SIZE: usize = 128;

/// Size in bytes of the random audit challenge carried by a PORRequest.
pub const CHALLENGE_SIZE: usize = 10;

/// Size in bytes of the opaque ledger-state snapshot taken at channel open.
pub const BLOCKCHAIN_STATE_SIZE: usize = 6;

/// Discriminant of a channel message; serialized as the integer `mType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageType {
    /// Client opens the channel; payload is the channel snapshot.
    ChannelOpen,
    /// Alderman accepts; payload echoes the snapshot with the open
    /// message appended.
    ChannelAccepted,
    /// Client created the funding transaction; payload is its identifier.
    FundsCreated,
    /// Alderman approved the funding transaction; payload echoes the
    /// identifier.
    FundsApproved,
    /// Client challenges the alderman; payload is the audit challenge.
    PorRequest,
    /// Alderman answers a challenge; payload is a proof ticket.
    PorResponse,
    /// Client pays for a verified proof; payload is the little-endian
    /// amount.
    SendPayment,
    /// Either side terminates the channel; payload is empty.
    CloseChannel,
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ChannelOpen),
            1 => Ok(Self::ChannelAccepted),
            2 => Ok(Self::FundsCreated),
            3 => Ok(Self::FundsApproved),
            4 => Ok(Self::PorRequest),
            5 => Ok(Self::PorResponse),
            6 => Ok(Self::SendPayment),
            7 => Ok(Self::CloseChannel),
            other => Err(format!("unknown message type {other}")),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ChannelOpen => "ChannelOpen",
            Self::ChannelAccepted => "ChannelAccepted",
            Self::FundsCreated => "FundsCreated",
            Self::FundsApproved => "FundsApproved",
            Self::PorRequest => "PORRequest",
            Self::PorResponse => "PORResponse",
            Self::SendPayment => "SendPayment",
            Self::CloseChannel => "CloseChannel",
        };
        f.write_str(name)
    }
}

/// Errors raised by channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A method was invoked in a state its transition does not allow.
    #[error("protocol violation: expected {expected}, found {found}")]
    ProtocolViolation {
        /// What the transition required.
        expected: &'static str,
        /// What the log actually held.
        found: String,
    },
    /// AcceptChannel saw a channel id it already tracks.
    #[error("channel already exists")]
    ChannelExists,
    /// A message signature failed to verify.
    #[error("message signature failed to verify")]
    BadSignature,
    /// A received message's sender is neither channel principal.
    #[error("sender is not a channel principal")]
    UnknownSender,
    /// A received message does not hash-link to the local log.
    #[error("message does not extend the local log")]
    BrokenLink,
    /// A received message names a different channel.
    #[error("message belongs to a different channel")]
    WrongChannel,
    /// A payload or message failed to parse.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// The endpoint holds no encoding to prove or verify against.
    #[error("no local encoding for this channel")]
    MissingEncoding,
    /// Key material failed.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// The proof engine failed.
    #[error(transparent)]
    Por(#[from] PorError),
}

/// An immutable, signed, hash-linked channel message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    #[serde(rename = "mType")]
    msg_type: MessageType,
    #[serde(rename = "channelID", with = "wire::base64_bytes")]
    channel_id: Vec<u8>,
    #[serde(rename = "signature", with = "wire::base64_bytes")]
    signature: Vec<u8>,
    #[serde(rename = "senderPublicKey", with = "wire::base64_bytes")]
    sender_public_key: Vec<u8>,
    #[serde(rename = "payload", with = "wire::base64_bytes")]
    payload: Vec<u8>,
    #[serde(rename = "prevHash", with = "wire::base64_digest")]
    prev_hash: [u8; 32],
}

impl ChannelMessage {
    /// Builds and signs a message linked to `prev`.
    ///
    /// The signature covers `SHA-256(payload || prev_hash)`. A genesis
    /// message (no predecessor) carries an all-zero `prev_hash`.
    ///
    /// Panics if `channel_id` is not exactly [`CHANNEL_ID_SIZE`] bytes;
    /// ids are produced locally, never parsed from peers.
    pub fn new(
        msg_type: MessageType,
        payload: Vec<u8>,
        channel_id: &[u8],
        keypair: &Keypair,
        prev: Option<&ChannelMessage>,
    ) -> Result<Self, ChannelError> {
        assert_eq!(
            channel_id.len(),
            CHANNEL_ID_SIZE,
            "channel id must be {CHANNEL_ID_SIZE} bytes"
        );
        let prev_hash = prev.map(ChannelMessage::digest).unwrap_or([0u8; 32]);
        let mut to_sign = payload.clone();
        to_sign.extend_from_slice(&prev_hash);
        let signature = keypair.sign_digest(&sha256(&to_sign))?;
        Ok(Self {
            msg_type,
            channel_id: channel_id.to_vec(),
            signature,
            sender_public_key: keypair.public_key_der()?,
            payload,
            prev_hash,
        })
    }

    /// The message discriminant.
    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    /// The channel this message belongs to.
    pub fn channel_id(&self) -> &[u8] {
        &self.channel_id
    }

    /// The sender's PKIX/DER public key.
    pub fn sender_public_key(&self) -> &[u8] {
        &self.sender_public_key
    }

    /// The message body bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Digest of the predecessor's canonical form; zero for genesis.
    pub fn prev_hash(&self) -> &[u8; 32] {
        &self.prev_hash
    }

    /// Canonical wire bytes of this message.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("channel message serializes to JSON")
    }

    /// SHA-256 of the canonical wire bytes; what the successor links to.
    pub fn digest(&self) -> [u8; 32] {
        sha256(&self.canonical_bytes())
    }

    /// Parses a message from its canonical wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChannelError> {
        serde_json::from_slice(bytes).map_err(|err| ChannelError::MalformedMessage(err.to_string()))
    }

    /// Checks the embedded signature under the embedded sender key.
    pub fn verify_signature(&self) -> bool {
        let mut signed = self.payload.clone();
        signed.extend_from_slice(&self.prev_hash);
        keys::verify_digest_der(&self.sender_public_key, &sha256(&signed), &self.signature)
    }
}

/// Channel parameters as carried inside ChannelOpen/ChannelAccepted
/// payloads.
///
/// The ChannelOpen payload always has an empty `messages` list; the
/// ChannelAccepted payload echoes the snapshot with the open message
/// appended. The locally held encoding never travels in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    /// Channel identifier, [`CHANNEL_ID_SIZE`] bytes.
    #[serde(rename = "channelID", with = "wire::base64_bytes")]
    pub channel_id: Vec<u8>,
    /// Client's PKIX/DER public key.
    #[serde(rename = "clientPublicKey", with = "wire::base64_bytes")]
    pub client_public_key: Vec<u8>,
    /// Alderman's PKIX/DER public key.
    #[serde(rename = "aldermanPublicKey", with = "wire::base64_bytes")]
    pub alderman_public_key: Vec<u8>,
    /// Opaque ledger-state snapshot used as the proof context.
    #[serde(rename = "blockchainState", with = "wire::base64_bytes")]
    pub blockchain_state: Vec<u8>,
    /// Payment per verified proof, in ledger units.
    #[serde(rename = "payment")]
    pub payment: u64,
    /// Payment interval in milliseconds.
    #[serde(rename = "intervalMs")]
    pub interval_ms: u64,
    /// Message log carried by ChannelAccepted; empty at open.
    #[serde(rename = "messages", default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ChannelMessage>,
}

/// One endpoint's replica of a payment channel.
#[derive(Debug, Clone)]
pub struct PaymentChannel {
    channel_id: Vec<u8>,
    client_public_key: Vec<u8>,
    alderman_public_key: Vec<u8>,
    blockchain_state: Vec<u8>,
    payment: u64,
    interval: Duration,
    messages: Vec<ChannelMessage>,
    encoding: Option<EncodedDataset>,
}

impl PaymentChannel {
    /// Opens a channel toward the alderman identified by
    /// `alderman_public_key` (PKIX/DER).
    ///
    /// Draws a random 128-byte channel id, snapshots a zeroed ledger
    /// state, and emits the signed ChannelOpen genesis message. `encoding`
    /// is the client's own coded view of the stored file, used later to
    /// verify proofs.
    pub fn open(
        client: &Keypair,
        alderman_public_key: Vec<u8>,
        payment: u64,
        interval: Duration,
        encoding: Option<EncodedDataset>,
    ) -> Result<(Self, ChannelMessage), ChannelError> {
        let mut channel_id = vec![0u8; CHANNEL_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut channel_id);
        let mut channel = Self {
            channel_id: channel_id.clone(),
            client_public_key: client.public_key_der()?,
            alderman_public_key,
            blockchain_state: vec![0u8; BLOCKCHAIN_STATE_SIZE],
            payment,
            interval,
            messages: Vec::new(),
            encoding,
        };
        let payload = serde_json::to_vec(&channel.snapshot(false))
            .map_err(|err| ChannelError::MalformedMessage(err.to_string()))?;
        let open = ChannelMessage::new(
            MessageType::ChannelOpen,
            payload,
            &channel_id,
            client,
            None,
        )?;
        channel.messages.push(open.clone());
        Ok((channel, open))
    }

    /// Rebuilds a replica from a snapshot, an initial log, and the shards
    /// this endpoint holds locally.
    pub fn from_snapshot(
        snapshot: ChannelSnapshot,
        messages: Vec<ChannelMessage>,
        encoding: Option<EncodedDataset>,
    ) -> Self {
        Self {
            channel_id: snapshot.channel_id,
            client_public_key: snapshot.client_public_key,
            alderman_public_key: snapshot.alderman_public_key,
            blockchain_state: snapshot.blockchain_state,
            payment: snapshot.payment,
            interval: Duration::from_millis(snapshot.interval_ms),
            messages,
            encoding,
        }
    }

    /// The channel's parameters as a wire snapshot, optionally including
    /// the message log.
    pub fn snapshot(&self, with_messages: bool) -> ChannelSnapshot {
        ChannelSnapshot {
            channel_id: self.channel_id.clone(),
            client_public_key: self.client_public_key.clone(),
            alderman_public_key: self.alderman_public_key.clone(),
            blockchain_state: self.blockchain_state.clone(),
            payment: self.payment,
            interval_ms: self.interval.as_millis() as u64,
            messages: if with_messages {
                self.messages.clone()
            } else {
                Vec::new()
            },
        }
    }

    /// The channel identifier.
    pub fn channel_id(&self) -> &[u8] {
        &self.channel_id
    }

    /// The client's PKIX/DER public key.
    pub fn client_public_key(&self) -> &[u8] {
        &self.client_public_key
    }

    /// The alderman's PKIX/DER public key.
    pub fn alderman_public_key(&self) -> &[u8] {
        &self.alderman_public_key
    }

    /// The opaque ledger-state snapshot proofs are bound to.
    pub fn blockchain_state(&self) -> &[u8] {
        &self.blockchain_state
    }

    /// Payment per verified proof.
    pub fn payment(&self) -> u64 {
        self.payment
    }

    /// Required payment interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The append-only message log.
    pub fn messages(&self) -> &[ChannelMessage] {
        &self.messages
    }

    /// The most recent message, if any.
    pub fn last_message(&self) -> Option<&ChannelMessage> {
        self.messages.last()
    }

    /// The shards this endpoint holds for the channel.
    pub fn encoding(&self) -> Option<&EncodedDataset> {
        self.encoding.as_ref()
    }

    /// True once a CloseChannel message has been appended.
    pub fn is_closed(&self) -> bool {
        self.last_message()
            .map(|message| message.msg_type() == MessageType::CloseChannel)
            .unwrap_or(false)
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::ProtocolViolation {
                expected: "an open channel",
                found: MessageType::CloseChannel.to_string(),
            });
        }
        Ok(())
    }

    fn append_signed(
        &mut self,
        msg_type: MessageType,
        payload: Vec<u8>,
        keypair: &Keypair,
    ) -> Result<ChannelMessage, ChannelError> {
        self.ensure_open()?;
        let message = ChannelMessage::new(
            msg_type,
            payload,
            &self.channel_id,
            keypair,
            self.last_message(),
        )?;
        self.messages.push(message.clone());
        Ok(message)
    }

    /// Alderman: accepts a freshly opened channel.
    ///
    /// The emitted ChannelAccepted payload echoes the snapshot with the
    /// ChannelOpen message appended, so the client can confirm both sides
    /// agree on the parameters and the log head.
    pub fn accept(&mut self, alderman: &Keypair) -> Result<ChannelMessage, ChannelError> {
        let head = self.last_message().map(ChannelMessage::msg_type);
        if self.messages.len() != 1 || head != Some(MessageType::ChannelOpen) {
            return Err(ChannelError::ProtocolViolation {
                expected: "a lone ChannelOpen",
                found: head.map_or_else(|| "empty log".to_string(), |t| t.to_string()),
            });
        }
        let payload = serde_json::to_vec(&self.snapshot(true))
            .map_err(|err| ChannelError::MalformedMessage(err.to_string()))?;
        self.append_signed(MessageType::ChannelAccepted, payload, alderman)
    }

    /// Client: emits a PORRequest carrying a fresh random challenge.
    pub fn request_por(&mut self, client: &Keypair) -> Result<ChannelMessage, ChannelError> {
        let mut challenge = vec![0u8; CHALLENGE_SIZE];
        rand::thread_rng().fill_bytes(&mut challenge);
        self.append_signed(MessageType::PorRequest, challenge, client)
    }

    /// Alderman: answers the pending PORRequest with a proof ticket.
    ///
    /// The challenge bytes become the proof seed verbatim, and the proof
    /// runs over the shards this endpoint holds under the channel's
    /// ledger-state snapshot.
    pub fn respond_to_por(
        &mut self,
        alderman: &Keypair,
        k: usize,
    ) -> Result<ChannelMessage, ChannelError> {
        self.ensure_open()?;
        let last = self.last_message().ok_or(ChannelError::ProtocolViolation {
            expected: "a PORRequest",
            found: "empty log".to_string(),
        })?;
        if last.msg_type() != MessageType::PorRequest {
            return Err(ChannelError::ProtocolViolation {
                expected: "a PORRequest",
                found: last.msg_type().to_string(),
            });
        }
        let seed = last.payload().to_vec();
        let encoding = self.encoding.as_ref().ok_or(ChannelError::MissingEncoding)?;
        let ticket = por::produce_por(alderman, &self.blockchain_state, encoding, k, &seed)?;
        self.append_signed(MessageType::PorResponse, ticket, alderman)
    }

    /// Client: verifies the pending PORResponse against its own encoding.
    ///
    /// A valid ticket is answered with SendPayment (payload: little-endian
    /// amount); an invalid one with CloseChannel. The returned flag tells
    /// the caller which was emitted.
    pub fn verify_por_response(
        &mut self,
        client: &Keypair,
        k: usize,
    ) -> Result<(ChannelMessage, bool), ChannelError> {
        self.ensure_open()?;
        let last = self.last_message().ok_or(ChannelError::ProtocolViolation {
            expected: "a PORResponse",
            found: "empty log".to_string(),
        })?;
        if last.msg_type() != MessageType::PorResponse {
            return Err(ChannelError::ProtocolViolation {
                expected: "a PORResponse",
                found: last.msg_type().to_string(),
            });
        }
        let encoding = self.encoding.as_ref().ok_or(ChannelError::MissingEncoding)?;
        let valid = por::verify_por(encoding, &self.blockchain_state, last.payload(), k);
        if valid {
            let amount = self.payment.to_le_bytes().to_vec();
            let message = self.append_signed(MessageType::SendPayment, amount, client)?;
            Ok((message, true))
        } else {
            log::warn!("proof failed to verify; closing channel");
            let message = self.append_signed(MessageType::CloseChannel, Vec::new(), client)?;
            Ok((message, false))
        }
    }

    /// Client: announces the funding transaction backing this channel.
    pub fn create_funds(
        &mut self,
        client: &Keypair,
        funding_tx: &[u8],
    ) -> Result<ChannelMessage, ChannelError> {
        self.append_signed(MessageType::FundsCreated, funding_tx.to_vec(), client)
    }

    /// Alderman: approves the announced funding transaction, echoing its
    /// identifier.
    pub fn approve_funds(&mut self, alderman: &Keypair) -> Result<ChannelMessage, ChannelError> {
        self.ensure_open()?;
        let last = self.last_message().ok_or(ChannelError::ProtocolViolation {
            expected: "a FundsCreated",
            found: "empty log".to_string(),
        })?;
        if last.msg_type() != MessageType::FundsCreated {
            return Err(ChannelError::ProtocolViolation {
                expected: "a FundsCreated",
                found: last.msg_type().to_string(),
            });
        }
        let funding_tx = last.payload().to_vec();
        self.append_signed(MessageType::FundsApproved, funding_tx, alderman)
    }

    /// Terminates the channel. Either principal may call this.
    pub fn close(&mut self, keypair: &Keypair) -> Result<ChannelMessage, ChannelError> {
        self.append_signed(MessageType::CloseChannel, Vec::new(), keypair)
    }

    /// Transport side: appends a message produced by the peer.
    ///
    /// The message must name this channel, be signed by one of the two
    /// principals, and hash-link to the local log head.
    pub fn receive(&mut self, message: ChannelMessage) -> Result<(), ChannelError> {
        self.ensure_open()?;
        if message.channel_id() != self.channel_id {
            return Err(ChannelError::WrongChannel);
        }
        if message.sender_public_key() != self.client_public_key
            && message.sender_public_key() != self.alderman_public_key
        {
            return Err(ChannelError::UnknownSender);
        }
        match self.last_message() {
            Some(prev) => {
                if *message.prev_hash() != prev.digest() {
                    return Err(ChannelError::BrokenLink);
                }
            }
            None => {
                if message.msg_type() != MessageType::ChannelOpen
                    || message.prev_hash() != &[0u8; 32]
                {
                    return Err(ChannelError::BrokenLink);
                }
            }
        }
        if !message.verify_signature() {
            return Err(ChannelError::BadSignature);
        }
        self.messages.push(message);
        Ok(())
    }
}
