#![deny(missing_docs)]

//! # shardkeep
//!
//! **shardkeep** is the core of a decentralized file-storage protocol in
//! which storage providers ("aldermen") hold erasure-coded shards of
//! client files and periodically prove, with compact cryptographic
//! tickets, that they still hold them. The same proof doubles as a
//! scratch-off mining puzzle: a miner who can produce a ticket whose hash
//! beats a difficulty target earns the right to extend the shared ledger.
//!
//! The crate is transport-agnostic: every protocol artifact (proof
//! tickets, channel messages, failure proofs) is produced and consumed
//! as canonical JSON bytes, ready to be moved by whatever networking
//! layer sits above.
//!
//! ## Subsystems
//!
//! * **Erasure-coded datasets** ([`erasure`]): Reed–Solomon coding over
//!   GF(2^8) with per-shard SHA-256 digests and global ordering, so an
//!   alderman can hold, and prove it holds, an arbitrary subset of a
//!   file's shards.
//! * **Proof of retrievability** ([`por`]): a sequential, signature-bound
//!   hash chain over pseudorandomly selected shards. Used both for
//!   client-initiated audits and, with random seeds against a difficulty
//!   target, for leader-election mining.
//! * **Payment channels** ([`channel`]): an off-ledger, signed,
//!   hash-linked message log between one client and one alderman,
//!   carrying open/accept, funding, audit request/response, payment and
//!   close messages.
//! * **Alderman service** ([`alderman`]): channel acceptance, payment
//!   clocks, peer audits with signed failure proofs, and demerit
//!   bookkeeping that feeds the quorum hook.
//! * **Shard store** ([`store`]): one-file-per-shard persistence with a
//!   verified manifest sidecar.
//!
//! ## Example
//!
//! ```rust
//! use shardkeep::{create_erasure_coding, produce_por, verify_por, Keypair};
//!
//! let keys = Keypair::generate();
//! let encoding = create_erasure_coding(b"a file worth keeping", 4, 4).unwrap();
//! let context = [0u8; 6];
//!
//! // Prove five chain steps over the shards, then check the ticket.
//! let ticket = produce_por(&keys, &context, &encoding, 5, b"challenge").unwrap();
//! assert!(verify_por(&encoding, &context, &ticket, 5));
//! ```

pub mod alderman;
pub mod channel;
pub mod erasure;
pub mod keys;
pub mod por;
pub mod store;
pub mod ticket;
pub mod wire;

pub use alderman::{
    quorum_reached, Alderman, FailureProof, LedgerSink, MemoryLedger, DEFAULT_DEMERIT_THRESHOLD,
};
pub use channel::{
    ChannelError, ChannelMessage, ChannelSnapshot, MessageType, PaymentChannel,
    BLOCKCHAIN_STATE_SIZE, CHALLENGE_SIZE, CHANNEL_ID_SIZE,
};
pub use erasure::{create_erasure_coding, reconstruct_from_segments, EncodedDataset, ErasureError};
pub use keys::{sha256, verify_digest, verify_digest_der, KeyError, Keypair};
pub use por::{attempt_mine, produce_por, verify_mine, verify_por, PorError, MINING_SEED_SIZE};
pub use store::{ShardStore, StoreError};
pub use ticket::{FileInfo, Ticket, TicketCodecError};
