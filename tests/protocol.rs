//! End-to-end walkthroughs of the storage protocol: erasure coding a
//! file, handing a subset to an alderman over a payment channel, auditing
//! retrievability, paying, and closing on failure.

use std::sync::atomic::AtomicBool;
use std::time::{Duration, SystemTime};

use num_bigint::BigUint;
use shardkeep::{
    attempt_mine, create_erasure_coding, verify_mine, Alderman, ChannelError, EncodedDataset,
    Keypair, MemoryLedger, MessageType, PaymentChannel, Ticket, CHALLENGE_SIZE,
};

const DRACULA: &[u8] = b"Left Munich at 8:35 P. M., on 1st May, arriving at Vienna early next morning; should have arrived at 6:46, but train was an hour late. Buda-Pesth seems a wonderful place, from the glimpse which I got of it from the train and the little I could walk through the streets. I feared to go very far from the station, as we had arrived late and would start as near the correct time as possible. The impression I had was that we were leaving the West and entering the East; the most western of splendid bridges over the Danube, which is here of noble width and depth, took us among the traditions of Turkish rule.";

fn tampered_copy(dataset: &EncodedDataset) -> EncodedDataset {
    let mut shards: Vec<Vec<u8>> = dataset.shards().to_vec();
    for shard in &mut shards {
        shard[0] ^= 0xff;
    }
    EncodedDataset::from_parts(
        shards,
        dataset.ordering().to_vec(),
        dataset.data_shards(),
        dataset.parity_shards(),
        dataset.original_len(),
    )
    .unwrap()
}

/// E1: the 19-byte dataset splits into 16 aligned shards.
#[test]
fn small_dataset_geometry() {
    let encoding = create_erasure_coding(b"qwertyuiopasdfghjkl", 4, 4).unwrap();
    assert_eq!(encoding.len(), 16);
    assert_eq!(encoding.data_shards(), 10);
    assert_eq!(encoding.parity_shards(), 6);
    assert_eq!(encoding.hashes().len(), 16);
    assert_eq!(encoding.ordering().len(), 16);
    assert!(encoding.shards().iter().all(|shard| shard.len() == 2));
}

/// E2: an even-index subset keeps its global ordering and verified hashes.
#[test]
fn subset_selection_keeps_ordering() {
    let encoding = create_erasure_coding(b"qwertyuiopasdfghjkl", 4, 4).unwrap();
    let subset = encoding.select_segments(&[0, 2, 4, 6, 8]).unwrap();
    assert_eq!(subset.len(), 5);
    assert_eq!(subset.ordering(), &[0, 2, 4, 6, 8]);
    for (shard, hash) in subset.shards().iter().zip(subset.hashes()) {
        assert_eq!(&shardkeep::sha256(shard), hash);
    }
}

/// E3: a full audit round over the alderman's subset ends in payment, and
/// every message in both logs links and verifies (property 8).
#[test]
fn audit_round_ends_in_payment() {
    let client = Keypair::generate();
    let mut alderman = Alderman::new(Keypair::generate(), MemoryLedger::new());
    let alderman_keys = alderman.keypair().clone();
    let opened_at = SystemTime::now();

    let encoding = create_erasure_coding(DRACULA, 2, 7).unwrap();
    assert_eq!(encoding.data_shards(), 10);
    assert_eq!(encoding.parity_shards(), 3);
    assert_eq!(encoding.len(), 13);
    let held = encoding.select_segments(&[2, 4, 5, 6]).unwrap();

    let (mut client_channel, open) = PaymentChannel::open(
        &client,
        alderman_keys.public_key_der().unwrap(),
        20,
        Duration::from_secs(10),
        Some(held.clone()),
    )
    .unwrap();
    let (mut alder_channel, accepted) = alderman
        .accept_channel(open, Some(held.clone()), opened_at)
        .unwrap();
    client_channel.receive(accepted).unwrap();

    let created = client_channel.create_funds(&client, b"funding-tx").unwrap();
    alder_channel.receive(created).unwrap();
    let approved = alder_channel.approve_funds(&alderman_keys).unwrap();
    client_channel.receive(approved).unwrap();

    let request = client_channel.request_por(&client).unwrap();
    assert_eq!(request.payload().len(), CHALLENGE_SIZE);
    alder_channel.receive(request.clone()).unwrap();

    let response = alder_channel.respond_to_por(&alderman_keys, 2).unwrap();
    // The challenge bytes are the proof seed verbatim.
    let ticket = Ticket::from_bytes(response.payload()).unwrap();
    assert_eq!(ticket.seed, request.payload());
    assert_eq!(ticket.proof_files.len(), 2);
    client_channel.receive(response).unwrap();

    let (payment, valid) = client_channel.verify_por_response(&client, 2).unwrap();
    assert!(valid);
    assert_eq!(payment.msg_type(), MessageType::SendPayment);
    alder_channel.receive(payment).unwrap();
    alderman
        .record_payment(&alder_channel, opened_at + Duration::from_secs(1))
        .unwrap();

    assert_eq!(client_channel.messages().len(), alder_channel.messages().len());
    for (index, message) in client_channel.messages().iter().enumerate() {
        assert!(message.verify_signature(), "signature of message {index}");
        match index {
            0 => assert_eq!(message.prev_hash(), &[0u8; 32]),
            _ => assert_eq!(
                message.prev_hash(),
                &client_channel.messages()[index - 1].digest(),
                "linkage of message {index}"
            ),
        }
    }
}

/// E4: a tampered shard makes the client close the channel, and the closed
/// channel rejects any further append (property 9).
#[test]
fn tampered_shard_closes_the_channel() {
    let client = Keypair::generate();
    let mut alderman = Alderman::new(Keypair::generate(), MemoryLedger::new());
    let alderman_keys = alderman.keypair().clone();

    let encoding = create_erasure_coding(DRACULA, 2, 7).unwrap();
    let held = encoding.select_segments(&[2, 4, 5, 6]).unwrap();

    let (mut client_channel, open) = PaymentChannel::open(
        &client,
        alderman_keys.public_key_der().unwrap(),
        20,
        Duration::from_secs(10),
        Some(held.clone()),
    )
    .unwrap();
    // The alderman "stores" a corrupted copy of its shards.
    let (mut alder_channel, accepted) = alderman
        .accept_channel(open, Some(tampered_copy(&held)), SystemTime::now())
        .unwrap();
    client_channel.receive(accepted).unwrap();

    let request = client_channel.request_por(&client).unwrap();
    alder_channel.receive(request).unwrap();
    let response = alder_channel.respond_to_por(&alderman_keys, 2).unwrap();
    client_channel.receive(response).unwrap();

    let (close, valid) = client_channel.verify_por_response(&client, 2).unwrap();
    assert!(!valid);
    assert_eq!(close.msg_type(), MessageType::CloseChannel);
    assert!(client_channel.is_closed());
    assert!(matches!(
        client_channel.request_por(&client),
        Err(ChannelError::ProtocolViolation { .. })
    ));
}

/// E5: an easy difficulty target is met within a handful of seeds.
#[test]
fn mining_meets_an_easy_target() {
    let miner = Keypair::generate();
    let dataset =
        EncodedDataset::from_parts(vec![vec![0u8; 20]; 5], (0..5).collect(), 5, 0, 100).unwrap();
    let blockchain_val = [0u8; 6];
    let difficulty = BigUint::from(2u8).pow(250);
    let cancel = AtomicBool::new(false);

    let ticket = attempt_mine(&miner, &blockchain_val, &dataset, 5, &difficulty, &cancel)
        .unwrap()
        .expect("a 1-in-64 target should be hit quickly");
    assert!(verify_mine(&dataset, &blockchain_val, &ticket, 5, &difficulty));
}

/// E6: the payment clock closes a channel only once the interval elapses.
#[test]
fn payment_clock_respects_the_interval() {
    let client = Keypair::generate();
    let mut alderman = Alderman::new(Keypair::generate(), MemoryLedger::new());
    let opened_at = SystemTime::UNIX_EPOCH + Duration::from_secs(5_000);

    let (_, open) = PaymentChannel::open(
        &client,
        alderman.keypair().public_key_der().unwrap(),
        20,
        Duration::from_secs(10),
        None,
    )
    .unwrap();
    let (mut replica, _) = alderman.accept_channel(open, None, opened_at).unwrap();

    let prompt = opened_at + Duration::from_secs(10);
    assert!(alderman.check_payment(&mut replica, prompt).unwrap().is_none());

    let overdue = opened_at + Duration::from_secs(12);
    let close = alderman
        .check_payment(&mut replica, overdue)
        .unwrap()
        .expect("overdue channel should close");
    assert_eq!(close.msg_type(), MessageType::CloseChannel);
}

/// The full coded set and a sufficient subset both restore the excerpt.
#[test]
fn dracula_roundtrips_through_reconstruction() {
    let encoding = create_erasure_coding(DRACULA, 2, 7).unwrap();
    let full = shardkeep::reconstruct_from_segments(std::slice::from_ref(&encoding)).unwrap();
    assert_eq!(full, DRACULA);

    let subset = encoding
        .select_segments(&[0, 1, 2, 3, 4, 10, 11, 12, 6, 7])
        .unwrap();
    let partial = shardkeep::reconstruct_from_segments(&[subset]).unwrap();
    assert_eq!(partial, DRACULA);
}
