//! Shared harness for the integration suite: deterministic keypairs, a channel-backed
//! mock network, and logger setup.
//!
//! The mock network simulates communication with channels and never leaves artifacts;
//! the stores are the in-memory implementation from the library itself.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    io,
    sync::{mpsc, Arc, Mutex, Once},
    thread,
};

use ed25519_dalek::{SigningKey, VerifyingKey};
use log::LevelFilter;

use concord_rs::networking::{Message, PeerNetwork};
use concord_rs::types::basic::{Drops, LedgerSeq, SequenceNumber};
use concord_rs::types::crypto_primitives::Keypair;
use concord_rs::types::transaction::{Transaction, TxPayload};

static LOGGER_INIT: Once = Once::new();

/// Set up a logger that logs all log messages at `level` and above.
pub fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .apply()
            .unwrap();
    })
}

/// A deterministic keypair from a one-byte seed.
pub fn keypair(seed: u8) -> Keypair {
    Keypair::new(SigningKey::from_bytes(&[seed; 32]))
}

pub fn payment(
    sender: &Keypair,
    sequence: u32,
    fee: u64,
    destination: &Keypair,
    amount: u64,
) -> Transaction {
    Transaction::new_signed(
        sender,
        SequenceNumber::new(sequence),
        Drops::new(fee),
        None,
        TxPayload::Payment {
            destination: destination.account(),
            amount: Drops::new(amount),
        },
    )
}

pub fn payment_with_expiry(
    sender: &Keypair,
    sequence: u32,
    fee: u64,
    destination: &Keypair,
    amount: u64,
    last_valid: u32,
) -> Transaction {
    Transaction::new_signed(
        sender,
        SequenceNumber::new(sequence),
        Drops::new(fee),
        Some(LedgerSeq::new(last_valid)),
        TxPayload::Payment {
            destination: destination.account(),
            amount: Drops::new(amount),
        },
    )
}

type Inboxes = Arc<Mutex<HashMap<[u8; 32], mpsc::Sender<(VerifyingKey, Message)>>>>;

/// One peer's handle onto the mock network.
#[derive(Clone)]
pub struct NetworkStub {
    my_key: VerifyingKey,
    inboxes: Inboxes,
    receiver: Arc<Mutex<mpsc::Receiver<(VerifyingKey, Message)>>>,
}

impl PeerNetwork for NetworkStub {
    fn broadcast(&mut self, message: Message) {
        let inboxes = self.inboxes.lock().unwrap();
        for (peer, sender) in inboxes.iter() {
            if *peer != self.my_key.to_bytes() {
                let _ = sender.send((self.my_key, message.clone()));
            }
        }
    }

    fn send(&mut self, peer: VerifyingKey, message: Message) {
        let inboxes = self.inboxes.lock().unwrap();
        if let Some(sender) = inboxes.get(&peer.to_bytes()) {
            let _ = sender.send((self.my_key, message));
        }
    }

    fn recv(&mut self) -> Option<(VerifyingKey, Message)> {
        self.receiver.lock().unwrap().try_recv().ok()
    }
}

/// Wire up a fully connected mock network between the given peers.
pub fn mock_network(keys: impl IntoIterator<Item = VerifyingKey>) -> Vec<NetworkStub> {
    let inboxes: Inboxes = Arc::new(Mutex::new(HashMap::new()));
    let mut stubs = Vec::new();
    for key in keys {
        let (sender, receiver) = mpsc::channel();
        inboxes.lock().unwrap().insert(key.to_bytes(), sender);
        stubs.push(NetworkStub {
            my_key: key,
            inboxes: inboxes.clone(),
            receiver: Arc::new(Mutex::new(receiver)),
        });
    }
    stubs
}
