/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](PeerNetwork) for pluggable peer-to-peer networking, as well as the
//! internal types and functions the node uses to interact with the network.
//!
//! Networking is modular: each peer is reachable by its
//! [VerifyingKey](ed25519_dalek::VerifyingKey), and providers interact with the node's
//! threads through implementations of the [`PeerNetwork`] trait. The core treats the
//! provider as a message bus with no ordering guarantee across message kinds; the poller
//! thread splits the incoming stream into per-kind channels.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::VerifyingKey;

use crate::consensus::types::Proposal;
use crate::consensus::validation::Validation;
use crate::types::basic::LedgerSeq;
use crate::types::hash::Hash256;
use crate::types::transaction::Transaction;

/// Everything that travels between peers.
#[derive(Clone, Debug, BorshDeserialize, BorshSerialize)]
pub enum Message {
    Proposal(Proposal),
    Validation(Validation),
    TxSubmission(Transaction),
    /// Request the body of a candidate transaction set a proposal referenced.
    GetTxSet(Hash256),
    TxSetFound(Vec<Transaction>),
    /// Request the body of a trie node by its content address.
    GetNode(Hash256),
    NodeFound(Hash256, Vec<u8>),
    /// Request a ledger header by hash or sequence.
    GetLedger(LedgerRequest),
    LedgerFound(Vec<u8>),
}

#[derive(Clone, Debug, BorshDeserialize, BorshSerialize)]
pub enum LedgerRequest {
    ByHash(Hash256),
    BySeq(LedgerSeq),
}

impl From<Proposal> for Message {
    fn from(proposal: Proposal) -> Message {
        Message::Proposal(proposal)
    }
}

impl From<Validation> for Message {
    fn from(validation: Validation) -> Message {
        Message::Validation(validation)
    }
}

impl From<Transaction> for Message {
    fn from(tx: Transaction) -> Message {
        Message::TxSubmission(tx)
    }
}

pub trait PeerNetwork: Clone + Send + 'static {
    /// Send a message to all peers without blocking.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: VerifyingKey, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is
    /// available now.
    fn recv(&mut self) -> Option<(VerifyingKey, Message)>;
}

/// What the poller sorts incoming messages into.
pub(crate) struct Inbound {
    pub(crate) consensus: Receiver<(VerifyingKey, Message)>,
    pub(crate) submissions: Receiver<(VerifyingKey, Transaction)>,
    pub(crate) fetch: Receiver<(VerifyingKey, Message)>,
}

/// Spawn the poller thread, which polls the [`PeerNetwork`] for messages and distributes
/// them into receivers for:
/// 1. consensus messages (proposals and validations),
/// 2. transaction submissions, and
/// 3. node and ledger fetch traffic.
pub(crate) fn start_polling<N: PeerNetwork>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (JoinHandle<()>, Inbound) {
    let (to_consensus, consensus) = mpsc::channel();
    let (to_submissions, submissions) = mpsc::channel();
    let (to_fetch, fetch) = mpsc::channel();

    let poller = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::Proposal(_)
                | Message::Validation(_)
                | Message::GetTxSet(_)
                | Message::TxSetFound(_) => {
                    let _ = to_consensus.send((origin, msg));
                }
                Message::TxSubmission(tx) => {
                    let _ = to_submissions.send((origin, tx));
                }
                Message::GetNode(_)
                | Message::NodeFound(_, _)
                | Message::GetLedger(_)
                | Message::LedgerFound(_) => {
                    let _ = to_fetch.send((origin, msg));
                }
            }
        } else {
            thread::yield_now()
        }
    });
    (
        poller,
        Inbound {
            consensus,
            submissions,
            fetch,
        },
    )
}

/// Handle for sending and broadcasting messages to the [`PeerNetwork`].
#[derive(Clone)]
pub(crate) struct SenderHandle<N: PeerNetwork> {
    network: N,
}

impl<N: PeerNetwork> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send<M: Into<Message>>(&mut self, peer: VerifyingKey, msg: M) {
        self.network.send(peer, msg.into())
    }

    pub(crate) fn broadcast<M: Into<Message>>(&mut self, msg: M) {
        self.network.broadcast(msg.into())
    }
}
