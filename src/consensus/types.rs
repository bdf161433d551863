/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types exchanged and tracked within one consensus round.

use std::collections::{BTreeMap, HashMap};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::basic::{LedgerSeq, NetTime, ProposalSeq};
use crate::types::crypto_primitives::{
    verify_signature, Keypair, SignatureBytes, VerifyingKey,
};
use crate::types::hash::{Hash256, HashPrefix, Hasher};
use crate::types::transaction::{Transaction, TxId};

/// A candidate transaction set: the payload a round agrees on.
///
/// Ordered by transaction id, so two sets with the same members hash identically no
/// matter how they were assembled.
#[derive(Clone, Debug, Default)]
pub struct TxSet {
    txs: BTreeMap<TxId, Transaction>,
}

impl TxSet {
    pub fn new() -> TxSet {
        TxSet::default()
    }

    pub fn from_txs(txs: impl IntoIterator<Item = Transaction>) -> TxSet {
        TxSet {
            txs: txs.into_iter().map(|tx| (tx.id(), tx)).collect(),
        }
    }

    pub fn insert(&mut self, tx: Transaction) {
        self.txs.insert(tx.id(), tx);
    }

    pub fn remove(&mut self, id: &TxId) -> Option<Transaction> {
        self.txs.remove(id)
    }

    pub fn contains(&self, id: &TxId) -> bool {
        self.txs.contains_key(id)
    }

    pub fn get(&self, id: &TxId) -> Option<&Transaction> {
        self.txs.get(id)
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.txs.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &TxId> {
        self.txs.keys()
    }

    /// The set's identity: the digest of its members' ids in order.
    pub fn hash(&self) -> Hash256 {
        let mut hasher = Hasher::new(HashPrefix::TxSet);
        for id in self.txs.keys() {
            hasher.update(id.bytes());
        }
        hasher.finalize()
    }
}

/// A validator's signed position within one round.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Proposal {
    /// The sequence of the ledger being built.
    pub round: LedgerSeq,
    /// Increments every time the proposer changes position; [`ProposalSeq::BOW_OUT`]
    /// is a final withdrawal from the round.
    pub seq: ProposalSeq,
    /// The prior ledger this position builds on.
    pub prev_ledger: Hash256,
    /// The proposed transaction set's hash.
    pub tx_set: Hash256,
    /// The proposed close time, already rounded to the round's resolution.
    pub close_time: NetTime,
    /// Raw bytes of the proposer's verifying key.
    pub node: [u8; 32],
    pub signature: SignatureBytes,
}

impl Proposal {
    pub fn new_signed(
        keypair: &Keypair,
        round: LedgerSeq,
        seq: ProposalSeq,
        prev_ledger: Hash256,
        tx_set: Hash256,
        close_time: NetTime,
    ) -> Proposal {
        let mut proposal = Proposal {
            round,
            seq,
            prev_ledger,
            tx_set,
            close_time,
            node: keypair.public().to_bytes(),
            signature: SignatureBytes::new([0u8; 64]),
        };
        proposal.signature = keypair.sign(&proposal.signing_image());
        proposal
    }

    fn signing_image(&self) -> Vec<u8> {
        let mut image = HashPrefix::Proposal.bytes().to_vec();
        image.extend_from_slice(&self.round.try_to_vec().unwrap());
        image.extend_from_slice(&self.seq.try_to_vec().unwrap());
        image.extend_from_slice(&self.prev_ledger.bytes());
        image.extend_from_slice(&self.tx_set.bytes());
        image.extend_from_slice(&self.close_time.try_to_vec().unwrap());
        image.extend_from_slice(&self.node);
        image
    }

    pub fn node_key(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.node).ok()
    }

    pub fn is_correctly_signed(&self) -> bool {
        match self.node_key() {
            Some(key) => verify_signature(&key, &self.signing_image(), &self.signature),
            None => false,
        }
    }

    pub fn is_bow_out(&self) -> bool {
        self.seq.is_bow_out()
    }
}

/// Vote bookkeeping for one transaction that not every peer agrees on.
#[derive(Clone, Debug)]
pub(crate) struct DisputedTx {
    pub(crate) tx: Transaction,
    pub(crate) our_vote: bool,
    votes: HashMap<[u8; 32], bool>,
}

impl DisputedTx {
    pub(crate) fn new(tx: Transaction, our_vote: bool) -> DisputedTx {
        DisputedTx {
            tx,
            our_vote,
            votes: HashMap::new(),
        }
    }

    pub(crate) fn set_peer_vote(&mut self, peer: [u8; 32], vote: bool) {
        self.votes.insert(peer, vote);
    }

    pub(crate) fn remove_peer(&mut self, peer: &[u8; 32]) {
        self.votes.remove(peer);
    }

    /// Recompute our vote under the current `threshold` percentage, counting ourselves
    /// along with every voting peer. Inclusion needs strictly more than `threshold`
    /// percent of yes votes. Returns whether our vote flipped.
    pub(crate) fn update_our_vote(&mut self, threshold: u32) -> bool {
        let mut yes = if self.our_vote { 1u32 } else { 0 };
        let mut total = 1u32;
        for vote in self.votes.values() {
            total += 1;
            if *vote {
                yes += 1;
            }
        }
        let new_vote = yes * 100 > total * threshold;
        let changed = new_vote != self.our_vote;
        self.our_vote = new_vote;
        changed
    }
}

/// The phases of one consensus round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundPhase {
    /// Collecting transactions; the ledger has not closed yet.
    Open,
    /// The ledger closed; exchanging proposals and converging.
    Establish,
    /// Terminal: a transaction set and close time were accepted.
    Accepted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::basic::{Drops, SequenceNumber};
    use crate::types::crypto_primitives::AccountID;
    use crate::types::transaction::TxPayload;
    use ed25519_dalek::SigningKey;

    fn keypair(seed: u8) -> Keypair {
        Keypair::new(SigningKey::from_bytes(&[seed; 32]))
    }

    fn tx(seed: u8) -> Transaction {
        Transaction::new_signed(
            &keypair(seed),
            SequenceNumber::new(1),
            Drops::new(10),
            None,
            TxPayload::Payment {
                destination: AccountID::new([0xdd; 20]),
                amount: Drops::new(100),
            },
        )
    }

    #[test]
    fn tx_set_hash_ignores_assembly_order() {
        let (a, b, c) = (tx(1), tx(2), tx(3));
        let forward = TxSet::from_txs([a.clone(), b.clone(), c.clone()]);
        let backward = TxSet::from_txs([c, b, a]);
        assert_eq!(forward.hash(), backward.hash());
        assert_eq!(forward.len(), 3);
    }

    #[test]
    fn tx_set_hash_commits_to_membership() {
        let mut set = TxSet::from_txs([tx(1), tx(2)]);
        let before = set.hash();
        set.insert(tx(3));
        assert_ne!(set.hash(), before);
    }

    #[test]
    fn proposal_signature_covers_the_position() {
        let keypair = keypair(7);
        let proposal = Proposal::new_signed(
            &keypair,
            LedgerSeq::new(9),
            ProposalSeq::INITIAL,
            Hash256::new([1u8; 32]),
            Hash256::new([2u8; 32]),
            NetTime::new(600),
        );
        assert!(proposal.is_correctly_signed());

        let mut tampered = proposal.clone();
        tampered.tx_set = Hash256::new([3u8; 32]);
        assert!(!tampered.is_correctly_signed());
    }

    #[test]
    fn disputed_votes_use_strict_majorities() {
        // Ten voters including ourselves, evenly split: 50% is not strictly greater
        // than the 50% threshold, so the transaction falls out of our working set.
        let mut dispute = DisputedTx::new(tx(1), true);
        for peer in 0u8..4 {
            dispute.set_peer_vote([peer; 32], true);
        }
        for peer in 4u8..9 {
            dispute.set_peer_vote([peer; 32], false);
        }
        assert!(dispute.update_our_vote(50));
        assert!(!dispute.our_vote);

        // Seven of ten yes at the 65% threshold: 70 > 65 brings it back in.
        for peer in 0u8..7 {
            dispute.set_peer_vote([peer; 32], true);
        }
        for peer in 7u8..9 {
            dispute.set_peer_vote([peer; 32], false);
        }
        assert!(dispute.update_our_vote(65));
        assert!(dispute.our_vote);
    }
}
