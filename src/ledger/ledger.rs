/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The immutable ledger object.
//!
//! A [`Ledger`] is a pure data record: a header, the self-hash derived from it, and the
//! two tries the header's roots commit to. Once constructed it never changes; the mutable
//! phase of a ledger's life is the [`OpenView`](crate::ledger::open_view::OpenView) that
//! built it. Construction paths:
//!
//! 1. [`genesis`](Ledger::genesis): sequence 1, zero parent, state seeded with the initial
//!    accounts, empty transaction trie.
//! 2. Sealing an open view, which produces the child of an existing ledger.
//! 3. [`reconstruct`](Ledger::reconstruct) from a received header plus fetched tries, used
//!    when catching up.

use crate::store::NodeStore;
use crate::trie::{StateTrie, TrieError};
use crate::types::basic::{CloseResolution, Drops, LedgerFlags, LedgerSeq, NetTime};
use crate::types::crypto_primitives::AccountID;
use crate::types::hash::Hash256;

use super::entry::{account_key, skip_list_bucket_key, skip_list_key, StateEntry};
use super::header::LedgerHeader;

/// Number of hashes the rolling skip-list window holds.
const SKIP_LIST_WINDOW: usize = 256;

/// One sealed, immutable ledger.
pub struct Ledger<S: NodeStore> {
    header: LedgerHeader,
    hash: Hash256,
    state: StateTrie<S>,
    txs: StateTrie<S>,
}

impl<S: NodeStore> Ledger<S> {
    /// The first ledger of a chain.
    ///
    /// Seeds the state trie with exactly the given accounts; the transaction trie is
    /// empty, the parent hash is the zero sentinel, the close time is zero at the default
    /// resolution. Rebuilding from the same seed yields a byte-identical hash.
    pub fn genesis(
        store: S,
        accounts: &[(AccountID, Drops)],
        close_resolution: CloseResolution,
    ) -> Result<Ledger<S>, TrieError> {
        let mut state = StateTrie::new(store.clone());
        let mut coins_total = Drops::ZERO;
        for (account, balance) in accounts {
            let entry = StateEntry::new_account(*account, *balance);
            state.insert(account_key(account), entry.encode())?;
            coins_total += *balance;
        }
        let mut txs = StateTrie::new(store);
        let header = LedgerHeader {
            seq: LedgerSeq::GENESIS,
            coins_total,
            parent_hash: Hash256::ZERO,
            tx_trie_root: txs.hash(),
            state_trie_root: state.hash(),
            parent_close_time: NetTime::ZERO,
            close_time: NetTime::ZERO,
            close_resolution,
            flags: LedgerFlags::none(),
        };
        Ok(Ledger {
            hash: header.hash(),
            header,
            state,
            txs,
        })
    }

    /// Seal a ledger from already flushed tries. The header's roots must be the tries'
    /// current root hashes; `commit` on an open view is the only caller.
    pub(crate) fn seal(header: LedgerHeader, state: StateTrie<S>, txs: StateTrie<S>) -> Ledger<S> {
        debug_assert_eq!(state.cached_root(), Some(header.state_trie_root));
        debug_assert_eq!(txs.cached_root(), Some(header.tx_trie_root));
        Ledger {
            hash: header.hash(),
            header,
            state,
            txs,
        }
    }

    /// Rebuild a ledger from a received header, fetching both tries from the store.
    ///
    /// Only the root nodes must be resident up front; deeper nodes resolve on demand.
    /// The caller should [`validate`](Self::validate) afterwards if the header came from
    /// an untrusted peer.
    pub fn reconstruct(store: S, header: LedgerHeader) -> Result<Ledger<S>, TrieError> {
        let state = StateTrie::from_root(store.clone(), header.state_trie_root)?;
        let txs = StateTrie::from_root(store, header.tx_trie_root)?;
        Ok(Ledger {
            hash: header.hash(),
            header,
            state,
            txs,
        })
    }

    /// Check the structural invariants: the self-hash is the digest of the header, the
    /// header's roots match the tries, the sequence is positive, and a non-genesis ledger
    /// names a parent.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.hash != self.header.hash() {
            return Err(LedgerError::HashMismatch);
        }
        if self.state.cached_root() != Some(self.header.state_trie_root) {
            return Err(LedgerError::StateRootMismatch);
        }
        if self.txs.cached_root() != Some(self.header.tx_trie_root) {
            return Err(LedgerError::TxRootMismatch);
        }
        if self.header.seq.int() == 0 {
            return Err(LedgerError::ZeroSequence);
        }
        if self.header.seq != LedgerSeq::GENESIS && self.header.parent_hash.is_zero() {
            return Err(LedgerError::MissingParent);
        }
        Ok(())
    }

    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    pub fn header(&self) -> &LedgerHeader {
        &self.header
    }

    pub fn seq(&self) -> LedgerSeq {
        self.header.seq
    }

    pub fn parent_hash(&self) -> Hash256 {
        self.header.parent_hash
    }

    pub fn close_time(&self) -> NetTime {
        self.header.close_time
    }

    pub fn close_resolution(&self) -> CloseResolution {
        self.header.close_resolution
    }

    pub fn coins_total(&self) -> Drops {
        self.header.coins_total
    }

    pub fn state(&self) -> &StateTrie<S> {
        &self.state
    }

    pub fn txs(&self) -> &StateTrie<S> {
        &self.txs
    }

    /// Read and decode a state entry.
    pub fn read_entry(&self, key: &Hash256) -> Result<Option<StateEntry>, TrieError> {
        Ok(self.state.get(key)?.and_then(|bytes| StateEntry::decode(&bytes)))
    }

    /// Whether a transaction with this id was applied in this ledger.
    pub fn contains_tx(&self, tx_id: &Hash256) -> Result<bool, TrieError> {
        self.txs.contains(tx_id)
    }

    /// The hash of the ledger at `seq`, answered from this ledger and its embedded skip
    /// list.
    ///
    /// Resolution order: this ledger itself, the direct parent, the rolling window of the
    /// last 256 parents, then the every-256th buckets (which only cover sequences that
    /// are multiples of 256). `None` for futures and for past sequences outside coverage.
    pub fn hash_of_seq(&self, seq: LedgerSeq) -> Result<Option<Hash256>, TrieError> {
        if seq.int() == 0 || seq > self.seq() {
            return Ok(None);
        }
        if seq == self.seq() {
            return Ok(Some(self.hash));
        }
        if seq.next() == self.seq() {
            return Ok(Some(self.header.parent_hash));
        }

        let distance = self.seq() - seq;
        if distance as usize <= SKIP_LIST_WINDOW {
            if let Some(StateEntry::SkipList { hashes, .. }) =
                self.read_entry(&skip_list_key())?
            {
                let from_back = distance as usize;
                if hashes.len() >= from_back {
                    return Ok(Some(hashes[hashes.len() - from_back]));
                }
            }
        }
        if seq.int() % 256 != 0 {
            return Ok(None);
        }
        if let Some(StateEntry::SkipList { last_seq, hashes }) =
            self.read_entry(&skip_list_bucket_key(seq))?
        {
            // The bucket's hashes run oldest to newest, one per 256 sequences, the
            // newest being `last_seq`.
            let back = ((last_seq.int() - seq.int()) >> 8) as usize;
            if hashes.len() > back {
                return Ok(Some(hashes[hashes.len() - back - 1]));
            }
        }
        Ok(None)
    }
}

/// Update the skip-list entries in a child ledger's state, recording the parent's hash.
///
/// Called while building the child of the ledger identified by `parent_seq`/`parent_hash`:
/// the rolling window appends the parent hash (dropping the oldest past 256), and when the
/// parent's sequence is a multiple of 256 its hash also lands in the matching bucket.
pub(crate) fn update_skip_list<S: NodeStore>(
    state: &mut StateTrie<S>,
    parent_seq: LedgerSeq,
    parent_hash: Hash256,
) -> Result<(), TrieError> {
    if parent_seq.int() % 256 == 0 {
        let key = skip_list_bucket_key(parent_seq);
        let mut hashes = match state.get(&key)?.and_then(|b| StateEntry::decode(&b)) {
            Some(StateEntry::SkipList { hashes, .. }) => hashes,
            _ => Vec::new(),
        };
        hashes.push(parent_hash);
        let entry = StateEntry::SkipList {
            last_seq: parent_seq,
            hashes,
        };
        state.insert(key, entry.encode())?;
    }

    let key = skip_list_key();
    let mut hashes = match state.get(&key)?.and_then(|b| StateEntry::decode(&b)) {
        Some(StateEntry::SkipList { hashes, .. }) => hashes,
        _ => Vec::new(),
    };
    if hashes.len() == SKIP_LIST_WINDOW {
        hashes.remove(0);
    }
    hashes.push(parent_hash);
    let entry = StateEntry::SkipList {
        last_seq: parent_seq,
        hashes,
    };
    state.insert(key, entry.encode())?;
    Ok(())
}

/// Ways a ledger can fail [`validation`](Ledger::validate).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerError {
    /// The stored hash is not the digest of the header.
    HashMismatch,
    /// The state trie's root differs from the header's commitment.
    StateRootMismatch,
    /// The transaction trie's root differs from the header's commitment.
    TxRootMismatch,
    /// Ledger sequences start at 1.
    ZeroSequence,
    /// A non-genesis ledger must name its parent.
    MissingParent,
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::HashMismatch => write!(f, "self-hash does not match header"),
            LedgerError::StateRootMismatch => write!(f, "state trie root does not match header"),
            LedgerError::TxRootMismatch => {
                write!(f, "transaction trie root does not match header")
            }
            LedgerError::ZeroSequence => write!(f, "ledger sequence must be positive"),
            LedgerError::MissingParent => write!(f, "non-genesis ledger has a zero parent hash"),
        }
    }
}
