/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The mutable overlay through which one child ledger is built.
//!
//! An [`OpenView`] layers a write set over a parent ledger's state trie and accumulates
//! the transactions tentatively applied on top of it. It is short-lived: created when a
//! round opens, it either [`commit`](OpenView::commit)s into the next immutable ledger or
//! is discarded by dropping it. The parent ledger is never touched either way.
//!
//! Reads go through the write set first, so the view exposes the same picture a sealed
//! child would. The apply engine is the only writer; it runs synchronously and never
//! suspends mid-transaction, so a missing trie node inside a read is an error surfaced to
//! the caller, not a wait.

use std::collections::HashMap;

use crate::apply::result::ApplyCode;
use crate::store::NodeStore;
use crate::trie::{StateTrie, TrieError};
use crate::types::basic::{CloseResolution, Drops, LedgerFlags, LedgerSeq, NetTime};
use crate::types::crypto_primitives::AccountID;
use crate::types::hash::Hash256;
use crate::types::transaction::{Transaction, TxId};

use super::entry::{account_key, StateEntry};
use super::header::LedgerHeader;
use super::ledger::{update_skip_list, Ledger};

use borsh::{BorshDeserialize, BorshSerialize};

/// Per-key modification relative to the parent state.
#[derive(Clone, Debug, PartialEq, Eq)]
enum WriteAction {
    Inserted(Vec<u8>),
    Replaced(Vec<u8>),
    Erased,
}

/// One transaction applied to the view, with its terminal code and metadata.
#[derive(Clone, Debug)]
pub struct AppliedTx {
    pub tx: Transaction,
    pub code: ApplyCode,
    pub meta: Vec<u8>,
}

/// The value stored in a ledger's transaction trie: the transaction's canonical bytes
/// paired with its result.
#[derive(BorshSerialize, BorshDeserialize)]
pub struct TxReceipt {
    pub tx_bytes: Vec<u8>,
    pub code: ApplyCode,
    pub meta: Vec<u8>,
}

/// Everything the close-time computation decided for the child being sealed.
#[derive(Clone, Copy, Debug)]
pub struct CloseData {
    pub close_time: NetTime,
    pub close_resolution: CloseResolution,
    pub flags: LedgerFlags,
}

/// A mutable overlay over a parent ledger. See the module documentation.
pub struct OpenView<S: NodeStore> {
    parent_hash: Hash256,
    parent_seq: LedgerSeq,
    parent_close_time: NetTime,
    parent_state: StateTrie<S>,
    coins_total: Drops,
    writes: HashMap<Hash256, WriteAction>,
    applied: Vec<AppliedTx>,
}

impl<S: NodeStore> OpenView<S> {
    pub fn new(parent: &Ledger<S>) -> OpenView<S> {
        OpenView {
            parent_hash: parent.hash(),
            parent_seq: parent.seq(),
            parent_close_time: parent.close_time(),
            parent_state: parent.state().snapshot(),
            coins_total: parent.coins_total(),
            writes: HashMap::new(),
            applied: Vec::new(),
        }
    }

    pub fn parent_hash(&self) -> Hash256 {
        self.parent_hash
    }

    pub fn parent_seq(&self) -> LedgerSeq {
        self.parent_seq
    }

    /// The sequence the sealed child will carry.
    pub fn child_seq(&self) -> LedgerSeq {
        self.parent_seq.next()
    }

    pub fn coins_total(&self) -> Drops {
        self.coins_total
    }

    /// Read a raw value, overlay first.
    pub fn read(&self, key: &Hash256) -> Result<Option<Vec<u8>>, TrieError> {
        match self.writes.get(key) {
            Some(WriteAction::Inserted(bytes)) | Some(WriteAction::Replaced(bytes)) => {
                Ok(Some(bytes.clone()))
            }
            Some(WriteAction::Erased) => Ok(None),
            None => self.parent_state.get(key),
        }
    }

    pub fn exists(&self, key: &Hash256) -> Result<bool, TrieError> {
        Ok(self.read(key)?.is_some())
    }

    /// Read and decode a state entry.
    pub fn read_entry(&self, key: &Hash256) -> Result<Option<StateEntry>, TrieError> {
        Ok(self.read(key)?.and_then(|bytes| StateEntry::decode(&bytes)))
    }

    /// The account root of `account`, if the account exists in this view.
    pub fn account(&self, account: &AccountID) -> Result<Option<StateEntry>, TrieError> {
        self.read_entry(&account_key(account))
    }

    /// Record a brand new entry. The key must not be present.
    pub fn insert(&mut self, key: Hash256, bytes: Vec<u8>) -> Result<(), ViewError> {
        if self.exists(&key)? {
            return Err(ViewError::AlreadyExists(key));
        }
        self.writes.insert(key, WriteAction::Inserted(bytes));
        Ok(())
    }

    /// Overwrite an entry that must be present.
    pub fn replace(&mut self, key: Hash256, bytes: Vec<u8>) -> Result<(), ViewError> {
        if !self.exists(&key)? {
            return Err(ViewError::KeyNotFound(key));
        }
        // An insert layered under this replace stays an insert from the parent's point
        // of view.
        let action = match self.writes.get(&key) {
            Some(WriteAction::Inserted(_)) => WriteAction::Inserted(bytes),
            _ => WriteAction::Replaced(bytes),
        };
        self.writes.insert(key, action);
        Ok(())
    }

    /// Remove an entry that must be present.
    pub fn erase(&mut self, key: Hash256) -> Result<(), ViewError> {
        if !self.exists(&key)? {
            return Err(ViewError::KeyNotFound(key));
        }
        // Erasing an entry this very view inserted cancels out entirely.
        match self.writes.get(&key) {
            Some(WriteAction::Inserted(_)) => {
                self.writes.remove(&key);
            }
            _ => {
                self.writes.insert(key, WriteAction::Erased);
            }
        }
        Ok(())
    }

    /// Burn `fee` drops out of the total supply. Called once per applied transaction.
    pub fn burn(&mut self, fee: Drops) {
        self.coins_total = self.coins_total.saturating_sub(fee);
    }

    /// Read an entry as the parent ledger saw it, bypassing this view's writes.
    pub fn parent_entry(&self, key: &Hash256) -> Result<Option<StateEntry>, TrieError> {
        Ok(self
            .parent_state
            .get(key)?
            .and_then(|bytes| StateEntry::decode(&bytes)))
    }

    /// Capture the current write set. The apply pipeline checkpoints before each
    /// transaction so a failed effect can be rolled back to its fee-only remainder, and
    /// so the invariant checker can diff exactly what one transaction changed.
    pub(crate) fn checkpoint(&self) -> ViewCheckpoint {
        ViewCheckpoint {
            writes: self.writes.clone(),
            coins_total: self.coins_total,
        }
    }

    pub(crate) fn rollback(&mut self, checkpoint: ViewCheckpoint) {
        self.writes = checkpoint.writes;
        self.coins_total = checkpoint.coins_total;
    }

    /// Keys whose written state differs from what `checkpoint` captured.
    pub(crate) fn changed_since(&self, checkpoint: &ViewCheckpoint) -> Vec<Hash256> {
        let mut changed: Vec<Hash256> = self
            .writes
            .iter()
            .filter(|(key, action)| checkpoint.writes.get(*key) != Some(*action))
            .map(|(key, _)| *key)
            .collect();
        for key in checkpoint.writes.keys() {
            if !self.writes.contains_key(key) {
                changed.push(*key);
            }
        }
        changed
    }

    /// Read an entry as it stood when `checkpoint` was captured.
    pub(crate) fn read_entry_at(
        &self,
        checkpoint: &ViewCheckpoint,
        key: &Hash256,
    ) -> Result<Option<StateEntry>, TrieError> {
        let bytes = match checkpoint.writes.get(key) {
            Some(WriteAction::Inserted(bytes)) | Some(WriteAction::Replaced(bytes)) => {
                Some(bytes.clone())
            }
            Some(WriteAction::Erased) => None,
            None => self.parent_state.get(key)?,
        };
        Ok(bytes.and_then(|bytes| StateEntry::decode(&bytes)))
    }

    /// How many drops `checkpoint` had left in circulation.
    pub(crate) fn coins_at(&self, checkpoint: &ViewCheckpoint) -> Drops {
        checkpoint.coins_total
    }

    /// Number of transactions applied so far. This is the open count the fee escalation
    /// formula scales on.
    pub fn tx_count(&self) -> usize {
        self.applied.len()
    }

    /// Whether a transaction with this id has already been applied to this view.
    pub fn contains_tx(&self, tx_id: &TxId) -> bool {
        self.applied.iter().any(|applied| applied.tx.id() == *tx_id)
    }

    /// Append a transaction outcome. Only codes that may appear in a committed ledger
    /// belong here; the apply engine enforces that.
    pub fn push_tx(&mut self, applied: AppliedTx) {
        self.applied.push(applied);
    }

    pub fn applied(&self) -> &[AppliedTx] {
        &self.applied
    }

    /// Seal this view into the child ledger.
    ///
    /// Consumes the view. The child's state is the parent's trie snapshot plus the skip
    /// list update plus this view's write set; its transaction trie holds one receipt per
    /// applied transaction. Both tries are flushed to the node store in the process.
    pub fn commit(self, close: CloseData) -> Result<Ledger<S>, TrieError> {
        let mut state = self.parent_state.snapshot();
        update_skip_list(&mut state, self.parent_seq, self.parent_hash)?;
        for (key, action) in &self.writes {
            match action {
                WriteAction::Inserted(bytes) | WriteAction::Replaced(bytes) => {
                    state.insert(*key, bytes.clone())?;
                }
                WriteAction::Erased => state.erase(key)?,
            }
        }

        let mut txs = StateTrie::new(self.parent_state.store().clone());
        for applied in &self.applied {
            let receipt = TxReceipt {
                tx_bytes: applied.tx.canonical_bytes(),
                code: applied.code,
                meta: applied.meta.clone(),
            };
            txs.insert(applied.tx.id(), receipt.try_to_vec().unwrap())?;
        }

        let header = LedgerHeader {
            seq: self.parent_seq.next(),
            coins_total: self.coins_total,
            parent_hash: self.parent_hash,
            tx_trie_root: txs.hash(),
            state_trie_root: state.hash(),
            parent_close_time: self.parent_close_time,
            close_time: close.close_time,
            close_resolution: close.close_resolution,
            flags: close.flags,
        };
        Ok(Ledger::seal(header, state, txs))
    }
}

/// A saved write-set state an [`OpenView`] can roll back to.
#[derive(Clone)]
pub(crate) struct ViewCheckpoint {
    writes: HashMap<Hash256, WriteAction>,
    coins_total: Drops,
}

/// Ways a write through an [`OpenView`] can fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewError {
    AlreadyExists(Hash256),
    KeyNotFound(Hash256),
    Trie(TrieError),
}

impl From<TrieError> for ViewError {
    fn from(err: TrieError) -> Self {
        ViewError::Trie(err)
    }
}

impl std::fmt::Display for ViewError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewError::AlreadyExists(key) => write!(f, "entry {} already exists", key),
            ViewError::KeyNotFound(key) => write!(f, "entry {} does not exist", key),
            ViewError::Trie(err) => write!(f, "{}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use crate::types::basic::SequenceNumber;

    fn genesis() -> Ledger<MemStore> {
        Ledger::genesis(
            MemStore::new(),
            &[(AccountID::new([1u8; 20]), Drops::new(100_000))],
            CloseResolution::new(30),
        )
        .unwrap()
    }

    fn close() -> CloseData {
        CloseData {
            close_time: NetTime::new(60),
            close_resolution: CloseResolution::new(30),
            flags: LedgerFlags::none(),
        }
    }

    #[test]
    fn overlay_reads_through_to_parent() {
        let parent = genesis();
        let account = AccountID::new([1u8; 20]);
        let view = OpenView::new(&parent);
        assert!(view.account(&account).unwrap().is_some());
        assert!(view.read(&Hash256::new([9u8; 32])).unwrap().is_none());
    }

    #[test]
    fn writes_shadow_parent_until_commit() {
        let parent = genesis();
        let account = AccountID::new([1u8; 20]);
        let key = account_key(&account);
        let mut view = OpenView::new(&parent);

        let updated = StateEntry::AccountRoot {
            account,
            balance: Drops::new(90_000),
            sequence: SequenceNumber::new(2),
            owner_count: 0,
        };
        view.replace(key, updated.encode()).unwrap();
        assert_eq!(view.read_entry(&key).unwrap(), Some(updated));

        // The parent still sees the original balance.
        let original = parent.read_entry(&key).unwrap().unwrap();
        assert!(matches!(
            original,
            StateEntry::AccountRoot { balance, .. } if balance == Drops::new(100_000)
        ));
    }

    #[test]
    fn insert_requires_absence_and_erase_requires_presence() {
        let parent = genesis();
        let key = account_key(&AccountID::new([1u8; 20]));
        let mut view = OpenView::new(&parent);

        assert_eq!(
            view.insert(key, vec![1]),
            Err(ViewError::AlreadyExists(key))
        );
        let fresh = Hash256::new([7u8; 32]);
        assert_eq!(view.erase(fresh), Err(ViewError::KeyNotFound(fresh)));

        view.insert(fresh, vec![1]).unwrap();
        view.erase(fresh).unwrap();
        assert!(!view.exists(&fresh).unwrap());
    }

    #[test]
    fn commit_seals_a_child_of_the_parent() {
        let parent = genesis();
        let view = OpenView::new(&parent);
        let child = view.commit(close()).unwrap();

        assert_eq!(child.seq(), parent.seq().next());
        assert_eq!(child.parent_hash(), parent.hash());
        assert_eq!(child.header().parent_close_time, parent.close_time());
        child.validate().unwrap();

        // The child can answer its parent's hash from the skip list path.
        assert_eq!(
            child.hash_of_seq(parent.seq()).unwrap(),
            Some(parent.hash())
        );
    }
}
