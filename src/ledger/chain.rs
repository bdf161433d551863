/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The append-only registry of accepted ledgers.
//!
//! The chain records every accepted ledger by sequence and hash. Until full validation,
//! one sequence may hold several competing ledgers (forks); full validation picks exactly
//! one per sequence, and conflicting full validations are a safety violation the chain
//! refuses to record.
//!
//! Appends serialize behind a writer lock. Readers resolve the latest sequence through an
//! atomic and then read the (immutable) ledger objects without further synchronization.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, RwLock,
    },
};

use crate::store::NodeStore;
use crate::types::basic::LedgerSeq;
use crate::types::hash::Hash256;

use super::ledger::Ledger;

pub struct LedgerChain<S: NodeStore> {
    inner: RwLock<ChainInner<S>>,
    latest_seq: AtomicU32,
}

struct ChainInner<S: NodeStore> {
    by_hash: HashMap<Hash256, Arc<Ledger<S>>>,
    by_seq: HashMap<LedgerSeq, Vec<Hash256>>,
    fully_validated: HashMap<LedgerSeq, Hash256>,
    highest_fully_validated: Option<LedgerSeq>,
}

impl<S: NodeStore> LedgerChain<S> {
    /// A chain rooted at `genesis`, which is implicitly fully validated.
    pub fn new(genesis: Ledger<S>) -> LedgerChain<S> {
        let seq = genesis.seq();
        let hash = genesis.hash();
        let mut by_hash = HashMap::new();
        by_hash.insert(hash, Arc::new(genesis));
        let mut by_seq = HashMap::new();
        by_seq.insert(seq, vec![hash]);
        let mut fully_validated = HashMap::new();
        fully_validated.insert(seq, hash);
        LedgerChain {
            inner: RwLock::new(ChainInner {
                by_hash,
                by_seq,
                fully_validated,
                highest_fully_validated: Some(seq),
            }),
            latest_seq: AtomicU32::new(seq.int()),
        }
    }

    /// Record an accepted ledger.
    ///
    /// Every non-genesis ledger must extend a ledger the chain has already recorded.
    /// Appending the same ledger twice is a no-op returning the recorded instance.
    pub fn append(&self, ledger: Ledger<S>) -> Result<Arc<Ledger<S>>, ChainError> {
        let mut inner = self.inner.write().unwrap();
        if let Some(existing) = inner.by_hash.get(&ledger.hash()) {
            return Ok(existing.clone());
        }
        if ledger.seq() != LedgerSeq::GENESIS && !inner.by_hash.contains_key(&ledger.parent_hash())
        {
            return Err(ChainError::UnknownParent {
                seq: ledger.seq(),
                parent: ledger.parent_hash(),
            });
        }
        let seq = ledger.seq();
        let hash = ledger.hash();
        let ledger = Arc::new(ledger);
        inner.by_hash.insert(hash, ledger.clone());
        inner.by_seq.entry(seq).or_default().push(hash);
        self.latest_seq.fetch_max(seq.int(), Ordering::Release);
        Ok(ledger)
    }

    pub fn get(&self, hash: &Hash256) -> Option<Arc<Ledger<S>>> {
        self.inner.read().unwrap().by_hash.get(hash).cloned()
    }

    /// Every recorded ledger at `seq`, in append order. More than one means an unresolved
    /// fork.
    pub fn at_seq(&self, seq: LedgerSeq) -> Vec<Arc<Ledger<S>>> {
        let inner = self.inner.read().unwrap();
        inner
            .by_seq
            .get(&seq)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|hash| inner.by_hash.get(hash).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The highest sequence any recorded ledger carries. Lock-free.
    pub fn latest_seq(&self) -> LedgerSeq {
        LedgerSeq::new(self.latest_seq.load(Ordering::Acquire))
    }

    /// A ledger at the highest recorded sequence. When that sequence is forked, the
    /// fully validated ledger wins if there is one, otherwise the first recorded.
    pub fn tip(&self) -> Arc<Ledger<S>> {
        let seq = self.latest_seq();
        let inner = self.inner.read().unwrap();
        let hash = inner
            .fully_validated
            .get(&seq)
            .or_else(|| inner.by_seq.get(&seq).and_then(|hashes| hashes.first()))
            .expect("latest_seq always refers to a recorded ledger");
        inner.by_hash[hash].clone()
    }

    /// Record that a quorum of trusted validators signed `hash` at its sequence.
    ///
    /// A second, different fully validated ledger at the same sequence means the network
    /// broke its safety assumption; the chain keeps the first and reports the conflict.
    pub fn mark_fully_validated(&self, hash: &Hash256) -> Result<(), ChainError> {
        let mut inner = self.inner.write().unwrap();
        let seq = match inner.by_hash.get(hash) {
            Some(ledger) => ledger.seq(),
            None => return Err(ChainError::NotRecorded(*hash)),
        };
        match inner.fully_validated.get(&seq) {
            Some(existing) if existing == hash => Ok(()),
            Some(existing) => Err(ChainError::ValidationConflict {
                seq,
                existing: *existing,
                conflicting: *hash,
            }),
            None => {
                inner.fully_validated.insert(seq, *hash);
                if inner.highest_fully_validated.map_or(true, |high| seq > high) {
                    inner.highest_fully_validated = Some(seq);
                }
                Ok(())
            }
        }
    }

    /// The fully validated ledger at `seq`, if one was marked.
    pub fn fully_validated_at(&self, seq: LedgerSeq) -> Option<Arc<Ledger<S>>> {
        let inner = self.inner.read().unwrap();
        let hash = inner.fully_validated.get(&seq)?;
        inner.by_hash.get(hash).cloned()
    }

    /// The fully validated ledger with the highest sequence.
    pub fn latest_fully_validated(&self) -> Option<Arc<Ledger<S>>> {
        let inner = self.inner.read().unwrap();
        let seq = inner.highest_fully_validated?;
        let hash = inner.fully_validated.get(&seq)?;
        inner.by_hash.get(hash).cloned()
    }
}

/// Ways the chain can refuse an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainError {
    /// The appended ledger's parent has not been recorded.
    UnknownParent { seq: LedgerSeq, parent: Hash256 },
    /// The hash does not belong to any recorded ledger.
    NotRecorded(Hash256),
    /// Two distinct ledgers at one sequence both reached full validation.
    ValidationConflict {
        seq: LedgerSeq,
        existing: Hash256,
        conflicting: Hash256,
    },
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::UnknownParent { seq, parent } => {
                write!(f, "ledger {} extends unrecorded parent {}", seq, parent)
            }
            ChainError::NotRecorded(hash) => write!(f, "ledger {} is not recorded", hash),
            ChainError::ValidationConflict {
                seq,
                existing,
                conflicting,
            } => write!(
                f,
                "conflicting full validations at {}: {} vs {}",
                seq, existing, conflicting
            ),
        }
    }
}
