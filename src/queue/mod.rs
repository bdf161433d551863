/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The fee-escalating admission queue.
//!
//! Transactions that cannot pay the current escalated fee are not discarded; they wait
//! here, ranked by fee level, and drain into the open view whenever the escalated fee
//! comes back within reach. The queue is a two-index structure:
//!
//! - the **fee index**, descending by fee level with ties broken by insertion order;
//! - the **account index**, per signer and ordered by declared sequence, enforcing at
//!   most one entry per `(account, sequence)`.
//!
//! Replacing a queued transaction requires beating its fee by a configured margin.
//! Capacity is a multiple of the expected per-ledger transaction count; when the queue is
//! full, the lowest-fee tail is evicted. All operations serialize behind one internal
//! lock: `admit` and `drain` are mutually exclusive.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
};

use log;

use crate::amendments::AmendmentSwitch;
use crate::apply::result::{ApplyCode, CodeBand};
use crate::apply::{apply, preclaim, preflight, ApplyContext, Preclaim};
use crate::config::QueueSetup;
use crate::fees::FeeMetrics;
use crate::ledger::entry::StateEntry;
use crate::ledger::open_view::OpenView;
use crate::store::NodeStore;
use crate::trie::TrieError;
use crate::types::basic::{Drops, FeeLevel, LedgerSeq, SequenceNumber};
use crate::types::crypto_primitives::AccountID;
use crate::types::transaction::{Transaction, TxPayload};

/// Position in the fee index: level descending, then insertion order.
type FeeRank = (Reverse<u64>, u64);

/// One queued transaction.
#[derive(Clone)]
struct Candidate {
    tx: Transaction,
    level: FeeLevel,
    last_valid: Option<LedgerSeq>,
}

/// What [`AdmissionQueue::admit`] did with a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// Applied directly to the open view with this code.
    Applied(ApplyCode),
    /// Held for a later ledger.
    Queued,
    /// Not applied and not held.
    Rejected(ApplyCode),
}

pub struct AdmissionQueue {
    setup: QueueSetup,
    metrics: Arc<FeeMetrics>,
    inner: Mutex<QueueInner>,
}

struct QueueInner {
    by_fee: BTreeMap<FeeRank, Candidate>,
    by_account: HashMap<AccountID, BTreeMap<SequenceNumber, FeeRank>>,
    next_tie: u64,
    max_size: usize,
}

impl AdmissionQueue {
    pub fn new(setup: QueueSetup, metrics: Arc<FeeMetrics>) -> AdmissionQueue {
        let max_size = setup.ledgers_in_queue * metrics.txns_expected();
        AdmissionQueue {
            setup,
            metrics,
            inner: Mutex::new(QueueInner {
                by_fee: BTreeMap::new(),
                by_account: HashMap::new(),
                next_tie: 0,
                max_size,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_fee.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.inner.lock().unwrap().max_size
    }

    /// The fee level of the queued transaction for `(account, sequence)`, if one is
    /// held.
    pub fn queued_level(&self, account: &AccountID, sequence: SequenceNumber) -> Option<FeeLevel> {
        let inner = self.inner.lock().unwrap();
        let rank = inner.by_account.get(account)?.get(&sequence)?;
        inner.by_fee.get(rank).map(|candidate| candidate.level)
    }

    /// Add a new transaction to the open ledger, hold it in the queue, or reject it.
    ///
    /// The decision sequence follows the module documentation: replacement margin first,
    /// then a direct apply if the fee level meets the current requirement, then the
    /// can-be-held checks, then capacity.
    pub fn admit<S: NodeStore, A: AmendmentSwitch>(
        &self,
        view: &mut OpenView<S>,
        tx: Transaction,
        ctx: &ApplyContext<A>,
    ) -> Result<AdmitOutcome, TrieError> {
        let level = match preflight(&tx, ctx, view.child_seq()) {
            Ok(level) => level,
            Err(code) => return Ok(AdmitOutcome::Rejected(code)),
        };

        let mut inner = self.inner.lock().unwrap();

        // At most one queued entry per (account, sequence); a newcomer must beat the
        // incumbent's fee by the configured margin.
        let replaced = inner
            .by_account
            .get(&tx.account)
            .and_then(|entries| entries.get(&tx.sequence))
            .copied();
        if let Some(rank) = replaced {
            let incumbent = inner.by_fee[&rank].level;
            let floor = incumbent.scale_percent(100 + self.setup.retry_sequence_percent);
            if level < floor {
                return Ok(AdmitOutcome::Rejected(ApplyCode::FeeBelowReplacement));
            }
        }

        let required = self.metrics.required_level(view.tx_count());
        if level >= required {
            let outcome = apply(view, &tx, ctx)?;
            match outcome.code.band() {
                CodeBand::Success | CodeBand::ClaimedFee => {
                    if let Some(rank) = replaced {
                        remove_rank(&mut inner, &rank);
                    }
                    log::debug!("AdmitApply, {}, {}, {:?}", tx.id(), level, outcome.code);
                    return Ok(AdmitOutcome::Applied(outcome.code));
                }
                CodeBand::Retry => {} // fall through to the queue
                _ => return Ok(AdmitOutcome::Rejected(outcome.code)),
            }
        } else {
            // Not applying now; it must at least be plausible later.
            match preclaim(&tx, view, ctx)? {
                Preclaim::Good | Preclaim::Retry(_) => {}
                Preclaim::Bad(code) => return Ok(AdmitOutcome::Rejected(code)),
            }
        }

        // The signer must be able to fund everything it already has queued plus this
        // transaction without dipping into its reserve.
        if let Some(code) = self.overcommits(&inner, view, &tx, ctx)? {
            return Ok(AdmitOutcome::Rejected(code));
        }

        // Capacity. A replacement frees its own slot, so it skips the check.
        if replaced.is_none() && inner.by_fee.len() >= inner.max_size {
            let tail_level = inner
                .by_fee
                .iter()
                .next_back()
                .map(|(_, candidate)| candidate.level)
                .unwrap_or(FeeLevel::BASE);
            if level <= tail_level {
                return Ok(AdmitOutcome::Rejected(ApplyCode::QueueFull));
            }
            evict_tail(&mut inner);
        }

        if let Some(rank) = replaced {
            remove_rank(&mut inner, &rank);
        }
        let rank: FeeRank = (Reverse(level.int()), inner.next_tie);
        inner.next_tie += 1;
        inner
            .by_account
            .entry(tx.account)
            .or_default()
            .insert(tx.sequence, rank);
        log::debug!("QueueTx, {}, {}, {}", tx.id(), tx.sequence, level);
        inner.by_fee.insert(
            rank,
            Candidate {
                last_valid: tx.last_valid,
                level,
                tx,
            },
        );
        Ok(AdmitOutcome::Queued)
    }

    /// Fill a new open view with transactions from the queue.
    ///
    /// Iterates the fee index descending. Every successful apply raises the required
    /// level, so the drain naturally stops when escalation outruns the remaining
    /// entries. Follow-on transactions of an account that already applied one this pass
    /// must beat the required level by the multi-transaction margin, which keeps one
    /// account from starving the rest. Returns how many transactions were applied.
    pub fn drain<S: NodeStore, A: AmendmentSwitch>(
        &self,
        view: &mut OpenView<S>,
        ctx: &ApplyContext<A>,
    ) -> Result<usize, TrieError> {
        let mut inner = self.inner.lock().unwrap();
        let mut applied_count = 0;
        let mut parked: HashSet<AccountID> = HashSet::new();
        let mut applied_accounts: HashSet<AccountID> = HashSet::new();

        loop {
            let required = self.metrics.required_level(view.tx_count());
            let Some((rank, candidate)) = inner
                .by_fee
                .iter()
                .find(|(_, candidate)| !parked.contains(&candidate.tx.account))
                .map(|(rank, candidate)| (*rank, candidate.clone()))
            else {
                break;
            };
            if candidate.level < required {
                break;
            }
            let account = candidate.tx.account;
            if applied_accounts.contains(&account) {
                let with_margin = required.scale_percent(100 + self.setup.multi_txn_percent);
                if candidate.level < with_margin {
                    parked.insert(account);
                    continue;
                }
            }
            // A lower sequence still queued means this one cannot possibly apply yet.
            let blocked = inner
                .by_account
                .get(&account)
                .and_then(|entries| entries.keys().next())
                .map_or(false, |lowest| *lowest < candidate.tx.sequence);
            if blocked {
                parked.insert(account);
                continue;
            }

            let outcome = apply(view, &candidate.tx, ctx)?;
            match outcome.code.band() {
                CodeBand::Success | CodeBand::ClaimedFee => {
                    log::debug!(
                        "DrainApply, {}, {}, {:?}",
                        candidate.tx.id(),
                        candidate.level,
                        outcome.code
                    );
                    remove_rank(&mut inner, &rank);
                    applied_accounts.insert(account);
                    applied_count += 1;
                }
                CodeBand::Retry => {
                    parked.insert(account);
                }
                _ => {
                    log::debug!(
                        "DropTx, {}, {}, {:?}",
                        candidate.tx.id(),
                        candidate.level,
                        outcome.code
                    );
                    remove_rank(&mut inner, &rank);
                }
            }
        }
        Ok(applied_count)
    }

    /// A new ledger was accepted: expire what can no longer apply, recompute the
    /// capacity from the updated expected transaction count, and trim the lowest-fee
    /// tail if the cap shrank.
    pub fn on_ledger_closed(&self, closed_seq: LedgerSeq) {
        let mut inner = self.inner.lock().unwrap();

        let expired: Vec<FeeRank> = inner
            .by_fee
            .iter()
            .filter(|(_, candidate)| {
                candidate
                    .last_valid
                    .map_or(false, |last_valid| last_valid <= closed_seq)
            })
            .map(|(rank, _)| *rank)
            .collect();
        for rank in &expired {
            if let Some(candidate) = inner.by_fee.get(rank) {
                log::debug!("ExpireTx, {}, {}", candidate.tx.id(), candidate.tx.sequence);
            }
            remove_rank(&mut inner, rank);
        }

        inner.max_size = self.setup.ledgers_in_queue * self.metrics.txns_expected();
        while inner.by_fee.len() > inner.max_size {
            evict_tail(&mut inner);
        }
    }

    /// Whether queuing `tx` would commit more of the signer's balance than it can spare.
    fn overcommits<S: NodeStore, A: AmendmentSwitch>(
        &self,
        inner: &QueueInner,
        view: &OpenView<S>,
        tx: &Transaction,
        ctx: &ApplyContext<A>,
    ) -> Result<Option<ApplyCode>, TrieError> {
        let Some(StateEntry::AccountRoot {
            balance,
            owner_count,
            ..
        }) = view.account(&tx.account)?
        else {
            return Ok(Some(ApplyCode::AccountMissing));
        };
        let spendable = balance.saturating_sub(ctx.reserve(owner_count));
        let mut committed = potential_spend(tx);
        if let Some(entries) = inner.by_account.get(&tx.account) {
            for (sequence, rank) in entries {
                // The entry being replaced releases its commitment.
                if *sequence == tx.sequence {
                    continue;
                }
                if let Some(candidate) = inner.by_fee.get(rank) {
                    committed = committed.saturating_add(potential_spend(&candidate.tx));
                }
            }
        }
        Ok((committed > spendable).then_some(ApplyCode::Overcommitted))
    }
}

/// The most the signer can lose to this transaction: its fee plus whatever it sends.
fn potential_spend(tx: &Transaction) -> Drops {
    let sent = match &tx.payload {
        TxPayload::Payment { amount, .. } => *amount,
        TxPayload::AccountSet => Drops::ZERO,
    };
    tx.fee.saturating_add(sent)
}

fn remove_rank(inner: &mut QueueInner, rank: &FeeRank) {
    if let Some(candidate) = inner.by_fee.remove(rank) {
        let account = candidate.tx.account;
        if let Some(entries) = inner.by_account.get_mut(&account) {
            entries.retain(|_, entry_rank| *entry_rank != *rank);
            if entries.is_empty() {
                inner.by_account.remove(&account);
            }
        }
    }
}

/// Drop the lowest-fee entry.
fn evict_tail(inner: &mut QueueInner) {
    if let Some(rank) = inner.by_fee.keys().next_back().copied() {
        if let Some(candidate) = inner.by_fee.get(&rank) {
            log::debug!("EvictTx, {}, {}", candidate.tx.id(), candidate.level);
        }
        remove_rank(inner, &rank);
    }
}
