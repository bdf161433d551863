/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The single-instance round driver.
//!
//! One [`RoundConsensus`] lives from the adoption of a prior ledger to either acceptance
//! of a transaction set and close time, or abandonment in favor of a fresher prior
//! ledger. The caller interacts with it through three methods:
//!
//! 1. [`on_proposal`](RoundConsensus::on_proposal) and
//!    [`on_tx_set`](RoundConsensus::on_tx_set) whenever the network delivers round
//!    messages;
//! 2. [`tick`](RoundConsensus::tick), called as often as is practical (the protocol
//!    granularity is one second); every outward effect, from re-proposals to acceptance,
//!    surfaces as a [`RoundEvent`] returned by `tick`;
//! 3. [`close_ledger`](RoundConsensus::close_ledger) when `tick` reports
//!    [`RoundEvent::ReadyToClose`], handing over the local candidate set.
//!
//! Proposal and tx-set receptions are serialized per round by the caller; the driver
//! itself holds no locks.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use log;

use crate::clock::Clock;
use crate::types::basic::{CloseResolution, LedgerSeq, NetTime, ProposalSeq};
use crate::types::crypto_primitives::Keypair;
use crate::types::hash::Hash256;
use crate::types::transaction::TxId;
use crate::types::validator_set::TrustedValidators;

use super::timing::{
    effective_close_time, round_close_time, threshold_percent, AV_CT_CONSENSUS_PCT,
    LEDGER_FORCE_CONVERGE, LEDGER_IDLE_INTERVAL, LEDGER_MIN_CLOSE, LEDGER_MIN_CONSENSUS,
    MINIMUM_CONSENSUS_PCT, PROPOSE_FRESHNESS, PROPOSE_INTERVAL,
};
use super::types::{DisputedTx, Proposal, RoundPhase, TxSet};

/// What the prior ledger hands the new round.
#[derive(Clone, Copy, Debug)]
pub struct RoundInputs {
    pub prev_hash: Hash256,
    pub prev_seq: LedgerSeq,
    pub prev_close_time: NetTime,
    /// The close-time resolution in force for this round, already adapted.
    pub resolution: CloseResolution,
    /// How long the previous round took; drives the threshold schedule.
    pub prev_round_duration: Duration,
}

/// An outward effect of the round machine, returned by [`RoundConsensus::tick`].
#[derive(Clone, Debug)]
pub enum RoundEvent {
    /// The open phase is over. Assemble the candidate set and call
    /// [`RoundConsensus::close_ledger`].
    ReadyToClose,
    /// Broadcast this signed proposal.
    Propose(Proposal),
    /// The round converged; build and seal the ledger.
    Accept(RoundResult),
    /// A majority of fresh peers is building on a different prior ledger; restart there.
    WrongPriorLedger(Hash256),
    /// No convergence within the hard limit. Stop proposing until a fresher fully
    /// validated ledger arrives.
    Desync,
}

/// The agreement a finished round produced.
#[derive(Clone, Debug)]
pub struct RoundResult {
    pub tx_set: TxSet,
    /// The close time the child carries, already effective (rounded, after the parent).
    pub close_time: NetTime,
    /// False if the round gave up on close-time agreement; the child carries the
    /// no-consensus-time flag and a deterministic close time instead.
    pub close_agreed: bool,
    pub resolution: CloseResolution,
    /// How many peers (and us) were proposing at the end.
    pub proposers: usize,
    pub duration: Duration,
}

/// Why an incoming round message was not taken.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundError {
    UntrustedPeer,
    InvalidSignature,
    /// The proposal names a different round than the one in progress.
    WrongRound {
        got: LedgerSeq,
        current: LedgerSeq,
    },
}

struct PeerState {
    proposal: Proposal,
    received: Instant,
    bowed_out: bool,
}

/// See the module documentation.
pub struct RoundConsensus<C: Clock> {
    clock: C,
    keypair: Keypair,
    trusted: TrustedValidators,
    proposing: bool,

    phase: RoundPhase,
    inputs: RoundInputs,
    round: LedgerSeq,
    round_start: Instant,
    establish_start: Option<Instant>,

    position: TxSet,
    position_hash: Hash256,
    our_seq: ProposalSeq,
    our_close_time: NetTime,
    close_time_agreed: bool,
    unchanged_ticks: u32,
    last_proposed: Option<Instant>,
    ready_emitted: bool,
    desynced: bool,
    pending_transactions: bool,

    peers: HashMap<[u8; 32], PeerState>,
    tx_sets: HashMap<Hash256, TxSet>,
    disputes: HashMap<TxId, DisputedTx>,
}

impl<C: Clock> RoundConsensus<C> {
    /// Start a round on the given prior ledger. The round number is the child's
    /// sequence.
    pub fn new(
        clock: C,
        keypair: Keypair,
        trusted: TrustedValidators,
        proposing: bool,
        inputs: RoundInputs,
    ) -> RoundConsensus<C> {
        let round_start = clock.instant();
        let position = TxSet::new();
        let position_hash = position.hash();
        // The empty set's body is knowable without a fetch.
        let mut tx_sets = HashMap::new();
        tx_sets.insert(position_hash, position.clone());
        RoundConsensus {
            clock,
            keypair,
            trusted,
            proposing,
            phase: RoundPhase::Open,
            round: inputs.prev_seq.next(),
            inputs,
            round_start,
            establish_start: None,
            position,
            position_hash,
            our_seq: ProposalSeq::INITIAL,
            our_close_time: NetTime::ZERO,
            close_time_agreed: false,
            unchanged_ticks: 0,
            last_proposed: None,
            ready_emitted: false,
            desynced: false,
            pending_transactions: false,
            peers: HashMap::new(),
            tx_sets,
            disputes: HashMap::new(),
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn round(&self) -> LedgerSeq {
        self.round
    }

    pub fn prev_ledger(&self) -> Hash256 {
        self.inputs.prev_hash
    }

    pub fn position(&self) -> &TxSet {
        &self.position
    }

    /// The body of a candidate set seen this round, for answering peers' fetches.
    pub fn tx_set_body(&self, hash: &Hash256) -> Option<TxSet> {
        self.tx_sets.get(hash).cloned()
    }

    pub fn has_tx_set(&self, hash: &Hash256) -> bool {
        self.tx_sets.contains_key(hash)
    }

    /// Tell the round that local submissions are waiting, so the open phase does not
    /// sit out the full idle interval.
    pub fn note_transactions(&mut self) {
        self.pending_transactions = true;
    }

    /// Record a peer's proposal. Returns whether it was fresh (highest sequence seen
    /// from that peer this round).
    pub fn on_proposal(&mut self, proposal: Proposal) -> Result<bool, RoundError> {
        let Some(key) = proposal.node_key() else {
            return Err(RoundError::InvalidSignature);
        };
        if !self.trusted.contains(&key) {
            return Err(RoundError::UntrustedPeer);
        }
        if key == self.keypair.public() {
            return Ok(false);
        }
        if !proposal.is_correctly_signed() {
            return Err(RoundError::InvalidSignature);
        }
        if proposal.round != self.round {
            return Err(RoundError::WrongRound {
                got: proposal.round,
                current: self.round,
            });
        }

        let node = proposal.node;
        if let Some(existing) = self.peers.get(&node) {
            if !proposal.seq.is_bow_out() && existing.proposal.seq >= proposal.seq {
                return Ok(false);
            }
        }

        let bowed_out = proposal.is_bow_out();
        if bowed_out {
            for dispute in self.disputes.values_mut() {
                dispute.remove_peer(&node);
            }
        }
        let on_our_ledger = proposal.prev_ledger == self.inputs.prev_hash;
        let set_hash = proposal.tx_set;
        self.peers.insert(
            node,
            PeerState {
                proposal,
                received: self.clock.instant(),
                bowed_out,
            },
        );
        if !bowed_out && on_our_ledger {
            if let Some(set) = self.tx_sets.get(&set_hash).cloned() {
                self.apply_peer_votes(node, &set);
            }
        }
        Ok(true)
    }

    /// Record a resolved transaction set (ours or fetched after a peer referenced it).
    pub fn on_tx_set(&mut self, set: TxSet) {
        let hash = set.hash();
        if self.tx_sets.contains_key(&hash) {
            return;
        }
        self.tx_sets.insert(hash, set.clone());
        let voters: Vec<[u8; 32]> = self
            .peers
            .iter()
            .filter(|(_, peer)| {
                !peer.bowed_out
                    && peer.proposal.tx_set == hash
                    && peer.proposal.prev_ledger == self.inputs.prev_hash
            })
            .map(|(node, _)| *node)
            .collect();
        for node in voters {
            self.apply_peer_votes(node, &set);
        }
    }

    /// End the open phase with the local candidate set. Returns our initial proposal if
    /// we are a proposing validator.
    ///
    /// May only be called once, after [`RoundEvent::ReadyToClose`].
    pub fn close_ledger(&mut self, candidates: TxSet) -> Option<Proposal> {
        if self.phase != RoundPhase::Open {
            return None;
        }
        self.phase = RoundPhase::Establish;
        self.establish_start = Some(self.clock.instant());
        self.position = candidates;
        self.position_hash = self.position.hash();
        self.our_close_time = round_close_time(self.clock.network_time(), self.inputs.resolution);
        self.on_tx_set(self.position.clone());

        // Set bodies can arrive while the ledger is still open, and the disputes they
        // seeded were measured against the placeholder empty position. Now that the
        // real candidate set is fixed, realign those votes; a transaction we include
        // must not start the round voted against by our own stale bookkeeping.
        for dispute in self.disputes.values_mut() {
            dispute.our_vote = self.position.contains(&dispute.tx.id());
        }

        // Compare against every set peers have shown us; disagreements become disputes.
        let known: Vec<TxSet> = self.tx_sets.values().cloned().collect();
        for set in known {
            self.create_disputes(&set);
        }
        let votes: Vec<([u8; 32], Hash256)> = self
            .peers
            .iter()
            .filter(|(_, peer)| {
                !peer.bowed_out && peer.proposal.prev_ledger == self.inputs.prev_hash
            })
            .map(|(node, peer)| (*node, peer.proposal.tx_set))
            .collect();
        for (node, set_hash) in votes {
            if let Some(set) = self.tx_sets.get(&set_hash).cloned() {
                self.apply_peer_votes(node, &set);
            }
        }

        log::info!(
            "CloseLedger, {}, {}, {}",
            self.round,
            self.position_hash,
            self.position.len()
        );
        self.proposing.then(|| self.sign_position())
    }

    /// Advance the round machine. Call at the protocol granularity.
    pub fn tick(&mut self) -> Vec<RoundEvent> {
        if self.desynced || self.phase == RoundPhase::Accepted {
            return Vec::new();
        }
        match self.phase {
            RoundPhase::Open => self.tick_open(),
            RoundPhase::Establish => self.tick_establish(),
            RoundPhase::Accepted => Vec::new(),
        }
    }

    fn tick_open(&mut self) -> Vec<RoundEvent> {
        if self.ready_emitted {
            return Vec::new();
        }
        let elapsed = self.clock.instant() - self.round_start;
        let participation = !self.peers.is_empty() || self.pending_transactions;
        let ready = (elapsed >= LEDGER_MIN_CLOSE && participation)
            || elapsed >= LEDGER_IDLE_INTERVAL;
        if ready {
            self.ready_emitted = true;
            vec![RoundEvent::ReadyToClose]
        } else {
            Vec::new()
        }
    }

    fn tick_establish(&mut self) -> Vec<RoundEvent> {
        let now = self.clock.instant();
        let established = now
            - self
                .establish_start
                .expect("establish phase always has a start instant");
        let mut events = Vec::new();

        self.expire_stale_proposals(now);

        if let Some(majority) = self.wrong_prior_ledger() {
            log::warn!("WrongPriorLedger, {}, {}", self.round, majority);
            events.push(RoundEvent::WrongPriorLedger(majority));
            return events;
        }

        if established > LEDGER_FORCE_CONVERGE {
            log::warn!("Desync, {}", self.round);
            self.desynced = true;
            events.push(RoundEvent::Desync);
            return events;
        }

        // Re-vote every dispute under the current threshold.
        let threshold = threshold_percent(established, self.inputs.prev_round_duration);
        let mut changed = false;
        let flips: Vec<(TxId, bool)> = self
            .disputes
            .values_mut()
            .filter_map(|dispute| {
                dispute
                    .update_our_vote(threshold)
                    .then(|| (dispute.tx.id(), dispute.our_vote))
            })
            .collect();
        for (id, vote) in flips {
            changed = true;
            if vote {
                if let Some(dispute) = self.disputes.get(&id) {
                    self.position.insert(dispute.tx.clone());
                }
            } else {
                self.position.remove(&id);
            }
        }
        if changed {
            self.position_hash = self.position.hash();
            self.on_tx_set(self.position.clone());
        }

        // Close-time voting over bins at the current resolution.
        if let Some(winner) = self.close_time_majority() {
            self.close_time_agreed = true;
            if winner != self.our_close_time {
                self.our_close_time = winner;
                changed = true;
            }
        } else {
            self.close_time_agreed = false;
        }

        if changed {
            self.unchanged_ticks = 0;
        } else {
            self.unchanged_ticks += 1;
        }

        // Propose on every position change, and periodically to stay fresh.
        if self.proposing {
            let due = self
                .last_proposed
                .map_or(true, |at| now - at >= PROPOSE_INTERVAL);
            if changed || due {
                if changed {
                    self.our_seq = self.our_seq.next();
                }
                events.push(RoundEvent::Propose(self.sign_position()));
            }
        }

        // Convergence: a stable position, a winning close-time bin, and enough of the
        // network proposing the same set.
        if established >= LEDGER_MIN_CONSENSUS && self.unchanged_ticks >= 2 {
            let agree = self.set_agreement_percent();
            if agree >= MINIMUM_CONSENSUS_PCT {
                let give_up_on_close_time = established
                    > 2 * self
                        .inputs
                        .prev_round_duration
                        .max(super::timing::AV_MIN_CONSENSUS_TIME);
                if self.close_time_agreed || give_up_on_close_time {
                    let result = self.accept(established);
                    log::info!(
                        "AcceptRound, {}, {}, {}, {}",
                        self.round,
                        self.position_hash,
                        result.close_time,
                        result.close_agreed
                    );
                    events.push(RoundEvent::Accept(result));
                }
            }
        }
        events
    }

    fn accept(&mut self, established: Duration) -> RoundResult {
        self.phase = RoundPhase::Accepted;
        let close_agreed = self.close_time_agreed;
        let close_time = if close_agreed {
            effective_close_time(
                self.our_close_time,
                self.inputs.resolution,
                self.inputs.prev_close_time,
            )
        } else {
            self.inputs
                .prev_close_time
                .saturating_add_secs(self.inputs.resolution.secs() as u32)
        };
        RoundResult {
            tx_set: self.position.clone(),
            close_time,
            close_agreed,
            resolution: self.inputs.resolution,
            proposers: self.active_peers().count() + usize::from(self.proposing),
            duration: established,
        }
    }

    fn sign_position(&mut self) -> Proposal {
        self.last_proposed = Some(self.clock.instant());
        Proposal::new_signed(
            &self.keypair,
            self.round,
            self.our_seq,
            self.inputs.prev_hash,
            self.position_hash,
            self.our_close_time,
        )
    }

    /// Peers with a fresh, non-bowed-out proposal on our prior ledger.
    fn active_peers(&self) -> impl Iterator<Item = &PeerState> {
        self.peers.values().filter(|peer| {
            !peer.bowed_out && peer.proposal.prev_ledger == self.inputs.prev_hash
        })
    }

    fn expire_stale_proposals(&mut self, now: Instant) {
        let stale: Vec<[u8; 32]> = self
            .peers
            .iter()
            .filter(|(_, peer)| now - peer.received > PROPOSE_FRESHNESS)
            .map(|(node, _)| *node)
            .collect();
        for node in stale {
            self.peers.remove(&node);
            for dispute in self.disputes.values_mut() {
                dispute.remove_peer(&node);
            }
        }
    }

    /// The percentage of proposers (peers plus us) naming our exact set hash.
    fn set_agreement_percent(&self) -> u32 {
        let mut total = 1u32;
        let mut matching = 1u32;
        for peer in self.active_peers() {
            total += 1;
            if peer.proposal.tx_set == self.position_hash {
                matching += 1;
            }
        }
        matching * 100 / total
    }

    /// The close-time bin holding at least [`AV_CT_CONSENSUS_PCT`] of voters, if any.
    /// Ties resolve to the earliest bin so every node picks the same winner.
    fn close_time_majority(&self) -> Option<NetTime> {
        let resolution = self.inputs.resolution;
        let votes = std::iter::once(self.our_close_time)
            .chain(self.active_peers().map(|peer| peer.proposal.close_time));
        let mut bins: HashMap<NetTime, u32> = HashMap::new();
        let mut total = 0u32;
        for time in votes {
            *bins.entry(round_close_time(time, resolution)).or_insert(0) += 1;
            total += 1;
        }
        bins.into_iter()
            .filter(|(_, count)| count * 100 >= AV_CT_CONSENSUS_PCT * total)
            .min_by_key(|(time, count)| (std::cmp::Reverse(*count), time.int()))
            .map(|(time, _)| time)
    }

    /// A prior-ledger hash different from ours held by a strict majority of fresh
    /// proposers, if any.
    fn wrong_prior_ledger(&self) -> Option<Hash256> {
        let mut counts: HashMap<Hash256, u32> = HashMap::new();
        let mut total = 1u32; // ourselves, on our own prior ledger
        for peer in self.peers.values().filter(|peer| !peer.bowed_out) {
            *counts.entry(peer.proposal.prev_ledger).or_insert(0) += 1;
            total += 1;
        }
        counts
            .into_iter()
            .filter(|(hash, _)| *hash != self.inputs.prev_hash)
            .find(|(_, count)| count * 100 > total * 50)
            .map(|(hash, _)| hash)
    }

    /// Compare `set` against our position; any membership difference becomes (or
    /// refreshes) a dispute.
    fn create_disputes(&mut self, set: &TxSet) {
        let mut disputed: Vec<(TxId, bool)> = Vec::new();
        for tx in set.iter() {
            let id = tx.id();
            if !self.position.contains(&id) && !self.disputes.contains_key(&id) {
                disputed.push((id, false));
                self.disputes.insert(id, DisputedTx::new(tx.clone(), false));
            }
        }
        for tx in self.position.iter() {
            let id = tx.id();
            if !set.contains(&id) && !self.disputes.contains_key(&id) {
                disputed.push((id, true));
                self.disputes.insert(id, DisputedTx::new(tx.clone(), true));
            }
        }
        if !disputed.is_empty() {
            log::debug!("CreateDisputes, {}, {}", self.round, disputed.len());
        }
    }

    /// Record `node`'s votes: yes for every dispute its set contains, no otherwise.
    fn apply_peer_votes(&mut self, node: [u8; 32], set: &TxSet) {
        self.create_disputes(set);
        for (id, dispute) in self.disputes.iter_mut() {
            dispute.set_peer_vote(node, set.contains(id));
        }
    }
}
