/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that [start](LedgerNode::start) a ledger node, as well as the type that
//! keeps it alive.
//!
//! A running node is three threads around shared state:
//!
//! - the **poller** drains the [network](crate::networking::PeerNetwork) and splits
//!   messages into per-kind channels;
//! - the **algorithm** thread owns the consensus round, the open view, and the admission
//!   queue's interaction with both, advancing at the protocol granularity;
//! - the **event bus** (started only when handlers are registered) dispatches
//!   [events](crate::events) to user handlers and the default log handlers.
//!
//! Dropping the [`LedgerNode`] shuts the threads down in dependency order.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use log;

use crate::amendments::EnabledSet;
use crate::apply::result::CodeBand;
use crate::apply::{apply, ApplyContext};
use crate::clock::Clock;
use crate::config::Configuration;
use crate::consensus::round::{RoundConsensus, RoundEvent, RoundInputs, RoundResult};
use crate::consensus::timing::{next_resolution, TIME_LEAP_GAP};
use crate::consensus::types::TxSet;
use crate::consensus::validation::{Validation, ValidationKeeper};
use crate::event_bus::{start_event_bus, EventHandlers, UserHandlers};
use crate::events::*;
use crate::fees::FeeMetrics;
use crate::jobs::{JobClass, JobPool};
use crate::ledger::chain::LedgerChain;
use crate::ledger::entry::{amendments_key, fee_settings_key, StateEntry};
use crate::ledger::ledger::Ledger;
use crate::ledger::open_view::{CloseData, OpenView};
use crate::networking::{start_polling, Inbound, Message, PeerNetwork, SenderHandle};
use crate::queue::{AdmissionQueue, AdmitOutcome};
use crate::store::NodeStore;
use crate::trie::TrieError;
use crate::types::basic::LedgerFlags;
use crate::types::transaction::Transaction;

/// A running ledger node. Dropping it joins every internal thread.
pub struct LedgerNode<S: NodeStore> {
    chain: Arc<LedgerChain<S>>,
    queue: Arc<AdmissionQueue>,
    metrics: Arc<FeeMetrics>,
    submissions: Sender<Transaction>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    algorithm: Option<JoinHandle<()>>,
    algorithm_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Sender<()>,
}

impl<S: NodeStore> LedgerNode<S> {
    /// Start a node on `genesis`, which the caller constructs (usually with
    /// [`Ledger::genesis`]).
    pub fn start<N: PeerNetwork, C: Clock>(
        config: Configuration,
        network: N,
        store: S,
        genesis: Ledger<S>,
        clock: C,
        handlers: UserHandlers,
        log_events: bool,
    ) -> LedgerNode<S> {
        let metrics = Arc::new(FeeMetrics::new(&config.queue));
        let queue = Arc::new(AdmissionQueue::new(config.queue, metrics.clone()));
        let chain = Arc::new(LedgerChain::new(genesis));

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, inbound) = start_polling(network.clone(), poller_shutdown_receiver);

        let (event_publisher, event_subscriber) = mpsc::channel();
        let event_handlers = EventHandlers::new(log_events, handlers);
        let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
        let (event_bus, event_publisher) = if event_handlers.is_empty() {
            (None, None)
        } else {
            (
                Some(start_event_bus(
                    event_handlers,
                    event_subscriber,
                    event_bus_shutdown_receiver,
                )),
                Some(event_publisher),
            )
        };

        let (submissions, submissions_receiver) = mpsc::channel();
        let (algorithm_shutdown, algorithm_shutdown_receiver) = mpsc::channel();
        let jobs = JobPool::new(config.worker_threads);
        let algorithm = Algorithm {
            config,
            clock,
            store,
            chain: chain.clone(),
            queue: queue.clone(),
            metrics: metrics.clone(),
            sender: SenderHandle::new(network),
            inbound,
            local_submissions: submissions_receiver,
            event_publisher,
            jobs,
        };
        let algorithm = thread::Builder::new()
            .name("algorithm".to_string())
            .spawn(move || algorithm.execute(algorithm_shutdown_receiver))
            .expect("can spawn the algorithm thread");

        LedgerNode {
            chain,
            queue,
            metrics,
            submissions,
            poller: Some(poller),
            poller_shutdown,
            algorithm: Some(algorithm),
            algorithm_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }

    /// Hand a locally received transaction to the algorithm thread.
    pub fn submit_transaction(&self, tx: Transaction) {
        let _ = self.submissions.send(tx);
    }

    pub fn chain(&self) -> &Arc<LedgerChain<S>> {
        &self.chain
    }

    pub fn queue(&self) -> &Arc<AdmissionQueue> {
        &self.queue
    }

    pub fn fee_metrics(&self) -> &Arc<FeeMetrics> {
        &self.metrics
    }
}

impl<S: NodeStore> Drop for LedgerNode<S> {
    fn drop(&mut self) {
        // Safety: the order of thread shutdown is important. The algorithm thread
        // receives from the poller and assumes the poller outlives it; the event bus
        // must drain last so late events still land.
        self.algorithm_shutdown.send(()).unwrap();
        self.algorithm.take().unwrap().join().unwrap();

        self.poller_shutdown.send(()).unwrap();
        self.poller.take().unwrap().join().unwrap();

        if let Some(event_bus) = self.event_bus.take() {
            self.event_bus_shutdown.send(()).unwrap();
            event_bus.join().unwrap();
        }
    }
}

/// The state owned by the algorithm thread.
struct Algorithm<S: NodeStore, N: PeerNetwork, C: Clock> {
    config: Configuration,
    clock: C,
    store: S,
    chain: Arc<LedgerChain<S>>,
    queue: Arc<AdmissionQueue>,
    metrics: Arc<FeeMetrics>,
    sender: SenderHandle<N>,
    inbound: Inbound,
    local_submissions: Receiver<Transaction>,
    event_publisher: Option<Sender<Event>>,
    jobs: JobPool,
}

impl<S: NodeStore, N: PeerNetwork, C: Clock> Algorithm<S, N, C> {
    fn execute(mut self, shutdown: Receiver<()>) {
        let mut validations = ValidationKeeper::new(
            self.clock.clone(),
            self.config.identity.trusted_validators.clone(),
            self.config.consensus.validation_quorum_percent,
        );

        let mut prev = self.chain.tip();
        let mut prev_round_duration = crate::consensus::timing::AV_MIN_CONSENSUS_TIME;
        let mut resolution = prev.close_resolution();
        let mut proposing = self.config.identity.is_validator;
        let mut amendment_blocked = false;
        let granularity = self
            .config
            .consensus
            .granularity
            .min(crate::consensus::timing::LEDGER_GRANULARITY);
        let (mut round, mut view, mut ctx) =
            self.start_round(&prev, resolution, prev_round_duration, proposing);

        loop {
            match shutdown.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("algorithm thread disconnected from main thread")
                }
            }

            self.handle_fetches();
            self.handle_consensus_messages(&mut round, &mut validations);
            self.promote_full_validations(&validations);

            // An enabled feature this build cannot evaluate blocks the node: it keeps
            // serving reads and recording validations, but neither applies
            // transactions nor takes part in consensus.
            let unsupported = ctx.amendments.unsupported();
            if !unsupported.is_empty() {
                if !amendment_blocked {
                    amendment_blocked = true;
                    log::error!(
                        "AmendmentBlocked, {}, {}",
                        round.round(),
                        unsupported.len()
                    );
                }
                thread::sleep(granularity);
                continue;
            }
            amendment_blocked = false;

            self.handle_submissions(&mut round, &mut view, &ctx);

            for event in round.tick() {
                match event {
                    RoundEvent::ReadyToClose => {
                        let candidates =
                            TxSet::from_txs(view.applied().iter().map(|a| a.tx.clone()));
                        Event::CloseLedger(CloseLedgerEvent {
                            timestamp: SystemTime::now(),
                            round: round.round(),
                            tx_set: candidates.hash(),
                            tx_count: candidates.len(),
                        })
                        .publish(&self.event_publisher);
                        if let Some(proposal) = round.close_ledger(candidates) {
                            Event::Propose(ProposeEvent {
                                timestamp: SystemTime::now(),
                                proposal: proposal.clone(),
                            })
                            .publish(&self.event_publisher);
                            self.sender.broadcast(proposal);
                        }
                    }
                    RoundEvent::Propose(proposal) => {
                        Event::Propose(ProposeEvent {
                            timestamp: SystemTime::now(),
                            proposal: proposal.clone(),
                        })
                        .publish(&self.event_publisher);
                        self.sender.broadcast(proposal);
                    }
                    RoundEvent::Accept(result) => {
                        Event::AcceptRound(AcceptRoundEvent {
                            timestamp: SystemTime::now(),
                            round: round.round(),
                            result: result.clone(),
                        })
                        .publish(&self.event_publisher);
                        match self.seal_round(&prev, &result, &ctx) {
                            Some((sealed, retriable)) => {
                                if proposing {
                                    // Sign and broadcast our validation, recording it
                                    // locally so our own signature counts toward the
                                    // quorum.
                                    let validation = Validation::new_signed(
                                        &self.config.identity.keypair,
                                        sealed.hash(),
                                        sealed.seq(),
                                        sealed.close_time(),
                                        self.clock.network_time(),
                                    );
                                    let _ = validations.record(validation.clone());
                                    Event::EmitValidation(EmitValidationEvent {
                                        timestamp: SystemTime::now(),
                                        validation: validation.clone(),
                                    })
                                    .publish(&self.event_publisher);
                                    self.sender.broadcast(validation);
                                }
                                prev_round_duration = result.duration;
                                resolution = next_resolution(
                                    result.resolution,
                                    result.close_agreed,
                                    sealed.seq().next(),
                                );
                                prev = sealed;
                                (round, view, ctx) = self.start_round(
                                    &prev,
                                    resolution,
                                    prev_round_duration,
                                    proposing,
                                );
                                // Whatever the agreed set could not settle goes back
                                // through admission against the fresh view.
                                for tx in retriable {
                                    let _ = self.queue.admit(&mut view, tx, &ctx);
                                }
                            }
                            None => {
                                // Sealing failed (missing state); retry the round on
                                // the same prior ledger.
                                (round, view, ctx) = self.start_round(
                                    &prev,
                                    resolution,
                                    prev_round_duration,
                                    proposing,
                                );
                            }
                        }
                    }
                    RoundEvent::WrongPriorLedger(majority) => {
                        Event::WrongPriorLedger(WrongPriorLedgerEvent {
                            timestamp: SystemTime::now(),
                            round: round.round(),
                            majority_ledger: majority,
                        })
                        .publish(&self.event_publisher);
                        match self.chain.get(&majority) {
                            Some(better) => {
                                prev = better;
                                (round, view, ctx) = self.start_round(
                                    &prev,
                                    resolution,
                                    prev_round_duration,
                                    proposing,
                                );
                            }
                            None => {
                                self.sender.broadcast(Message::GetLedger(
                                    crate::networking::LedgerRequest::ByHash(majority),
                                ));
                            }
                        }
                    }
                    RoundEvent::Desync => {
                        Event::Desync(DesyncEvent {
                            timestamp: SystemTime::now(),
                            round: round.round(),
                        })
                        .publish(&self.event_publisher);
                        // Stop proposing until a fresher fully validated ledger gives
                        // the node back its footing.
                        proposing = false;
                    }
                }
            }

            // A desynced node re-anchors on the best fully validated ledger.
            if !proposing && self.config.identity.is_validator {
                if let Some(anchor) = self.chain.latest_fully_validated() {
                    if anchor.seq() >= round.round() {
                        proposing = true;
                        prev = anchor;
                        (round, view, ctx) =
                            self.start_round(&prev, resolution, prev_round_duration, proposing);
                    }
                }
            }

            thread::sleep(granularity);
        }
    }

    /// Create the round machine, the open view it fills, and the apply context for the
    /// child of `prev`. The queue drains into the fresh view immediately.
    fn start_round(
        &mut self,
        prev: &Arc<Ledger<S>>,
        resolution: crate::types::basic::CloseResolution,
        prev_round_duration: std::time::Duration,
        proposing: bool,
    ) -> (RoundConsensus<C>, OpenView<S>, ApplyContext<EnabledSet>) {
        let inputs = RoundInputs {
            prev_hash: prev.hash(),
            prev_seq: prev.seq(),
            prev_close_time: prev.close_time(),
            resolution,
            prev_round_duration,
        };
        let round = RoundConsensus::new(
            self.clock.clone(),
            self.config.identity.keypair.clone(),
            self.config.identity.trusted_validators.clone(),
            proposing,
            inputs,
        );
        let mut view = OpenView::new(prev);
        let ctx = self.apply_context(prev);
        if let Err(err) = self.queue.drain(&mut view, &ctx) {
            log::warn!("DrainFailed, {}, {}", prev.seq().next(), err);
        }
        Event::StartRound(StartRoundEvent {
            timestamp: SystemTime::now(),
            round: prev.seq().next(),
            prev_ledger: prev.hash(),
        })
        .publish(&self.event_publisher);
        (round, view, ctx)
    }

    /// The amendment switch and fee parameters attached to `prev`.
    ///
    /// A corrupted trie node discovered here is unrecoverable: the node halts rather
    /// than build ledgers on state it cannot trust. A node that is merely not resident
    /// falls back to the configured defaults, logged.
    fn apply_context(&self, prev: &Ledger<S>) -> ApplyContext<EnabledSet> {
        let amendments = match prev.read_entry(&amendments_key()) {
            Ok(Some(StateEntry::Amendments { enabled })) => EnabledSet::new(enabled),
            Ok(_) => EnabledSet::empty(),
            Err(TrieError::Corruption(hash)) => {
                log::error!("Corruption, {}, {}", prev.seq(), hash);
                panic!(
                    "state trie corruption at {} while reading the amendments entry of ledger {}",
                    hash,
                    prev.seq()
                );
            }
            Err(err) => {
                log::warn!("AmendmentsUnavailable, {}, {}", prev.seq(), err);
                EnabledSet::empty()
            }
        };
        let fees = match prev.read_entry(&fee_settings_key()) {
            Ok(Some(StateEntry::FeeSettings {
                base_fee,
                reserve_base,
                reserve_increment,
            })) => (base_fee, reserve_base, reserve_increment),
            Ok(_) => (
                self.config.fees.reference_fee,
                self.config.fees.reserve_base,
                self.config.fees.reserve_increment,
            ),
            Err(TrieError::Corruption(hash)) => {
                log::error!("Corruption, {}, {}", prev.seq(), hash);
                panic!(
                    "state trie corruption at {} while reading the fee settings of ledger {}",
                    hash,
                    prev.seq()
                );
            }
            Err(err) => {
                log::warn!("FeeSettingsUnavailable, {}, {}", prev.seq(), err);
                (
                    self.config.fees.reference_fee,
                    self.config.fees.reserve_base,
                    self.config.fees.reserve_increment,
                )
            }
        };
        ApplyContext {
            amendments,
            reference_fee: fees.0,
            reserve_base: fees.1,
            reserve_increment: fees.2,
        }
    }

    /// Replay the agreed set over a fresh view of `prev` and seal the child ledger.
    /// Returns the sealed ledger and the agreed transactions left in the retry band.
    fn seal_round(
        &mut self,
        prev: &Arc<Ledger<S>>,
        result: &RoundResult,
        ctx: &ApplyContext<EnabledSet>,
    ) -> Option<(Arc<Ledger<S>>, Vec<Transaction>)> {
        let mut view = OpenView::new(prev);
        let retriable = apply_agreed_set(&mut view, &result.tx_set, ctx);

        let mut flags = LedgerFlags::none();
        if !result.close_agreed {
            flags.insert(LedgerFlags::NO_CONSENSUS_TIME);
        }
        let applied_levels: Vec<crate::types::basic::FeeLevel> = view
            .applied()
            .iter()
            .map(|applied| applied.tx.fee_level(ctx.reference_fee))
            .collect();
        let tx_count = view.tx_count();

        let sealed = match view.commit(CloseData {
            close_time: result.close_time,
            close_resolution: result.resolution,
            flags,
        }) {
            Ok(ledger) => ledger,
            Err(err) => {
                log::error!("SealFailed, {}, {}", prev.seq().next(), err);
                return None;
            }
        };
        let sealed = match self.chain.append(sealed) {
            Ok(ledger) => ledger,
            Err(err) => {
                log::error!("AppendFailed, {}", err);
                return None;
            }
        };
        Event::SealLedger(SealLedgerEvent {
            timestamp: SystemTime::now(),
            seq: sealed.seq(),
            hash: sealed.hash(),
            tx_count,
            close_time: sealed.close_time(),
        })
        .publish(&self.event_publisher);

        // Fees and the queue learn about the closed ledger. A close-to-close gap more
        // than TIME_LEAP_GAP past the resolution means the round ran long under load.
        // The child of genesis has no meaningful gap.
        let gap = sealed.close_time().abs_diff(prev.close_time());
        let time_leap = prev.close_time().int() != 0
            && gap > TIME_LEAP_GAP + sealed.close_resolution().secs() as u32;
        self.metrics.update_on_close(&applied_levels, time_leap);
        self.queue.on_ledger_closed(sealed.seq());

        // Persist the header under its content address in the background, so peers
        // catching up can fetch it by hash.
        let store = self.store.clone();
        let header_hash = sealed.hash();
        let header_bytes = sealed.header().serialize().to_vec();
        self.jobs.submit(JobClass::LedgerSave, move || {
            store.put(header_hash, header_bytes);
        });

        Some((sealed, retriable))
    }

    fn handle_consensus_messages(
        &mut self,
        round: &mut RoundConsensus<C>,
        validations: &mut ValidationKeeper<C>,
    ) {
        while let Ok((origin, message)) = self.inbound.consensus.try_recv() {
            match message {
                Message::Proposal(proposal) => match round.on_proposal(proposal.clone()) {
                    Ok(true) => {
                        // Positions are only votable once their set body is resident.
                        if !round.has_tx_set(&proposal.tx_set) {
                            self.sender.send(origin, Message::GetTxSet(proposal.tx_set));
                        }
                        Event::ReceiveProposal(ReceiveProposalEvent {
                            timestamp: SystemTime::now(),
                            origin,
                            proposal,
                        })
                        .publish(&self.event_publisher);
                    }
                    Ok(false) => (),
                    Err(err) => log::debug!("BadProposal, {:?}", err),
                },
                Message::GetTxSet(hash) => {
                    if let Some(set) = round.tx_set_body(&hash) {
                        self.sender.send(
                            origin,
                            Message::TxSetFound(set.iter().cloned().collect()),
                        );
                    }
                }
                Message::TxSetFound(txs) => {
                    round.on_tx_set(TxSet::from_txs(txs));
                }
                Message::Validation(validation) => match validations.record(validation.clone()) {
                    Ok(_) => {
                        Event::ReceiveValidation(ReceiveValidationEvent {
                            timestamp: SystemTime::now(),
                            origin,
                            validation,
                        })
                        .publish(&self.event_publisher);
                    }
                    Err(err) => log::debug!("BadValidation, {:?}", err),
                },
                _ => (),
            }
        }
    }

    fn handle_submissions(
        &mut self,
        round: &mut RoundConsensus<C>,
        view: &mut OpenView<S>,
        ctx: &ApplyContext<EnabledSet>,
    ) {
        let local: Vec<Transaction> =
            std::iter::from_fn(|| self.local_submissions.try_recv().ok()).collect();
        let relayed: Vec<Transaction> =
            std::iter::from_fn(|| self.inbound.submissions.try_recv().ok().map(|(_, tx)| tx))
                .collect();

        let mut any = false;
        for tx in local {
            // Locally received transactions that survive admission are relayed, so the
            // whole network assembles the same candidate sets.
            if self.admit_one(tx.clone(), view, ctx) {
                self.sender.broadcast(tx);
                any = true;
            }
        }
        for tx in relayed {
            any |= self.admit_one(tx, view, ctx);
        }
        if any || view.tx_count() > 0 {
            round.note_transactions();
        }
    }

    /// Run one transaction through admission, publishing the queue events. Returns
    /// whether the transaction was taken (applied or queued).
    fn admit_one(
        &mut self,
        tx: Transaction,
        view: &mut OpenView<S>,
        ctx: &ApplyContext<EnabledSet>,
    ) -> bool {
        let id = tx.id();
        let level = tx.fee_level(ctx.reference_fee);
        match self.queue.admit(view, tx, ctx) {
            Ok(AdmitOutcome::Queued) => {
                Event::QueueTx(QueueTxEvent {
                    timestamp: SystemTime::now(),
                    tx_id: id,
                    level,
                })
                .publish(&self.event_publisher);
                true
            }
            Ok(AdmitOutcome::Applied(code)) => code.band() >= CodeBand::ClaimedFee,
            Ok(AdmitOutcome::Rejected(code)) => {
                Event::DropTx(DropTxEvent {
                    timestamp: SystemTime::now(),
                    tx_id: id,
                    code,
                })
                .publish(&self.event_publisher);
                false
            }
            Err(err) => {
                log::warn!("AdmitFailed, {}, {}", id, err);
                false
            }
        }
    }

    /// Serve peers' fetch traffic. Lookups run on the worker pool so a peer paging
    /// through history never stalls the round.
    fn handle_fetches(&mut self) {
        while let Ok((origin, message)) = self.inbound.fetch.try_recv() {
            match message {
                Message::GetNode(hash) => {
                    let store = self.store.clone();
                    let mut sender = self.sender.clone();
                    self.jobs.submit(JobClass::NodeFetch, move || {
                        if let Some(bytes) = store.get(&hash) {
                            sender.send(origin, Message::NodeFound(hash, bytes));
                        }
                    });
                }
                Message::NodeFound(hash, bytes) => {
                    self.store.put(hash, bytes);
                }
                Message::GetLedger(request) => {
                    let chain = self.chain.clone();
                    let mut sender = self.sender.clone();
                    self.jobs.submit(JobClass::NodeFetch, move || {
                        let ledger = match request {
                            crate::networking::LedgerRequest::ByHash(hash) => chain.get(&hash),
                            crate::networking::LedgerRequest::BySeq(seq) => {
                                chain.at_seq(seq).into_iter().next()
                            }
                        };
                        if let Some(ledger) = ledger {
                            sender.send(
                                origin,
                                Message::LedgerFound(ledger.header().serialize().to_vec()),
                            );
                        }
                    });
                }
                _ => (),
            }
        }
    }

    fn promote_full_validations(&mut self, validations: &ValidationKeeper<C>) {
        if let Some((seq, hash)) = validations.best_fully_validated() {
            if self.chain.get(&hash).is_some()
                && self.chain.fully_validated_at(seq).is_none()
            {
                match self.chain.mark_fully_validated(&hash) {
                    Ok(()) => {
                        Event::FullyValidate(FullyValidateEvent {
                            timestamp: SystemTime::now(),
                            seq,
                            hash,
                        })
                        .publish(&self.event_publisher);
                    }
                    Err(err) => log::error!("ValidationConflict, {}", err),
                }
            }
        }
    }
}

/// Replay an agreed transaction set deterministically: canonical order, with repeated
/// passes so sequence-dependent transactions settle no matter how the set iterates.
/// Returns the transactions left in the retry band once no pass makes progress.
fn apply_agreed_set<S: NodeStore>(
    view: &mut OpenView<S>,
    set: &TxSet,
    ctx: &ApplyContext<EnabledSet>,
) -> Vec<Transaction> {
    let mut pending: Vec<Transaction> = set.iter().cloned().collect();
    loop {
        let mut retriable = Vec::new();
        let mut progressed = false;
        for tx in std::mem::take(&mut pending) {
            match apply(view, &tx, ctx) {
                Ok(outcome) if outcome.applied => progressed = true,
                Ok(outcome) if outcome.code.is_retry() => retriable.push(tx),
                Ok(_) => (),
                Err(err) => {
                    log::error!("ApplyFailed, {}, {}", tx.id(), err);
                }
            }
        }
        if retriable.is_empty() || !progressed {
            return retriable;
        }
        pending = retriable;
    }
}
