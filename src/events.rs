/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Notifications that are emitted when significant things happen in the local node.
//!
//! ## Event enum
//!
//! Significant occurrences include sealing a ledger, starting a round, broadcasting a
//! proposal, or dropping a queued transaction. Each corresponds to a variant of the
//! [event enum](Event), whose inner struct stores information summarizing the event,
//! always including a timestamp of when it occurred.
//!
//! ## Registering event handlers
//!
//! Library users register handler closures which the [event bus](crate::event_bus)
//! thread calls when the matching variant is published. The default handlers in
//! [`crate::logging`] log every event out through the `log` facade.
//!
//! ## Timing
//!
//! Events are emitted **after** the corresponding occurrence completes. The seal event,
//! for example, fires only after the new ledger is in the chain registry.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use ed25519_dalek::VerifyingKey;

use crate::apply::result::ApplyCode;
use crate::consensus::round::RoundResult;
use crate::consensus::types::Proposal;
use crate::consensus::validation::Validation;
use crate::types::basic::{FeeLevel, LedgerSeq, NetTime};
use crate::types::hash::Hash256;
use crate::types::transaction::TxId;

/// Enumerates all events the node emits.
pub enum Event {
    // Round lifecycle.
    StartRound(StartRoundEvent),
    CloseLedger(CloseLedgerEvent),
    Propose(ProposeEvent),
    ReceiveProposal(ReceiveProposalEvent),
    AcceptRound(AcceptRoundEvent),
    WrongPriorLedger(WrongPriorLedgerEvent),
    Desync(DesyncEvent),

    // Ledger lifecycle.
    SealLedger(SealLedgerEvent),
    FullyValidate(FullyValidateEvent),

    // Validations.
    EmitValidation(EmitValidationEvent),
    ReceiveValidation(ReceiveValidationEvent),

    // Admission queue.
    QueueTx(QueueTxEvent),
    DropTx(DropTxEvent),
}

impl Event {
    /// Publish this event on the publisher channel, if one is configured.
    pub fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// A new round began on the given prior ledger.
pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub round: LedgerSeq,
    pub prev_ledger: Hash256,
}

/// The open phase ended; the node fixed its candidate set.
pub struct CloseLedgerEvent {
    pub timestamp: SystemTime,
    pub round: LedgerSeq,
    pub tx_set: Hash256,
    pub tx_count: usize,
}

/// The node broadcast a proposal.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: Proposal,
}

/// A peer's proposal was received and recorded.
pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub proposal: Proposal,
}

/// The round converged on a transaction set and close time.
pub struct AcceptRoundEvent {
    pub timestamp: SystemTime,
    pub round: LedgerSeq,
    pub result: RoundResult,
}

/// A majority of peers was found building on a different prior ledger.
pub struct WrongPriorLedgerEvent {
    pub timestamp: SystemTime,
    pub round: LedgerSeq,
    pub majority_ledger: Hash256,
}

/// The round failed to converge within the hard limit; the node stopped proposing.
pub struct DesyncEvent {
    pub timestamp: SystemTime,
    pub round: LedgerSeq,
}

/// A new immutable ledger was sealed and recorded in the chain.
pub struct SealLedgerEvent {
    pub timestamp: SystemTime,
    pub seq: LedgerSeq,
    pub hash: Hash256,
    pub tx_count: usize,
    pub close_time: NetTime,
}

/// A quorum of trusted validators signed the ledger.
pub struct FullyValidateEvent {
    pub timestamp: SystemTime,
    pub seq: LedgerSeq,
    pub hash: Hash256,
}

/// The node signed and broadcast a validation.
pub struct EmitValidationEvent {
    pub timestamp: SystemTime,
    pub validation: Validation,
}

/// A peer's validation was received and recorded.
pub struct ReceiveValidationEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub validation: Validation,
}

/// A transaction entered the admission queue.
pub struct QueueTxEvent {
    pub timestamp: SystemTime,
    pub tx_id: TxId,
    pub level: FeeLevel,
}

/// A transaction left the admission queue without applying.
pub struct DropTxEvent {
    pub timestamp: SystemTime,
    pub tx_id: TxId,
    pub code: ApplyCode,
}
