/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives events emitted by the node's threads and passes them to event
//! handlers.
//!
//! When the thread receives a message containing an [event](crate::events::Event), it
//! triggers the execution of all handlers defined for the contained event type. The
//! handlers for each event type are stored in [`EventHandlers`]: an optional user-defined
//! handler and, if logging is enabled, the default logging handler from
//! [`crate::logging`].

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread,
    thread::JoinHandle,
};

use crate::{events::*, logging::Logger};

/// Pointer to a handler closure, parametrised by the event type.
pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// The two optional handlers enabled for one event type.
pub(crate) struct HandlerPair<T: Logger> {
    pub(crate) user_defined_handler: Option<HandlerPtr<T>>,
    pub(crate) logging_handler: Option<HandlerPtr<T>>,
}

impl<T: Logger> HandlerPair<T> {
    fn new(log: bool, user_defined_handler: Option<HandlerPtr<T>>) -> HandlerPair<T> {
        HandlerPair {
            user_defined_handler,
            logging_handler: if log { Some(T::get_logger()) } else { None },
        }
    }

    fn is_empty(&self) -> bool {
        self.user_defined_handler.is_none() && self.logging_handler.is_none()
    }

    fn fire(&self, event: &T) {
        if let Some(handler) = &self.user_defined_handler {
            handler(event);
        }
        if let Some(handler) = &self.logging_handler {
            handler(event);
        }
    }
}

/// The handlers for every event type the node emits.
pub(crate) struct EventHandlers {
    pub(crate) start_round_handlers: HandlerPair<StartRoundEvent>,
    pub(crate) close_ledger_handlers: HandlerPair<CloseLedgerEvent>,
    pub(crate) propose_handlers: HandlerPair<ProposeEvent>,
    pub(crate) receive_proposal_handlers: HandlerPair<ReceiveProposalEvent>,
    pub(crate) accept_round_handlers: HandlerPair<AcceptRoundEvent>,
    pub(crate) wrong_prior_ledger_handlers: HandlerPair<WrongPriorLedgerEvent>,
    pub(crate) desync_handlers: HandlerPair<DesyncEvent>,
    pub(crate) seal_ledger_handlers: HandlerPair<SealLedgerEvent>,
    pub(crate) fully_validate_handlers: HandlerPair<FullyValidateEvent>,
    pub(crate) emit_validation_handlers: HandlerPair<EmitValidationEvent>,
    pub(crate) receive_validation_handlers: HandlerPair<ReceiveValidationEvent>,
    pub(crate) queue_tx_handlers: HandlerPair<QueueTxEvent>,
    pub(crate) drop_tx_handlers: HandlerPair<DropTxEvent>,
}

/// User-defined handlers, all optional. Passed when starting a node.
#[derive(Default)]
pub struct UserHandlers {
    pub start_round: Option<HandlerPtr<StartRoundEvent>>,
    pub close_ledger: Option<HandlerPtr<CloseLedgerEvent>>,
    pub propose: Option<HandlerPtr<ProposeEvent>>,
    pub receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    pub accept_round: Option<HandlerPtr<AcceptRoundEvent>>,
    pub wrong_prior_ledger: Option<HandlerPtr<WrongPriorLedgerEvent>>,
    pub desync: Option<HandlerPtr<DesyncEvent>>,
    pub seal_ledger: Option<HandlerPtr<SealLedgerEvent>>,
    pub fully_validate: Option<HandlerPtr<FullyValidateEvent>>,
    pub emit_validation: Option<HandlerPtr<EmitValidationEvent>>,
    pub receive_validation: Option<HandlerPtr<ReceiveValidationEvent>>,
    pub queue_tx: Option<HandlerPtr<QueueTxEvent>>,
    pub drop_tx: Option<HandlerPtr<DropTxEvent>>,
}

impl EventHandlers {
    pub(crate) fn new(log: bool, user: UserHandlers) -> EventHandlers {
        EventHandlers {
            start_round_handlers: HandlerPair::new(log, user.start_round),
            close_ledger_handlers: HandlerPair::new(log, user.close_ledger),
            propose_handlers: HandlerPair::new(log, user.propose),
            receive_proposal_handlers: HandlerPair::new(log, user.receive_proposal),
            accept_round_handlers: HandlerPair::new(log, user.accept_round),
            wrong_prior_ledger_handlers: HandlerPair::new(log, user.wrong_prior_ledger),
            desync_handlers: HandlerPair::new(log, user.desync),
            seal_ledger_handlers: HandlerPair::new(log, user.seal_ledger),
            fully_validate_handlers: HandlerPair::new(log, user.fully_validate),
            emit_validation_handlers: HandlerPair::new(log, user.emit_validation),
            receive_validation_handlers: HandlerPair::new(log, user.receive_validation),
            queue_tx_handlers: HandlerPair::new(log, user.queue_tx),
            drop_tx_handlers: HandlerPair::new(log, user.drop_tx),
        }
    }

    /// Whether no handlers at all are defined; the event bus thread is not started in
    /// that case.
    pub(crate) fn is_empty(&self) -> bool {
        self.start_round_handlers.is_empty()
            && self.close_ledger_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.accept_round_handlers.is_empty()
            && self.wrong_prior_ledger_handlers.is_empty()
            && self.desync_handlers.is_empty()
            && self.seal_ledger_handlers.is_empty()
            && self.fully_validate_handlers.is_empty()
            && self.emit_validation_handlers.is_empty()
            && self.receive_validation_handlers.is_empty()
            && self.queue_tx_handlers.is_empty()
            && self.drop_tx_handlers.is_empty()
    }

    fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartRound(event) => self.start_round_handlers.fire(&event),
            Event::CloseLedger(event) => self.close_ledger_handlers.fire(&event),
            Event::Propose(event) => self.propose_handlers.fire(&event),
            Event::ReceiveProposal(event) => self.receive_proposal_handlers.fire(&event),
            Event::AcceptRound(event) => self.accept_round_handlers.fire(&event),
            Event::WrongPriorLedger(event) => self.wrong_prior_ledger_handlers.fire(&event),
            Event::Desync(event) => self.desync_handlers.fire(&event),
            Event::SealLedger(event) => self.seal_ledger_handlers.fire(&event),
            Event::FullyValidate(event) => self.fully_validate_handlers.fire(&event),
            Event::EmitValidation(event) => self.emit_validation_handlers.fire(&event),
            Event::ReceiveValidation(event) => self.receive_validation_handlers.fire(&event),
            Event::QueueTx(event) => self.queue_tx_handlers.fire(&event),
            Event::DropTx(event) => self.drop_tx_handlers.fire(&event),
        }
    }
}

/// Starts the event bus thread: an infinite loop that fires handlers for every received
/// event until the shutdown signal arrives.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        if let Ok(event) = event_subscriber.try_recv() {
            event_handlers.fire_handlers(event)
        } else {
            thread::yield_now()
        }
    })
}
