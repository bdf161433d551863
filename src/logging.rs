/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The node logs using the [log](https://docs.rs/log/latest/log/) crate. To get these
//! messages printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first
//! two values are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as
//!    constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. Hashes and keys are
//! printed as the first seven characters of their Base64 encoding.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const START_ROUND: &str = "StartRound";
pub const CLOSE_LEDGER: &str = "CloseLedger";
pub const PROPOSE: &str = "Propose";
pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const ACCEPT_ROUND: &str = "AcceptRound";
pub const WRONG_PRIOR_LEDGER: &str = "WrongPriorLedger";
pub const DESYNC: &str = "Desync";

pub const SEAL_LEDGER: &str = "SealLedger";
pub const FULLY_VALIDATE: &str = "FullyValidate";

pub const EMIT_VALIDATION: &str = "EmitValidation";
pub const RECEIVE_VALIDATION: &str = "ReceiveValidation";

pub const QUEUE_TX: &str = "QueueTx";
pub const DROP_TX: &str = "DropTx";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &StartRoundEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_ROUND,
                secs_since_unix_epoch(event.timestamp),
                event.round,
                first_seven_base64_chars(&event.prev_ledger.bytes())
            )
        })
    }
}

impl Logger for CloseLedgerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &CloseLedgerEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                CLOSE_LEDGER,
                secs_since_unix_epoch(event.timestamp),
                event.round,
                first_seven_base64_chars(&event.tx_set.bytes()),
                event.tx_count
            )
        })
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(event.timestamp),
                event.proposal.round,
                event.proposal.seq,
                first_seven_base64_chars(&event.proposal.tx_set.bytes())
            )
        })
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.origin.to_bytes()),
                event.proposal.seq,
                first_seven_base64_chars(&event.proposal.tx_set.bytes())
            )
        })
    }
}

impl Logger for AcceptRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &AcceptRoundEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                ACCEPT_ROUND,
                secs_since_unix_epoch(event.timestamp),
                event.round,
                event.result.tx_set.len(),
                event.result.close_time,
                event.result.close_agreed
            )
        })
    }
}

impl Logger for WrongPriorLedgerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &WrongPriorLedgerEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                WRONG_PRIOR_LEDGER,
                secs_since_unix_epoch(event.timestamp),
                event.round,
                first_seven_base64_chars(&event.majority_ledger.bytes())
            )
        })
    }
}

impl Logger for DesyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &DesyncEvent| {
            log::warn!(
                "{}, {}, {}",
                DESYNC,
                secs_since_unix_epoch(event.timestamp),
                event.round
            )
        })
    }
}

impl Logger for SealLedgerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &SealLedgerEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                SEAL_LEDGER,
                secs_since_unix_epoch(event.timestamp),
                event.seq,
                first_seven_base64_chars(&event.hash.bytes()),
                event.tx_count,
                event.close_time
            )
        })
    }
}

impl Logger for FullyValidateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &FullyValidateEvent| {
            log::info!(
                "{}, {}, {}, {}",
                FULLY_VALIDATE,
                secs_since_unix_epoch(event.timestamp),
                event.seq,
                first_seven_base64_chars(&event.hash.bytes())
            )
        })
    }
}

impl Logger for EmitValidationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &EmitValidationEvent| {
            log::info!(
                "{}, {}, {}, {}",
                EMIT_VALIDATION,
                secs_since_unix_epoch(event.timestamp),
                event.validation.ledger_seq,
                first_seven_base64_chars(&event.validation.ledger_hash.bytes())
            )
        })
    }
}

impl Logger for ReceiveValidationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ReceiveValidationEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_VALIDATION,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.origin.to_bytes()),
                event.validation.ledger_seq,
                first_seven_base64_chars(&event.validation.ledger_hash.bytes())
            )
        })
    }
}

impl Logger for QueueTxEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &QueueTxEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                QUEUE_TX,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.tx_id.bytes()),
                event.level
            )
        })
    }
}

impl Logger for DropTxEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &DropTxEvent| {
            log::debug!(
                "{}, {}, {}, {:?}",
                DROP_TX,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.tx_id.bytes()),
                event.code
            )
        })
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking
// the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}
