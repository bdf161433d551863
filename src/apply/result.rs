/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Transaction result codes and the ordered band contract.
//!
//! Codes partition into bands whose order is part of the public contract:
//! `Local < Malformed < Failed < Retry < ClaimedFee < Success`. Everything below `Retry`
//! is terminal and never enters a ledger; `Retry` outcomes may be queued for a later
//! ledger; only `ClaimedFee` and `Success` appear in a committed ledger's transaction
//! trie.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::basic::Drops;
use crate::types::crypto_primitives::AccountID;

/// The terminal (or retry) code of one apply attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum ApplyCode {
    // Local: caller-visible only, never broadcast, never in a ledger.
    /// Input the node could not even begin to process.
    BadInput,
    /// The queue is full and the fee does not displace anything.
    QueueFull,
    /// A transaction for the same account and sequence is queued with a fee this one
    /// does not sufficiently exceed.
    FeeBelowReplacement,
    /// Queuing this transaction would commit more of the account's balance than it has
    /// above its reserve.
    Overcommitted,

    // Malformed: rejected at preflight, never queued, never broadcast.
    MalformedTransaction,
    BadSignature,
    /// Declared fee below the transaction's base fee.
    FeeBelowMinimum,
    ZeroAmount,
    SelfPayment,
    /// The payload type is gated behind an amendment that is not enabled.
    FeatureDisabled,

    // Failed: terminal, no fee taken, not retriable.
    /// The signer's sequence has already moved past this transaction's.
    PastSequence,
    /// The signing account does not exist in the ledger.
    AccountMissing,
    /// This exact transaction is already in the ledger being built.
    AlreadyApplied,
    /// The transaction's last-valid ledger has passed.
    Expired,

    // Retry: may succeed in a later ledger; eligible for the queue.
    /// The signer's sequence has not yet reached this transaction's.
    FutureSequence,
    /// The signer cannot currently cover the fee.
    InsufficientFeeBalance,
    /// Held in the admission queue.
    Held,

    // ClaimedFee: committed, fee taken, no other effect.
    /// The signer could not cover the payment amount.
    UnfundedPayment,
    /// The payment would create the destination below the base reserve.
    DestinationReserve,
    /// A whole-view invariant failed after the effect ran; the effect was rolled back
    /// and only the fee stands.
    InvariantViolation,

    // Success.
    Applied,
}

/// The ordered severity bands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CodeBand {
    Local,
    Malformed,
    Failed,
    Retry,
    ClaimedFee,
    Success,
}

impl ApplyCode {
    pub fn band(&self) -> CodeBand {
        match self {
            ApplyCode::BadInput
            | ApplyCode::QueueFull
            | ApplyCode::FeeBelowReplacement
            | ApplyCode::Overcommitted => CodeBand::Local,
            ApplyCode::MalformedTransaction
            | ApplyCode::BadSignature
            | ApplyCode::FeeBelowMinimum
            | ApplyCode::ZeroAmount
            | ApplyCode::SelfPayment
            | ApplyCode::FeatureDisabled => CodeBand::Malformed,
            ApplyCode::PastSequence
            | ApplyCode::AccountMissing
            | ApplyCode::AlreadyApplied
            | ApplyCode::Expired => CodeBand::Failed,
            ApplyCode::FutureSequence
            | ApplyCode::InsufficientFeeBalance
            | ApplyCode::Held => CodeBand::Retry,
            ApplyCode::UnfundedPayment
            | ApplyCode::DestinationReserve
            | ApplyCode::InvariantViolation => CodeBand::ClaimedFee,
            ApplyCode::Applied => CodeBand::Success,
        }
    }

    /// Whether a transaction with this code belongs in a committed ledger.
    pub fn in_ledger(&self) -> bool {
        self.band() >= CodeBand::ClaimedFee
    }

    pub fn is_success(&self) -> bool {
        *self == ApplyCode::Applied
    }

    pub fn is_retry(&self) -> bool {
        self.band() == CodeBand::Retry
    }
}

/// Metadata recorded alongside an applied transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct TxMeta {
    /// Accounts whose entries this transaction touched, signer first.
    pub affected: Vec<AccountID>,
    /// Drops actually delivered by a payment.
    pub delivered: Option<Drops>,
    /// Whether the payment created its destination.
    pub created_destination: bool,
}

impl TxMeta {
    pub fn encode(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_order_is_the_contract() {
        assert!(CodeBand::Local < CodeBand::Malformed);
        assert!(CodeBand::Malformed < CodeBand::Failed);
        assert!(CodeBand::Failed < CodeBand::Retry);
        assert!(CodeBand::Retry < CodeBand::ClaimedFee);
        assert!(CodeBand::ClaimedFee < CodeBand::Success);
    }

    #[test]
    fn only_committed_bands_reach_a_ledger() {
        assert!(ApplyCode::Applied.in_ledger());
        assert!(ApplyCode::UnfundedPayment.in_ledger());
        assert!(ApplyCode::InvariantViolation.in_ledger());
        assert!(!ApplyCode::FutureSequence.in_ledger());
        assert!(!ApplyCode::PastSequence.in_ledger());
        assert!(!ApplyCode::BadSignature.in_ledger());
        assert!(!ApplyCode::QueueFull.in_ledger());
    }
}
