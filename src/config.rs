/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration as specified by the operator. This is split up into smaller, subsystem
//! specific config structs before being passed to components.

use std::time::Duration;

use crate::types::basic::Drops;
use crate::types::crypto_primitives::Keypair;
use crate::types::validator_set::TrustedValidators;

/// Top-level configuration of a ledger node.
#[derive(Clone)]
pub struct Configuration {
    pub identity: IdentityConfig,
    pub fees: FeeConfig,
    pub queue: QueueSetup,
    pub consensus: ConsensusSetup,
    /// Threads in the background worker pool (peer fetches, ledger saves).
    pub worker_threads: usize,
}

#[derive(Clone)]
pub struct IdentityConfig {
    pub keypair: Keypair,
    /// Whether this node signs and broadcasts proposals and validations.
    pub is_validator: bool,
    pub trusted_validators: TrustedValidators,
}

/// Fee and reserve parameters in force until a fee-settings entry in state overrides
/// them.
#[derive(Clone, Copy)]
pub struct FeeConfig {
    pub reference_fee: Drops,
    pub reserve_base: Drops,
    pub reserve_increment: Drops,
}

impl Default for FeeConfig {
    fn default() -> Self {
        FeeConfig {
            reference_fee: Drops::new(10),
            reserve_base: Drops::new(200),
            reserve_increment: Drops::new(50),
        }
    }
}

/// Admission queue and fee escalation parameters. The defaults are the values the
/// escalation design was tuned around; change them together or not at all.
#[derive(Clone, Copy)]
pub struct QueueSetup {
    /// The queue holds enough transactions to fill this many ledgers.
    pub ledgers_in_queue: usize,
    /// Replacing a queued transaction requires a fee this many percent higher.
    pub retry_sequence_percent: u32,
    /// Margin over the required level for follow-on transactions of one account in a
    /// single drain pass.
    pub multi_txn_percent: u32,
    pub minimum_escalation_multiplier: u64,
    pub minimum_txn_in_ledger: usize,
    pub minimum_txn_in_ledger_standalone: usize,
    pub target_txn_in_ledger: usize,
    pub maximum_txn_in_ledger: Option<usize>,
    pub standalone: bool,
}

impl Default for QueueSetup {
    fn default() -> Self {
        QueueSetup {
            ledgers_in_queue: 20,
            retry_sequence_percent: 25,
            multi_txn_percent: 25,
            minimum_escalation_multiplier: 500,
            minimum_txn_in_ledger: 5,
            minimum_txn_in_ledger_standalone: 1_000,
            target_txn_in_ledger: 50,
            maximum_txn_in_ledger: None,
            standalone: false,
        }
    }
}

/// Consensus participation parameters that are configuration rather than protocol
/// constants. The protocol constants live in [`crate::consensus::timing`].
#[derive(Clone, Copy)]
pub struct ConsensusSetup {
    /// Percentage of trusted validators whose matching validations fully validate a
    /// ledger.
    pub validation_quorum_percent: u32,
    /// How often the round machine is ticked.
    pub granularity: Duration,
}

impl Default for ConsensusSetup {
    fn default() -> Self {
        ConsensusSetup {
            validation_quorum_percent: 80,
            granularity: Duration::from_secs(1),
        }
    }
}
