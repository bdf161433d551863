/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fee escalation metrics.
//!
//! [`FeeMetrics`] tracks two scalars derived from recent closed ledgers: how many
//! transactions a ledger is expected to carry, and the escalation multiplier derived from
//! the median fee level of the last closed ledger. Together they price entry into the
//! open ledger: below capacity everything at the base level gets in, above capacity the
//! required level grows with the square of the open count. The quadratic wall is the
//! point: once a ledger is past its expected size, a small fee bump decides inclusion.
//!
//! Both scalars sit behind one short mutex, per the concurrency rules of the core.

use std::sync::Mutex;

use log;

use crate::config::QueueSetup;
use crate::types::basic::FeeLevel;

/// Escalation state, updated once per accepted ledger.
pub struct FeeMetrics {
    /// Floor of `txns_expected`.
    minimum_txn_count: usize,
    /// Where `txns_expected` lands after a time leap.
    target_txn_count: usize,
    /// Hard cap of `txns_expected` on the growth path, if configured.
    maximum_txn_count: Option<usize>,
    /// Floor of the escalation multiplier.
    minimum_multiplier: u64,
    state: Mutex<MetricsState>,
}

struct MetricsState {
    txns_expected: usize,
    escalation_multiplier: u64,
}

impl FeeMetrics {
    pub fn new(setup: &QueueSetup) -> FeeMetrics {
        let minimum_txn_count = if setup.standalone {
            setup.minimum_txn_in_ledger_standalone
        } else {
            setup.minimum_txn_in_ledger
        };
        let target_txn_count = setup.target_txn_in_ledger.max(minimum_txn_count);
        let maximum_txn_count = setup
            .maximum_txn_in_ledger
            .map(|max| max.max(target_txn_count));
        FeeMetrics {
            minimum_txn_count,
            target_txn_count,
            maximum_txn_count,
            minimum_multiplier: setup.minimum_escalation_multiplier,
            state: Mutex::new(MetricsState {
                txns_expected: minimum_txn_count,
                escalation_multiplier: setup.minimum_escalation_multiplier,
            }),
        }
    }

    pub fn txns_expected(&self) -> usize {
        self.state.lock().unwrap().txns_expected
    }

    pub fn escalation_multiplier(&self) -> u64 {
        self.state.lock().unwrap().escalation_multiplier
    }

    /// Update both scalars from the ledger that just closed.
    ///
    /// `applied_levels` are the fee levels of the transactions it carried; `time_leap`
    /// flags a close that took abnormally long, meaning the node is under load and
    /// capacity expectations should snap to the target rather than keep growing.
    pub fn update_on_close(&self, applied_levels: &[FeeLevel], time_leap: bool) {
        let n = applied_levels.len();
        let mut state = self.state.lock().unwrap();

        if time_leap {
            state.txns_expected = state
                .txns_expected
                .max(n)
                .min(self.target_txn_count)
                .max(self.minimum_txn_count);
        } else if n > state.txns_expected {
            let mut grown = if state.txns_expected < self.target_txn_count {
                // Expand multiplicatively: halve the remaining distance to the target.
                let distance = self.target_txn_count - state.txns_expected;
                (state.txns_expected + distance.div_ceil(2)).max(n.min(self.target_txn_count))
            } else {
                n
            };
            if let Some(max) = self.maximum_txn_count {
                grown = grown.min(max);
            }
            state.txns_expected = grown;
        } else if n < state.txns_expected / 4 {
            // Sustained low traffic; contract toward the floor.
            state.txns_expected = (state.txns_expected / 2).max(self.minimum_txn_count);
        }

        if !applied_levels.is_empty() {
            let mut levels: Vec<u64> =
                applied_levels.iter().map(|level| level.int()).collect();
            levels.sort_unstable();
            // Even counts average the two middle values, rounding up.
            let median = if levels.len() % 2 == 1 {
                levels[levels.len() / 2]
            } else {
                let low = levels[levels.len() / 2 - 1];
                let high = levels[levels.len() / 2];
                low / 2 + high / 2 + (low % 2 + high % 2 + 1) / 2
            };
            state.escalation_multiplier = median.max(self.minimum_multiplier);
        }

        log::debug!(
            "FeeMetrics, {}, {}, {}",
            n,
            state.txns_expected,
            state.escalation_multiplier
        );
    }

    /// The fee level required to enter an open ledger already carrying `open_count`
    /// transactions.
    ///
    /// At or below capacity this is the base level. Past capacity it is
    /// `base · multiplier · open_count² / txns_expected²`, saturating on `u64`. Within
    /// one open view this is monotonically non-decreasing as applies accumulate.
    pub fn required_level(&self, open_count: usize) -> FeeLevel {
        let state = self.state.lock().unwrap();
        if open_count <= state.txns_expected {
            return FeeLevel::BASE;
        }
        let count = open_count as u64;
        let expected = state.txns_expected.max(1) as u64;
        let scaled = FeeLevel::BASE
            .int()
            .saturating_mul(state.escalation_multiplier)
            .saturating_mul(count.saturating_mul(count))
            .checked_div(expected.saturating_mul(expected))
            .unwrap_or(u64::MAX);
        FeeLevel::new(scaled)
    }
}
