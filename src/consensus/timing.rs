/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Protocol timing parameters and close-time arithmetic.
//!
//! These are protocol parameters that control the behavior of the system; they must not
//! be changed arbitrarily, since every node on a network has to run the same values.
//!
//! Close times are binned: instead of perfectly synchronized clocks, nodes agree on a
//! time rounded to the current close-time resolution. The resolution adapts round by
//! round, coarsening while nodes disagree and refining while they agree.

use std::time::Duration;

use crate::types::basic::{CloseResolution, LedgerSeq, NetTime};

/// All possible close time resolutions, finest first. Values must not repeat.
pub const RESOLUTIONS: [CloseResolution; 6] = [
    CloseResolution::new(10),
    CloseResolution::new(20),
    CloseResolution::new(30),
    CloseResolution::new(60),
    CloseResolution::new(90),
    CloseResolution::new(120),
];

/// Initial resolution of ledger close time.
pub const DEFAULT_RESOLUTION: CloseResolution = RESOLUTIONS[2];

/// How often (in rounds) the close time resolution may coarsen after disagreement.
pub const INCREASE_RESOLUTION_EVERY: u32 = 8;

/// How often (in rounds) the close time resolution may refine after agreement.
pub const DECREASE_RESOLUTION_EVERY: u32 = 1;

/// How long a ledger may remain idle before closing anyway.
pub const LEDGER_IDLE_INTERVAL: Duration = Duration::from_secs(15);

/// Minimum time a ledger stays open, to ensure participation.
pub const LEDGER_MIN_CLOSE: Duration = Duration::from_secs(2);

/// Minimum time spent establishing before consensus can be declared.
pub const LEDGER_MIN_CONSENSUS: Duration = Duration::from_secs(2);

/// How often the round machine checks state and possibly changes position.
pub const LEDGER_GRANULARITY: Duration = Duration::from_secs(1);

/// How long a proposal stays fresh.
pub const PROPOSE_FRESHNESS: Duration = Duration::from_secs(20);

/// How often a new proposal is forced out to keep ours fresh.
pub const PROPOSE_INTERVAL: Duration = Duration::from_secs(12);

/// A round stuck establishing this long gives up and marks the node desynced.
pub const LEDGER_FORCE_CONVERGE: Duration = Duration::from_secs(120);

// Per-transaction vote threshold schedule. Elapsed time is measured against the
// previous round's duration; the threshold escalates as the round ages so that
// disputed transactions fall out rather than stall the network.

/// Initial percentage of peers that must agree to keep a transaction.
pub const AV_INIT_CONSENSUS_PCT: u32 = 50;

/// Percentage of the previous round's duration after which the mid threshold applies.
pub const AV_MID_CONSENSUS_TIME: u32 = 50;
pub const AV_MID_CONSENSUS_PCT: u32 = 65;

/// Percentage of the previous round's duration after which the late threshold applies.
pub const AV_LATE_CONSENSUS_TIME: u32 = 85;
pub const AV_LATE_CONSENSUS_PCT: u32 = 70;

/// Past this multiple of the previous round's duration, the round is stuck.
pub const AV_STUCK_CONSENSUS_TIME: u32 = 200;
pub const AV_STUCK_CONSENSUS_PCT: u32 = 95;

/// Percentage of peers that must land in one close-time bin.
pub const AV_CT_CONSENSUS_PCT: u32 = 75;

/// The minimum duration to consider the previous round to have taken, so every
/// threshold phase gets a chance even after a very fast round.
pub const AV_MIN_CONSENSUS_TIME: Duration = Duration::from_secs(5);

/// Percentage of recent peers that must propose a matching set for consensus.
pub const MINIMUM_CONSENSUS_PCT: u32 = 80;

/// How long a validation stays current past its signing time.
pub const VALIDATION_VALID_WALL: u32 = 300;

/// How long a validation stays usable past the time we first saw it.
pub const VALIDATION_VALID_LOCAL: u32 = 180;

/// How far in the future a validation's signing time may be, guarding clock errors.
pub const VALIDATION_VALID_EARLY: u32 = 180;

/// A close-to-close wall gap exceeding the close resolution by more than this reads as
/// the node being under load; fee capacity expectations snap to their target.
pub const TIME_LEAP_GAP: u32 = 20;

/// The per-transaction yes-vote threshold for a round that has been establishing for
/// `elapsed`, given the previous round's duration.
///
/// Comparisons against the returned percentage are strict: a transaction needs strictly
/// more than `threshold` percent of yes votes to stay in the working set.
pub fn threshold_percent(elapsed: Duration, previous_round: Duration) -> u32 {
    let reference = previous_round.max(AV_MIN_CONSENSUS_TIME);
    let elapsed_pct = (elapsed.as_millis() * 100 / reference.as_millis().max(1)) as u32;
    if elapsed_pct < AV_MID_CONSENSUS_TIME {
        AV_INIT_CONSENSUS_PCT
    } else if elapsed_pct < AV_LATE_CONSENSUS_TIME {
        AV_MID_CONSENSUS_PCT
    } else if elapsed_pct < AV_STUCK_CONSENSUS_TIME {
        AV_LATE_CONSENSUS_PCT
    } else {
        AV_STUCK_CONSENSUS_PCT
    }
}

/// The resolution for the round building `seq`, adapted from the previous round.
///
/// Disagreement coarsens the resolution (every [`INCREASE_RESOLUTION_EVERY`] rounds),
/// agreement refines it (every [`DECREASE_RESOLUTION_EVERY`] rounds). The result never
/// leaves the [`RESOLUTIONS`] table.
pub fn next_resolution(
    previous: CloseResolution,
    previous_agree: bool,
    seq: LedgerSeq,
) -> CloseResolution {
    let index = RESOLUTIONS
        .iter()
        .position(|resolution| *resolution == previous)
        .unwrap_or(2);
    if !previous_agree && seq.int() % INCREASE_RESOLUTION_EVERY == 0 {
        RESOLUTIONS[(index + 1).min(RESOLUTIONS.len() - 1)]
    } else if previous_agree && seq.int() % DECREASE_RESOLUTION_EVERY == 0 {
        RESOLUTIONS[index.saturating_sub(1)]
    } else {
        previous
    }
}

/// Round `time` up to a multiple of `resolution`.
pub fn round_close_time(time: NetTime, resolution: CloseResolution) -> NetTime {
    let step = resolution.secs() as u32;
    if step == 0 {
        return time;
    }
    NetTime::new(time.int().div_ceil(step).saturating_mul(step))
}

/// The close time the child ledger carries when the round agreed on `voted`.
///
/// Rounded up to the resolution, but always strictly after the parent's close time so
/// ledger times stay monotone.
pub fn effective_close_time(
    voted: NetTime,
    resolution: CloseResolution,
    parent_close: NetTime,
) -> NetTime {
    let rounded = round_close_time(voted, resolution);
    if rounded <= parent_close {
        parent_close.saturating_add_secs(1)
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_schedule_escalates() {
        let previous = Duration::from_secs(6);
        assert_eq!(threshold_percent(Duration::ZERO, previous), 50);
        assert_eq!(threshold_percent(Duration::from_secs(4), previous), 65);
        assert_eq!(threshold_percent(Duration::from_secs(11), previous), 70);
        assert_eq!(threshold_percent(Duration::from_secs(13), previous), 95);
    }

    #[test]
    fn fast_previous_rounds_are_floored() {
        // A one-second previous round still walks through every phase on the
        // five-second floor.
        let previous = Duration::from_secs(1);
        assert_eq!(threshold_percent(Duration::from_secs(2), previous), 50);
        assert_eq!(threshold_percent(Duration::from_secs(3), previous), 65);
        assert_eq!(threshold_percent(Duration::from_secs(10), previous), 95);
    }

    #[test]
    fn resolution_never_leaves_the_table() {
        let mut resolution = DEFAULT_RESOLUTION;
        // Sustained agreement refines to the floor and stays.
        for seq in 2..40u32 {
            resolution = next_resolution(resolution, true, LedgerSeq::new(seq));
            assert!(RESOLUTIONS.contains(&resolution));
        }
        assert_eq!(resolution, RESOLUTIONS[0]);
        // Sustained disagreement coarsens to the ceiling and stays.
        for seq in 40..200u32 {
            resolution = next_resolution(resolution, false, LedgerSeq::new(seq));
            assert!(RESOLUTIONS.contains(&resolution));
        }
        assert_eq!(resolution, RESOLUTIONS[RESOLUTIONS.len() - 1]);
    }

    #[test]
    fn close_times_round_up_and_stay_monotone() {
        let resolution = CloseResolution::new(30);
        assert_eq!(
            round_close_time(NetTime::new(61), resolution),
            NetTime::new(90)
        );
        assert_eq!(
            round_close_time(NetTime::new(90), resolution),
            NetTime::new(90)
        );
        // A voted time at or before the parent close still moves forward.
        assert_eq!(
            effective_close_time(NetTime::new(60), resolution, NetTime::new(90)),
            NetTime::new(91)
        );
    }
}
