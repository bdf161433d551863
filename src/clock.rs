/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The single injectable time source.
//!
//! All state-affecting computation must be reproducible across machines, so no subsystem
//! reads the system clock directly. Round timing uses the monotonic [`Instant`] side;
//! close-time voting and validation windows use the [`NetTime`] wall side (seconds since
//! 2000-01-01 00:00:00 UTC). Tests drive a [`ManualClock`] forward explicitly.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use crate::types::basic::NetTime;

/// Seconds between the Unix epoch and 2000-01-01 00:00:00 UTC.
const NETWORK_EPOCH_OFFSET: u64 = 946_684_800;

/// The time source threaded through every subsystem that needs one.
pub trait Clock: Clone + Send + 'static {
    /// A monotonic reading for measuring durations. Never goes backwards.
    fn instant(&self) -> Instant;

    /// The wall clock in network representation.
    fn network_time(&self) -> NetTime;
}

/// The production clock.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn instant(&self) -> Instant {
        Instant::now()
    }

    fn network_time(&self) -> NetTime {
        let since_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is set before the Unix epoch");
        NetTime::new(since_unix.as_secs().saturating_sub(NETWORK_EPOCH_OFFSET) as u32)
    }
}

/// A clock that only moves when told to. Clones share the same underlying time.
#[derive(Clone)]
pub struct ManualClock {
    base: Instant,
    state: Arc<Mutex<ManualClockState>>,
}

struct ManualClockState {
    elapsed: Duration,
    wall: NetTime,
}

impl ManualClock {
    /// A clock starting at the given network time with zero monotonic elapsed time.
    pub fn starting_at(wall: NetTime) -> ManualClock {
        ManualClock {
            base: Instant::now(),
            state: Arc::new(Mutex::new(ManualClockState {
                elapsed: Duration::ZERO,
                wall,
            })),
        }
    }

    /// Advance both the monotonic and wall sides by `duration`. Sub-second wall precision
    /// is dropped, matching the network time representation.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        state.elapsed += duration;
        state.wall = state.wall.saturating_add_secs(duration.as_secs() as u32);
    }
}

impl Clock for ManualClock {
    fn instant(&self) -> Instant {
        self.base + self.state.lock().unwrap().elapsed
    }

    fn network_time(&self) -> NetTime {
        self.state.lock().unwrap().wall
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::starting_at(NetTime::new(1_000));
        let before = clock.instant();
        assert_eq!(clock.network_time(), NetTime::new(1_000));

        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.network_time(), NetTime::new(1_030));
        assert_eq!(clock.instant() - before, Duration::from_secs(30));
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::starting_at(NetTime::ZERO);
        let clone = clock.clone();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clone.network_time(), NetTime::new(5));
    }
}
