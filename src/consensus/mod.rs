/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The round-based consensus engine.
//!
//! Each round converges on one transaction set and one close time for the next ledger.
//! A round moves through three phases: **open** (collecting transactions), **establish**
//! (exchanging proposals, with per-transaction vote thresholds that escalate over the
//! round's life), and **accepted** (terminal). Validations are a separate, lower
//! frequency message stream that turns accepted ledgers into fully validated ones.
//!
//! - [`timing`]: protocol constants and close-time arithmetic
//! - [`types`]: proposals, candidate sets, dispute bookkeeping
//! - [`round`]: the per-round state machine
//! - [`validation`]: validation messages and quorum tracking

pub mod round;

pub mod timing;

pub mod types;

pub mod validation;
