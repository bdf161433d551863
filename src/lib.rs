/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust library for round-based BFT ledger replication with authenticated state tries
//! and fee-escalating transaction admission.
//!
//! Concord-rs implements the correctness-critical nucleus of a distributed-ledger node:
//!
//! - an immutable [ledger](crate::ledger) object whose self-hash commits to a fixed-size
//!   header, chained by parent hash and registered in an append-only
//!   [chain](crate::ledger::chain);
//! - an authenticated radix-16 [state trie](crate::trie) with copy-on-write snapshots,
//!   committing to all account state and per-ledger transaction sets;
//! - a deterministic [apply](crate::apply) pipeline with an ordered result-code band
//!   contract and whole-view invariant checks;
//! - [fee escalation](crate::fees) and a two-index [admission queue](crate::queue) that
//!   price entry into the open ledger quadratically past capacity;
//! - a round-based [consensus](crate::consensus) engine that converges on one transaction
//!   set and close time per round, plus validation tracking that turns accepted ledgers
//!   into fully validated ones;
//! - the ambient machinery of a node: pluggable [storage](crate::store) and
//!   [networking](crate::networking), an injectable [clock](crate::clock), an
//!   [amendment switch](crate::amendments), [events](crate::events) with a bus and
//!   default log handlers, a priority-classed [job pool](crate::jobs), and the
//!   [node](crate::node) wiring itself.
//!
//! The out-of-process collaborators (the RPC surface, the relational store, gossip and
//! peer discovery, key provisioning) are deliberately behind traits; this crate contains
//! no I/O beyond what its callers plug in.

pub mod amendments;

pub mod apply;

pub mod clock;

pub mod config;

pub mod consensus;

pub mod event_bus;

pub mod events;

pub mod fees;

pub mod jobs;

pub mod ledger;

pub mod logging;

pub mod networking;

pub mod node;

pub mod queue;

pub mod store;

pub mod trie;

pub mod types;

// Re-exports of the types most callers touch.
pub use config::Configuration;
pub use ledger::ledger::Ledger;
pub use node::LedgerNode;
pub use store::{MemStore, NodeStore};
pub use types::hash::Hash256;
