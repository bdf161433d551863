/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The immutable ledger, the open view that builds the next one, and the chain registry.
//!
//! The lifecycle per consensus round: an [`OpenView`](open_view::OpenView) is created over
//! the previous ledger, the agreed transaction set is replayed onto it, and committing the
//! view seals a new [`Ledger`](ledger::Ledger) which the [`LedgerChain`](chain::LedgerChain)
//! records. Ledgers are immutable after sealing and may be held as long as any consumer
//! references them.

pub mod chain;

pub mod entry;

pub mod header;

#[allow(clippy::module_inception)]
pub mod ledger;

pub mod open_view;
