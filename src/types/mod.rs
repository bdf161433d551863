/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types common across the subsystems of the ledger core.
//!
//! Types specific to one subsystem live with that subsystem; what is here is either inert
//! (newtypes in [`basic`]), cryptographic ([`hash`], [`crypto_primitives`]), or shared by
//! at least two subsystems ([`transaction`], [`validator_set`]).

pub mod basic;

pub mod crypto_primitives;

pub mod hash;

pub mod transaction;

pub mod validator_set;
