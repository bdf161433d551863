/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The authenticated prefix trie that commits to account state and transaction sets.
//!
//! [`StateTrie`] maintains a mapping from 256-bit keys to opaque byte blobs as a radix-16
//! trie indexed by successive hex nibbles of the key. Its single root hash commits to the
//! full contents: tampering with any entry, anywhere, changes the root.
//!
//! ## Copy-on-write snapshots
//!
//! [`snapshot`](StateTrie::snapshot) returns an independent handle sharing every node by
//! reference count. The first mutation through either handle copies only the path from the
//! root to the mutation point, so a sealed ledger's trie and the open view built on top of
//! it share all unmodified subtrees. Readers never observe a mutation in place; a handle's
//! contents only change through that handle.
//!
//! ## Residency
//!
//! Nodes do not have to be resident. A non-resident child is a stub carrying only its
//! hash; the trie resolves stubs through the [`NodeStore`](crate::store::NodeStore) as
//! operations reach them. A stub whose body the store cannot produce surfaces as
//! [`TrieError::MissingNode`], which is recoverable: the caller may fetch the node from
//! peers, put it in the store, and retry. Bytes that do not hash to their claimed key
//! surface as [`TrieError::Corruption`] and are not recoverable.

mod node;

mod tree;

pub use tree::StateTrie;

use crate::types::hash::Hash256;

/// Ways an operation on a [`StateTrie`] can fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrieError {
    /// A node needed by the operation is not resident and the node store could not
    /// produce its body. Recoverable: acquire the node and retry.
    MissingNode(Hash256),

    /// The operation requires the key to be present, and it is not.
    KeyNotFound(Hash256),

    /// The node store returned bytes that do not hash to the requested content address.
    /// Not recoverable; the caller should halt rather than propagate bad state.
    Corruption(Hash256),
}

impl std::fmt::Display for TrieError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrieError::MissingNode(hash) => write!(f, "trie node {} is not available", hash),
            TrieError::KeyNotFound(key) => write!(f, "key {} is not in the trie", key),
            TrieError::Corruption(hash) => {
                write!(f, "stored bytes do not hash to claimed key {}", hash)
            }
        }
    }
}
