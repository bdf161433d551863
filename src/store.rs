/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines the [`NodeStore`] trait, the content-addressed blob store provided by the user.
//!
//! The state trie flushes newly materialized nodes into the store and fetches stub
//! children back out of it by hash. Because keys are digests of values, `put` is
//! idempotent and the store never needs a delete at this level; pruning is a background
//! concern outside the ledger core.
//!
//! [`MemStore`] is the volatile implementation used by a standalone node and by the test
//! suite. Production deployments implement `NodeStore` over their durable store of choice.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::types::hash::Hash256;

/// A content-addressed store of serialized trie nodes.
///
/// Implementations must be cheaply cloneable handles onto shared storage; every clone
/// observes every `put`. Handles are shared across the node's threads.
pub trait NodeStore: Clone + Send + Sync + 'static {
    /// Store `bytes` under `hash`. Idempotent: storing the same hash twice is a no-op.
    ///
    /// The caller guarantees that `hash` is the digest of `bytes` under the trie's hash
    /// rule; implementations may verify and panic on a mismatch, since a store that lies
    /// about content addresses cannot be recovered from.
    fn put(&self, hash: Hash256, bytes: Vec<u8>);

    /// Fetch the bytes stored under `hash`, if present.
    ///
    /// A `None` from a store backed by remote fetching means the deadline expired; the
    /// caller surfaces this as a missing-node error and may retry.
    fn get(&self, hash: &Hash256) -> Option<Vec<u8>>;

    fn has(&self, hash: &Hash256) -> bool;
}

/// A simple, volatile, in-memory implementation of [`NodeStore`].
#[derive(Clone, Default)]
pub struct MemStore(Arc<Mutex<HashMap<Hash256, Vec<u8>>>>);

impl MemStore {
    /// Create a new, empty `MemStore`.
    pub fn new() -> MemStore {
        MemStore(Arc::new(Mutex::new(HashMap::new())))
    }

    /// Number of distinct nodes stored.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }
}

impl NodeStore for MemStore {
    fn put(&self, hash: Hash256, bytes: Vec<u8>) {
        self.0.lock().unwrap().entry(hash).or_insert(bytes);
    }

    fn get(&self, hash: &Hash256) -> Option<Vec<u8>> {
        self.0.lock().unwrap().get(hash).cloned()
    }

    fn has(&self, hash: &Hash256) -> bool {
        self.0.lock().unwrap().contains_key(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_idempotent() {
        let store = MemStore::new();
        let hash = Hash256::new([1u8; 32]);
        store.put(hash, vec![1, 2, 3]);
        store.put(hash, vec![1, 2, 3]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&hash), Some(vec![1, 2, 3]));
        assert!(store.has(&hash));
    }

    #[test]
    fn clones_share_storage() {
        let store = MemStore::new();
        let other = store.clone();
        let hash = Hash256::new([2u8; 32]);
        store.put(hash, vec![9]);
        assert_eq!(other.get(&hash), Some(vec![9]));
    }
}
