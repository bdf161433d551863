/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`StateTrie`] handle and its operations.

use std::sync::Arc;

use crate::store::NodeStore;
use crate::types::hash::Hash256;

use super::node::{
    decode_node, inner_wire_bytes, leaf_wire_bytes, Child, InnerNode, LeafNode, TrieNode,
};
use super::TrieError;

/// A handle onto one version of an authenticated key-value mapping.
///
/// Cloning the handle is not a snapshot; use [`snapshot`](Self::snapshot) to branch.
pub struct StateTrie<S: NodeStore> {
    store: S,
    root: Arc<TrieNode>,
}

impl<S: NodeStore> StateTrie<S> {
    /// An empty trie backed by `store`.
    pub fn new(store: S) -> StateTrie<S> {
        StateTrie {
            store,
            root: Arc::new(TrieNode::Inner(InnerNode::empty())),
        }
    }

    /// Reconstruct a handle from a previously flushed root hash.
    ///
    /// The zero hash denotes the empty trie. Otherwise the root node itself must be
    /// producible by the store; descendants may remain stubs until reached.
    pub fn from_root(store: S, root_hash: Hash256) -> Result<StateTrie<S>, TrieError> {
        if root_hash.is_zero() {
            return Ok(Self::new(store));
        }
        let root = fetch_node(&store, root_hash)?;
        Ok(StateTrie {
            store,
            root: Arc::new(root),
        })
    }

    /// An independent handle sharing all nodes with this one by reference count.
    ///
    /// Mutating either handle afterwards copies only the path from the root down to the
    /// mutation point.
    pub fn snapshot(&self) -> StateTrie<S> {
        StateTrie {
            store: self.store.clone(),
            root: self.root.clone(),
        }
    }

    /// Look up the value stored under `key`.
    ///
    /// Stubs along the path are resolved transiently and not cached, so lookups never
    /// copy shared structure.
    pub fn get(&self, key: &Hash256) -> Result<Option<Vec<u8>>, TrieError> {
        let mut owned: Arc<TrieNode> = self.root.clone();
        let mut depth = 0;
        loop {
            match &*owned {
                TrieNode::Leaf(leaf) => {
                    return Ok((leaf.key == *key).then(|| leaf.value.clone()));
                }
                TrieNode::Inner(inner) => {
                    let next = match &inner.children[key.nibble(depth) as usize] {
                        Child::Empty => return Ok(None),
                        Child::Stub(hash) => Arc::new(fetch_node(&self.store, *hash)?),
                        Child::Node(node) => node.clone(),
                    };
                    owned = next;
                    depth += 1;
                }
            }
        }
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &Hash256) -> Result<bool, TrieError> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert `value` under `key`, overwriting any existing value.
    pub fn insert(&mut self, key: Hash256, value: Vec<u8>) -> Result<(), TrieError> {
        insert_at(&self.store, &mut self.root, key, value, 0)
    }

    /// Overwrite the value under `key`, which must already be present.
    pub fn replace(&mut self, key: Hash256, value: Vec<u8>) -> Result<(), TrieError> {
        if !self.contains(&key)? {
            return Err(TrieError::KeyNotFound(key));
        }
        self.insert(key, value)
    }

    /// Remove the entry under `key`, which must be present. Inner nodes left with a
    /// single leaf descendant collapse so the trie keeps its canonical shape.
    pub fn erase(&mut self, key: &Hash256) -> Result<(), TrieError> {
        if !self.contains(key)? {
            return Err(TrieError::KeyNotFound(*key));
        }
        erase_at(&self.store, &mut self.root, key, 0)?;
        Ok(())
    }

    /// The smallest key strictly greater than `key`, if any. Drives ordered directory
    /// iteration.
    pub fn successor(&self, key: &Hash256) -> Result<Option<Hash256>, TrieError> {
        successor_at(&self.store, &self.root, key, 0)
    }

    /// Recompute the root hash, lazily rehashing only mutated subtrees, and flush every
    /// newly materialized node to the node store.
    ///
    /// The hash of an empty trie is the zero sentinel.
    pub fn hash(&mut self) -> Hash256 {
        if let TrieNode::Inner(inner) = &*self.root {
            if inner.child_count() == 0 {
                return Hash256::ZERO;
            }
        }
        flush_at(&self.store, &mut self.root)
    }

    /// The root hash as of the last [`hash`](Self::hash), without recomputing.
    ///
    /// `None` means the trie was mutated since (or never hashed). An empty trie always
    /// reports the zero sentinel.
    pub fn cached_root(&self) -> Option<Hash256> {
        if let TrieNode::Inner(inner) = &*self.root {
            if inner.child_count() == 0 {
                return Some(Hash256::ZERO);
            }
        }
        self.root.cached_hash()
    }

    /// The store this trie resolves stubs through.
    pub fn store(&self) -> &S {
        &self.store
    }
}

fn fetch_node<S: NodeStore>(store: &S, hash: Hash256) -> Result<TrieNode, TrieError> {
    let bytes = store.get(&hash).ok_or(TrieError::MissingNode(hash))?;
    decode_node(&bytes, hash)
}

/// Resolve the child slot in place if it is a stub. The caller has already copied the
/// parent for mutation, so caching the resolved node here is free.
fn resolve_slot<S: NodeStore>(store: &S, slot: &mut Child) -> Result<(), TrieError> {
    if let Child::Stub(hash) = slot {
        let node = fetch_node(store, *hash)?;
        *slot = Child::Node(Arc::new(node));
    }
    Ok(())
}

fn insert_at<S: NodeStore>(
    store: &S,
    node_arc: &mut Arc<TrieNode>,
    key: Hash256,
    value: Vec<u8>,
    depth: usize,
) -> Result<(), TrieError> {
    let node = Arc::make_mut(node_arc);
    match node {
        TrieNode::Inner(inner) => {
            inner.cached_hash = None;
            let idx = key.nibble(depth) as usize;
            resolve_slot(store, &mut inner.children[idx])?;
            if inner.children[idx].is_empty() {
                inner.children[idx] =
                    Child::Node(Arc::new(TrieNode::Leaf(LeafNode::new(key, value))));
                return Ok(());
            }
            let Child::Node(child) = &mut inner.children[idx] else {
                unreachable!("slot was resolved above");
            };
            insert_at(store, child, key, value, depth + 1)
        }
        TrieNode::Leaf(leaf) => {
            if leaf.key == key {
                leaf.value = value;
                leaf.cached_hash = None;
                return Ok(());
            }
            // Collision with a different key: split by introducing inner nodes down to
            // the first differing nibble.
            let existing = Arc::new(TrieNode::Leaf(leaf.clone()));
            let existing_key = leaf.key;
            let mut split_depth = depth;
            while key.nibble(split_depth) == existing_key.nibble(split_depth) {
                split_depth += 1;
            }
            let mut bottom = InnerNode::empty();
            bottom.children[existing_key.nibble(split_depth) as usize] = Child::Node(existing);
            bottom.children[key.nibble(split_depth) as usize] =
                Child::Node(Arc::new(TrieNode::Leaf(LeafNode::new(key, value))));
            let mut acc = TrieNode::Inner(bottom);
            for d in (depth..split_depth).rev() {
                let mut inner = InnerNode::empty();
                inner.children[key.nibble(d) as usize] = Child::Node(Arc::new(acc));
                acc = TrieNode::Inner(inner);
            }
            *node_arc = Arc::new(acc);
            Ok(())
        }
    }
}

/// Remove `key` from the inner node at `node_arc`. The caller has verified presence.
fn erase_at<S: NodeStore>(
    store: &S,
    node_arc: &mut Arc<TrieNode>,
    key: &Hash256,
    depth: usize,
) -> Result<(), TrieError> {
    let node = Arc::make_mut(node_arc);
    let TrieNode::Inner(inner) = node else {
        return Err(TrieError::KeyNotFound(*key));
    };
    inner.cached_hash = None;
    let idx = key.nibble(depth) as usize;
    resolve_slot(store, &mut inner.children[idx])?;
    let leaf_is_here = match &inner.children[idx] {
        Child::Empty | Child::Stub(_) => return Err(TrieError::KeyNotFound(*key)),
        Child::Node(child) => match &**child {
            TrieNode::Leaf(leaf) if leaf.key == *key => true,
            TrieNode::Leaf(_) => return Err(TrieError::KeyNotFound(*key)),
            TrieNode::Inner(_) => false,
        },
    };
    if leaf_is_here {
        inner.children[idx] = Child::Empty;
    } else {
        let Child::Node(child) = &mut inner.children[idx] else {
            unreachable!("slot holds a resolved inner node");
        };
        erase_at(store, child, key, depth + 1)?;
    }
    // Canonical shape: a non-root inner node reduced to a single leaf descendant is
    // replaced by that leaf, recursively up the return path.
    let mut lifted = None;
    if depth > 0 && inner.child_count() == 1 {
        let only = inner
            .children
            .iter_mut()
            .find(|c| !c.is_empty())
            .expect("child_count() == 1");
        resolve_slot(store, only)?;
        if let Child::Node(child) = only {
            if matches!(&**child, TrieNode::Leaf(_)) {
                lifted = Some(child.clone());
            }
        }
    }
    if let Some(leaf) = lifted {
        *node_arc = leaf;
    }
    Ok(())
}

fn successor_at<S: NodeStore>(
    store: &S,
    node: &TrieNode,
    key: &Hash256,
    depth: usize,
) -> Result<Option<Hash256>, TrieError> {
    match node {
        // Every key under this node shares the path prefix, so a leaf here is the only
        // candidate in this subtree.
        TrieNode::Leaf(leaf) => Ok((leaf.key > *key).then(|| leaf.key)),
        TrieNode::Inner(inner) => {
            let idx = key.nibble(depth) as usize;
            match &inner.children[idx] {
                Child::Empty => {}
                Child::Stub(hash) => {
                    let child = fetch_node(store, *hash)?;
                    if let Some(found) = successor_at(store, &child, key, depth + 1)? {
                        return Ok(Some(found));
                    }
                }
                Child::Node(child) => {
                    if let Some(found) = successor_at(store, child, key, depth + 1)? {
                        return Ok(Some(found));
                    }
                }
            }
            for slot in &inner.children[idx + 1..] {
                match slot {
                    Child::Empty => continue,
                    Child::Stub(hash) => {
                        let child = fetch_node(store, *hash)?;
                        return min_leaf(store, &child).map(Some);
                    }
                    Child::Node(child) => return min_leaf(store, child).map(Some),
                }
            }
            Ok(None)
        }
    }
}

/// The smallest key in a non-empty subtree.
fn min_leaf<S: NodeStore>(store: &S, node: &TrieNode) -> Result<Hash256, TrieError> {
    match node {
        TrieNode::Leaf(leaf) => Ok(leaf.key),
        TrieNode::Inner(inner) => {
            for slot in &inner.children {
                match slot {
                    Child::Empty => continue,
                    Child::Stub(hash) => {
                        let child = fetch_node(store, *hash)?;
                        return min_leaf(store, &child);
                    }
                    Child::Node(child) => return min_leaf(store, child),
                }
            }
            // Canonical tries have no childless inner nodes below the root.
            Err(TrieError::KeyNotFound(Hash256::ZERO))
        }
    }
}

/// Hash the subtree at `node_arc` bottom-up, writing every node hashed here to the store.
/// Nodes with a cached hash were already persisted in that form and are skipped.
fn flush_at<S: NodeStore>(store: &S, node_arc: &mut Arc<TrieNode>) -> Hash256 {
    if let Some(hash) = node_arc.cached_hash() {
        return hash;
    }
    let node = Arc::make_mut(node_arc);
    match node {
        TrieNode::Leaf(leaf) => {
            let hash = leaf.compute_hash();
            store.put(hash, leaf_wire_bytes(leaf));
            leaf.cached_hash = Some(hash);
            hash
        }
        TrieNode::Inner(inner) => {
            let mut child_hashes = [Hash256::ZERO; 16];
            for (i, slot) in inner.children.iter_mut().enumerate() {
                child_hashes[i] = match slot {
                    Child::Empty => Hash256::ZERO,
                    Child::Stub(hash) => *hash,
                    Child::Node(child) => flush_at(store, child),
                };
            }
            let hash = InnerNode::compute_hash(&child_hashes);
            store.put(hash, inner_wire_bytes(&child_hashes));
            inner.cached_hash = Some(hash);
            hash
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn key(fill: u8) -> Hash256 {
        Hash256::new([fill; 32])
    }

    /// Two keys sharing the first three nibbles.
    fn colliding_keys() -> (Hash256, Hash256) {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 0xab;
        b[0] = 0xab;
        a[1] = 0xc1;
        b[1] = 0xc2;
        (Hash256::new(a), Hash256::new(b))
    }

    #[test]
    fn get_after_put_and_erase() {
        let mut trie = StateTrie::new(MemStore::new());
        trie.insert(key(1), vec![1]).unwrap();
        assert_eq!(trie.get(&key(1)).unwrap(), Some(vec![1]));

        trie.insert(key(1), vec![2]).unwrap();
        assert_eq!(trie.get(&key(1)).unwrap(), Some(vec![2]));

        trie.erase(&key(1)).unwrap();
        assert_eq!(trie.get(&key(1)).unwrap(), None);
        assert_eq!(trie.erase(&key(1)), Err(TrieError::KeyNotFound(key(1))));
    }

    #[test]
    fn replace_requires_presence() {
        let mut trie = StateTrie::new(MemStore::new());
        assert_eq!(
            trie.replace(key(3), vec![9]),
            Err(TrieError::KeyNotFound(key(3)))
        );
        trie.insert(key(3), vec![1]).unwrap();
        trie.replace(key(3), vec![9]).unwrap();
        assert_eq!(trie.get(&key(3)).unwrap(), Some(vec![9]));
    }

    #[test]
    fn colliding_keys_split_and_collapse() {
        let (a, b) = colliding_keys();
        let mut trie = StateTrie::new(MemStore::new());
        trie.insert(a, vec![0xa]).unwrap();
        trie.insert(b, vec![0xb]).unwrap();
        assert_eq!(trie.get(&a).unwrap(), Some(vec![0xa]));
        assert_eq!(trie.get(&b).unwrap(), Some(vec![0xb]));

        // Erasing one of the pair must collapse the split chain back to a single leaf,
        // leaving the same root hash as a trie that only ever saw the survivor.
        trie.erase(&a).unwrap();
        let mut reference = StateTrie::new(MemStore::new());
        reference.insert(b, vec![0xb]).unwrap();
        assert_eq!(trie.hash(), reference.hash());
    }

    #[test]
    fn root_hash_is_insertion_order_independent() {
        let keys: Vec<Hash256> = (1u8..=20).map(key).collect();
        let mut forward = StateTrie::new(MemStore::new());
        for k in &keys {
            forward.insert(*k, k.bytes().to_vec()).unwrap();
        }
        let mut backward = StateTrie::new(MemStore::new());
        for k in keys.iter().rev() {
            backward.insert(*k, k.bytes().to_vec()).unwrap();
        }
        assert_eq!(forward.hash(), backward.hash());
    }

    #[test]
    fn overwrite_equals_single_put() {
        let mut twice = StateTrie::new(MemStore::new());
        twice.insert(key(5), vec![1]).unwrap();
        twice.insert(key(5), vec![2]).unwrap();

        let mut once = StateTrie::new(MemStore::new());
        once.insert(key(5), vec![2]).unwrap();

        assert_eq!(twice.hash(), once.hash());
    }

    #[test]
    fn empty_trie_hashes_to_zero() {
        let mut trie = StateTrie::new(MemStore::new());
        assert_eq!(trie.hash(), Hash256::ZERO);
        trie.insert(key(1), vec![1]).unwrap();
        trie.erase(&key(1)).unwrap();
        assert_eq!(trie.hash(), Hash256::ZERO);
    }

    #[test]
    fn successor_walks_keys_in_order() {
        let mut trie = StateTrie::new(MemStore::new());
        let mut keys: Vec<Hash256> = [7u8, 1, 9, 3, 200, 45].iter().map(|f| key(*f)).collect();
        for k in &keys {
            trie.insert(*k, vec![]).unwrap();
        }
        keys.sort();

        let mut walked = Vec::new();
        let mut cursor = Hash256::ZERO;
        while let Some(next) = trie.successor(&cursor).unwrap() {
            walked.push(next);
            cursor = next;
        }
        assert_eq!(walked, keys);
    }

    #[test]
    fn snapshots_are_copy_on_write() {
        let mut original = StateTrie::new(MemStore::new());
        original.insert(key(1), vec![1]).unwrap();
        original.insert(key(2), vec![2]).unwrap();

        let mut branch = original.snapshot();
        branch.insert(key(2), vec![22]).unwrap();
        branch.insert(key(3), vec![3]).unwrap();

        // The original is unaffected by mutations through the branch.
        assert_eq!(original.get(&key(2)).unwrap(), Some(vec![2]));
        assert_eq!(original.get(&key(3)).unwrap(), None);
        assert_eq!(branch.get(&key(2)).unwrap(), Some(vec![22]));

        assert_ne!(original.hash(), branch.hash());
    }

    #[test]
    fn reload_from_flushed_root() {
        let store = MemStore::new();
        let mut trie = StateTrie::new(store.clone());
        for fill in 1u8..=10 {
            trie.insert(key(fill), vec![fill]).unwrap();
        }
        let root = trie.hash();

        let reloaded = StateTrie::from_root(store, root).unwrap();
        for fill in 1u8..=10 {
            assert_eq!(reloaded.get(&key(fill)).unwrap(), Some(vec![fill]));
        }
    }

    #[test]
    fn missing_node_surfaces_and_is_retryable() {
        let store = MemStore::new();
        let mut trie = StateTrie::new(store.clone());
        for fill in 1u8..=10 {
            trie.insert(key(fill), vec![fill]).unwrap();
        }
        let root = trie.hash();

        // A fresh store holds nothing; the root itself cannot be produced.
        let empty_store = MemStore::new();
        match StateTrie::from_root(empty_store.clone(), root) {
            Err(TrieError::MissingNode(hash)) => {
                // Supplying the node and retrying succeeds.
                empty_store.put(hash, store.get(&hash).unwrap());
                StateTrie::from_root(empty_store, root).unwrap();
            }
            other => panic!("expected MissingNode, got {:?}", other.err()),
        }
    }

    #[test]
    fn corrupt_bytes_are_fatal() {
        let store = MemStore::new();
        let hash = key(0xee);
        store.put(hash, vec![0, 1, 2, 3]);
        match StateTrie::from_root(store, hash) {
            Err(TrieError::Corruption(claimed)) => assert_eq!(claimed, hash),
            other => panic!("expected Corruption, got {:?}", other.err()),
        }
    }
}
