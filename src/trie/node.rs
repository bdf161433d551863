/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Node types of the authenticated trie and their hash and wire rules.
//!
//! A resident trie is a graph of [`Arc`]-shared nodes. A child link is either [`Child::Empty`],
//! a [`Child::Stub`] (hash known, body not resident), or a resolved [`Child::Node`]. The hash
//! of a node commits to its entire subtree:
//!
//! - leaf hash = `H(leaf-tag ‖ key ‖ value)`
//! - inner hash = `H(inner-tag ‖ child₀ ‖ … ‖ child₁₅)`, absent children as 32 zero bytes
//!
//! `cached_hash` doubles as the persistence marker: `Some` means the node has been hashed
//! and written to the node store in this exact form, `None` means it was mutated since.

use borsh::{BorshDeserialize, BorshSerialize};
use std::sync::Arc;

use crate::types::hash::{Hash256, HashPrefix, Hasher};

use super::TrieError;

/// One of the sixteen links an inner node holds.
#[derive(Clone)]
pub(crate) enum Child {
    Empty,
    /// The child's hash is known but its body is not resident. Resolved through the node
    /// store on demand.
    Stub(Hash256),
    Node(Arc<TrieNode>),
}

impl Child {
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Child::Empty)
    }
}

#[derive(Clone)]
pub(crate) struct InnerNode {
    pub(crate) children: [Child; 16],
    pub(crate) cached_hash: Option<Hash256>,
}

impl InnerNode {
    pub(crate) fn empty() -> InnerNode {
        InnerNode {
            children: std::array::from_fn(|_| Child::Empty),
            cached_hash: None,
        }
    }

    pub(crate) fn child_count(&self) -> usize {
        self.children.iter().filter(|c| !c.is_empty()).count()
    }

    /// The inner hash rule over already-known child hashes.
    pub(crate) fn compute_hash(child_hashes: &[Hash256; 16]) -> Hash256 {
        let mut hasher = Hasher::new(HashPrefix::InnerNode);
        for child in child_hashes {
            hasher.update(child.bytes());
        }
        hasher.finalize()
    }
}

#[derive(Clone)]
pub(crate) struct LeafNode {
    pub(crate) key: Hash256,
    pub(crate) value: Vec<u8>,
    pub(crate) cached_hash: Option<Hash256>,
}

impl LeafNode {
    pub(crate) fn new(key: Hash256, value: Vec<u8>) -> LeafNode {
        LeafNode {
            key,
            value,
            cached_hash: None,
        }
    }

    pub(crate) fn compute_hash(&self) -> Hash256 {
        let mut hasher = Hasher::new(HashPrefix::LeafNode);
        hasher.update(self.key.bytes());
        hasher.update(&self.value);
        hasher.finalize()
    }
}

#[derive(Clone)]
pub(crate) enum TrieNode {
    Inner(InnerNode),
    Leaf(LeafNode),
}

impl TrieNode {
    pub(crate) fn cached_hash(&self) -> Option<Hash256> {
        match self {
            TrieNode::Inner(inner) => inner.cached_hash,
            TrieNode::Leaf(leaf) => leaf.cached_hash,
        }
    }
}

/// The serialized form written to and read from the node store.
#[derive(BorshSerialize, BorshDeserialize)]
enum NodeWire {
    Inner { children: [Hash256; 16] },
    Leaf { key: Hash256, value: Vec<u8> },
}

/// Serialize an inner node whose child hashes are already known.
pub(crate) fn inner_wire_bytes(child_hashes: &[Hash256; 16]) -> Vec<u8> {
    NodeWire::Inner {
        children: *child_hashes,
    }
    .try_to_vec()
    .unwrap()
}

pub(crate) fn leaf_wire_bytes(leaf: &LeafNode) -> Vec<u8> {
    NodeWire::Leaf {
        key: leaf.key,
        value: leaf.value.clone(),
    }
    .try_to_vec()
    .unwrap()
}

/// Decode a node fetched from the store under `expected_hash`.
///
/// The recomputed hash must equal the hash the node was fetched by. A mismatch means the
/// store returned bytes that do not belong to the requested content address, which is
/// unrecoverable at this layer.
pub(crate) fn decode_node(bytes: &[u8], expected_hash: Hash256) -> Result<TrieNode, TrieError> {
    let wire = NodeWire::deserialize(&mut &*bytes)
        .map_err(|_| TrieError::Corruption(expected_hash))?;
    match wire {
        NodeWire::Inner { children } => {
            let actual = InnerNode::compute_hash(&children);
            if actual != expected_hash {
                return Err(TrieError::Corruption(expected_hash));
            }
            let links = std::array::from_fn(|i| {
                if children[i].is_zero() {
                    Child::Empty
                } else {
                    Child::Stub(children[i])
                }
            });
            Ok(TrieNode::Inner(InnerNode {
                children: links,
                cached_hash: Some(expected_hash),
            }))
        }
        NodeWire::Leaf { key, value } => {
            let leaf = LeafNode {
                key,
                value,
                cached_hash: None,
            };
            if leaf.compute_hash() != expected_hash {
                return Err(TrieError::Corruption(expected_hash));
            }
            Ok(TrieNode::Leaf(LeafNode {
                cached_hash: Some(expected_hash),
                ..leaf
            }))
        }
    }
}
