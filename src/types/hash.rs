/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! 256-bit hashes and the domain-separated streaming hasher that produces them.
//!
//! Every digest computed by this library starts with a [`HashPrefix`], a four-byte domain
//! tag that makes it impossible for, say, a serialized transaction to collide with a trie
//! node or a ledger header. Cross-node agreement depends on every implementation using the
//! same prefixes over the same byte layouts.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Debug, Display, Formatter};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

/// A 256-bit hash value.
///
/// [`Hash256::ZERO`] is the reserved sentinel: the parent hash of the genesis ledger and
/// the commitment of an empty trie.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// The hex nibble of this hash at `depth`, high nibble first. Used by the state trie
    /// to pick a branch.
    pub fn nibble(&self, depth: usize) -> u8 {
        let byte = self.0[depth / 2];
        if depth % 2 == 0 {
            byte >> 4
        } else {
            byte & 0x0f
        }
    }
}

impl Display for Hash256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        write!(f, "{}", &encoded[..7])
    }
}

impl Debug for Hash256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Four-byte domain tags, one per kind of hashed object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashPrefix {
    /// A ledger header, hashed to produce the ledger's own hash.
    LedgerHeader,
    /// An inner node of an authenticated trie.
    InnerNode,
    /// A leaf node of an authenticated trie.
    LeafNode,
    /// A transaction's canonical bytes, hashed to produce its id.
    Transaction,
    /// The byte image a transaction signature commits to.
    TransactionSig,
    /// A consensus proposal's signing image.
    Proposal,
    /// A validation's signing image.
    Validation,
    /// An account identity derived from a public key.
    AccountID,
    /// A state-trie key derived from an entry's identifying fields.
    StateKey,
    /// A candidate transaction set exchanged during consensus.
    TxSet,
}

impl HashPrefix {
    pub const fn bytes(&self) -> [u8; 4] {
        match self {
            HashPrefix::LedgerHeader => *b"LWR\0",
            HashPrefix::InnerNode => *b"MIN\0",
            HashPrefix::LeafNode => *b"MLN\0",
            HashPrefix::Transaction => *b"TXN\0",
            HashPrefix::TransactionSig => *b"STX\0",
            HashPrefix::Proposal => *b"PRP\0",
            HashPrefix::Validation => *b"VAL\0",
            HashPrefix::AccountID => *b"AID\0",
            HashPrefix::StateKey => *b"KEY\0",
            HashPrefix::TxSet => *b"TSE\0",
        }
    }
}

/// Streaming SHA-256 hasher seeded with a [`HashPrefix`].
pub struct Hasher(Sha256);

impl Hasher {
    pub fn new(prefix: HashPrefix) -> Self {
        let mut digest = Sha256::new();
        digest.update(prefix.bytes());
        Hasher(digest)
    }

    pub fn update(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        self.0.update(bytes.as_ref());
        self
    }

    pub fn finalize(self) -> Hash256 {
        Hash256::new(self.0.finalize().into())
    }

    /// One-shot digest of a single byte string under `prefix`.
    pub fn digest(prefix: HashPrefix, bytes: impl AsRef<[u8]>) -> Hash256 {
        let mut hasher = Hasher::new(prefix);
        hasher.update(bytes);
        hasher.finalize()
    }
}
