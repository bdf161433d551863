/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! State entries: the values stored in a ledger's state trie.
//!
//! Every entry is a tagged variant whose fields depend on the tag, serialized with borsh
//! behind the variant index. The trie itself only sees opaque bytes; this module owns the
//! mapping between an entry's identifying fields and its 256-bit trie key, so that every
//! node derives identical keys for identical entities.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::basic::{Drops, LedgerSeq, SequenceNumber};
use crate::types::crypto_primitives::AccountID;
use crate::types::hash::{Hash256, HashPrefix, Hasher};

/// Key-space tags, one per entry kind. Part of the protocol: changing a tag changes
/// every derived key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryTag {
    AccountRoot = b'a',
    SkipList = b's',
    Amendments = b'f',
    FeeSettings = b'e',
}

/// One value in the state trie.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum StateEntry {
    /// An account: its balance, its transaction sequence, and how many state objects it
    /// owns (which raises its reserve).
    AccountRoot {
        account: AccountID,
        balance: Drops,
        sequence: SequenceNumber,
        owner_count: u32,
    },
    /// Cached hashes of previous ledgers. The rolling entry holds the last 256 parent
    /// hashes; bucket entries hold one hash per 256 ledgers.
    SkipList {
        last_seq: LedgerSeq,
        hashes: Vec<Hash256>,
    },
    /// Feature flags enabled as of this ledger.
    Amendments { enabled: Vec<Hash256> },
    /// Network fee and reserve parameters.
    FeeSettings {
        base_fee: Drops,
        reserve_base: Drops,
        reserve_increment: Drops,
    },
}

impl StateEntry {
    pub fn tag(&self) -> EntryTag {
        match self {
            StateEntry::AccountRoot { .. } => EntryTag::AccountRoot,
            StateEntry::SkipList { .. } => EntryTag::SkipList,
            StateEntry::Amendments { .. } => EntryTag::Amendments,
            StateEntry::FeeSettings { .. } => EntryTag::FeeSettings,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    pub fn decode(bytes: &[u8]) -> Option<StateEntry> {
        StateEntry::deserialize(&mut &*bytes).ok()
    }

    /// A fresh account entry at its initial sequence.
    pub fn new_account(account: AccountID, balance: Drops) -> StateEntry {
        StateEntry::AccountRoot {
            account,
            balance,
            sequence: SequenceNumber::new(1),
            owner_count: 0,
        }
    }
}

/// The trie key of an account's root entry.
pub fn account_key(account: &AccountID) -> Hash256 {
    let mut hasher = Hasher::new(HashPrefix::StateKey);
    hasher.update([EntryTag::AccountRoot as u8]);
    hasher.update(account.bytes());
    hasher.finalize()
}

/// The fixed key of the rolling skip-list entry (last 256 parent hashes).
pub fn skip_list_key() -> Hash256 {
    Hasher::digest(HashPrefix::StateKey, [EntryTag::SkipList as u8])
}

/// The key of the every-256th skip-list bucket covering `seq`.
///
/// Each bucket accumulates up to 256 hashes (one per 256 sequences), so the key is
/// derived from the sequence truncated by 16 bits.
pub fn skip_list_bucket_key(seq: LedgerSeq) -> Hash256 {
    let mut hasher = Hasher::new(HashPrefix::StateKey);
    hasher.update([EntryTag::SkipList as u8]);
    hasher.update((seq.int() >> 16).to_be_bytes());
    hasher.finalize()
}

/// The fixed key of the amendments entry.
pub fn amendments_key() -> Hash256 {
    Hasher::digest(HashPrefix::StateKey, [EntryTag::Amendments as u8])
}

/// The fixed key of the fee settings entry.
pub fn fee_settings_key() -> Hash256 {
    Hasher::digest(HashPrefix::StateKey, [EntryTag::FeeSettings as u8])
}
