/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The fixed-size ledger header and its on-wire form.
//!
//! The header is the only part of a ledger that travels as a fixed-layout record rather
//! than borsh: numeric fields big-endian, in the exact order below. The ledger's own hash
//! is the digest of this record under the header domain tag, so any deviation in layout
//! breaks cross-node agreement.
//!
//! | field | size |
//! |---|---|
//! | sequence | 4 |
//! | coins_total | 8 |
//! | parent_hash | 32 |
//! | tx_trie_root | 32 |
//! | state_trie_root | 32 |
//! | parent_close_time | 4 |
//! | close_time | 4 |
//! | close_resolution | 1 |
//! | flags | 1 |

use crate::types::basic::{CloseResolution, Drops, LedgerFlags, LedgerSeq, NetTime};
use crate::types::hash::{Hash256, HashPrefix, Hasher};

/// Serialized size of a header in bytes.
pub const HEADER_SIZE: usize = 4 + 8 + 32 + 32 + 32 + 4 + 4 + 1 + 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerHeader {
    pub seq: LedgerSeq,
    pub coins_total: Drops,
    pub parent_hash: Hash256,
    pub tx_trie_root: Hash256,
    pub state_trie_root: Hash256,
    pub parent_close_time: NetTime,
    pub close_time: NetTime,
    pub close_resolution: CloseResolution,
    pub flags: LedgerFlags,
}

impl LedgerHeader {
    /// The fixed-layout record.
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        let mut at = 0;
        let mut push = |field: &[u8]| {
            bytes[at..at + field.len()].copy_from_slice(field);
            at += field.len();
        };
        push(&self.seq.to_be_bytes());
        push(&self.coins_total.int().to_be_bytes());
        push(&self.parent_hash.bytes());
        push(&self.tx_trie_root.bytes());
        push(&self.state_trie_root.bytes());
        push(&self.parent_close_time.int().to_be_bytes());
        push(&self.close_time.int().to_be_bytes());
        push(&[self.close_resolution.secs()]);
        push(&[self.flags.bits()]);
        bytes
    }

    pub fn deserialize(bytes: &[u8]) -> Result<LedgerHeader, HeaderError> {
        if bytes.len() != HEADER_SIZE {
            return Err(HeaderError::WrongLength { actual: bytes.len() });
        }
        fn take<'a>(bytes: &'a [u8], at: &mut usize, len: usize) -> &'a [u8] {
            let field = &bytes[*at..*at + len];
            *at += len;
            field
        }
        let at = &mut 0;
        let seq = LedgerSeq::new(u32::from_be_bytes(take(bytes, at, 4).try_into().unwrap()));
        let coins_total = Drops::new(u64::from_be_bytes(take(bytes, at, 8).try_into().unwrap()));
        let parent_hash = Hash256::new(take(bytes, at, 32).try_into().unwrap());
        let tx_trie_root = Hash256::new(take(bytes, at, 32).try_into().unwrap());
        let state_trie_root = Hash256::new(take(bytes, at, 32).try_into().unwrap());
        let parent_close_time =
            NetTime::new(u32::from_be_bytes(take(bytes, at, 4).try_into().unwrap()));
        let close_time = NetTime::new(u32::from_be_bytes(take(bytes, at, 4).try_into().unwrap()));
        let close_resolution = CloseResolution::new(take(bytes, at, 1)[0]);
        let flags = LedgerFlags::from_bits(take(bytes, at, 1)[0]);
        Ok(LedgerHeader {
            seq,
            coins_total,
            parent_hash,
            tx_trie_root,
            state_trie_root,
            parent_close_time,
            close_time,
            close_resolution,
            flags,
        })
    }

    /// The ledger's self-hash: a pure function of the header fields.
    pub fn hash(&self) -> Hash256 {
        Hasher::digest(HashPrefix::LedgerHeader, self.serialize())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderError {
    WrongLength { actual: usize },
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderError::WrongLength { actual } => write!(
                f,
                "ledger header must be exactly {} bytes, got {}",
                HEADER_SIZE, actual
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> LedgerHeader {
        LedgerHeader {
            seq: LedgerSeq::new(42),
            coins_total: Drops::new(100_000_000),
            parent_hash: Hash256::new([1u8; 32]),
            tx_trie_root: Hash256::new([2u8; 32]),
            state_trie_root: Hash256::new([3u8; 32]),
            parent_close_time: NetTime::new(800_000_000),
            close_time: NetTime::new(800_000_030),
            close_resolution: CloseResolution::new(30),
            flags: LedgerFlags::NO_CONSENSUS_TIME,
        }
    }

    #[test]
    fn serialize_then_deserialize_is_identity() {
        let original = header();
        let decoded = LedgerHeader::deserialize(&original.serialize()).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.hash(), original.hash());
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert_eq!(
            LedgerHeader::deserialize(&[0u8; HEADER_SIZE - 1]),
            Err(HeaderError::WrongLength {
                actual: HEADER_SIZE - 1
            })
        );
    }

    #[test]
    fn every_field_reaches_the_hash() {
        let base = header();
        let mut variants = Vec::new();
        let mut with = |mutate: &dyn Fn(&mut LedgerHeader)| {
            let mut header = base;
            mutate(&mut header);
            variants.push(header.hash());
        };
        with(&|h| h.seq = LedgerSeq::new(43));
        with(&|h| h.coins_total = Drops::new(1));
        with(&|h| h.parent_hash = Hash256::ZERO);
        with(&|h| h.tx_trie_root = Hash256::ZERO);
        with(&|h| h.state_trie_root = Hash256::ZERO);
        with(&|h| h.parent_close_time = NetTime::ZERO);
        with(&|h| h.close_time = NetTime::ZERO);
        with(&|h| h.close_resolution = CloseResolution::new(60));
        with(&|h| h.flags = LedgerFlags::none());

        let base_hash = base.hash();
        for variant in &variants {
            assert_ne!(*variant, base_hash);
        }
    }
}
