/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" types that are sent around and inspected but have no active behavior.
//!
//! These types follow the newtype pattern: a struct wrapping a primitive, with the API for
//! using the type defined here. Arithmetic on ledger quantities is deliberately explicit.
//! Amounts saturate instead of wrapping, so a malicious fee or balance can never overflow
//! into a small value.

use borsh::{BorshDeserialize, BorshSerialize};
use std::{
    fmt::{self, Display, Formatter},
    ops::{Add, AddAssign, Sub},
};

/// Sequence number of a ledger in the chain. The genesis ledger has sequence 1.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct LedgerSeq(u32);

impl LedgerSeq {
    pub const GENESIS: LedgerSeq = LedgerSeq(1);

    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }

    /// The sequence of this ledger's child.
    pub const fn next(&self) -> LedgerSeq {
        LedgerSeq(self.0 + 1)
    }

    pub fn to_be_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl Display for LedgerSeq {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u32> for LedgerSeq {
    type Output = LedgerSeq;

    fn add(self, rhs: u32) -> Self::Output {
        LedgerSeq(self.0 + rhs)
    }
}

impl Sub<LedgerSeq> for LedgerSeq {
    type Output = u32;

    fn sub(self, rhs: LedgerSeq) -> Self::Output {
        self.0 - rhs.0
    }
}

/// An amount of the native coin, denominated in drops (the indivisible unit).
///
/// All arithmetic saturates.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Drops(u64);

impl Drops {
    pub const ZERO: Drops = Drops(0);

    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub fn checked_sub(&self, rhs: Drops) -> Option<Drops> {
        self.0.checked_sub(rhs.0).map(Drops)
    }

    pub fn saturating_add(&self, rhs: Drops) -> Drops {
        Drops(self.0.saturating_add(rhs.0))
    }

    pub fn saturating_sub(&self, rhs: Drops) -> Drops {
        Drops(self.0.saturating_sub(rhs.0))
    }
}

impl Display for Drops {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<Drops> for Drops {
    type Output = Drops;

    fn add(self, rhs: Drops) -> Self::Output {
        Drops(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<Drops> for Drops {
    fn add_assign(&mut self, rhs: Drops) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

/// A dimensionless fee level.
///
/// A level of [`FeeLevel::BASE`] means the transaction pays exactly its reference base fee.
/// Levels let the admission queue rank transactions of different types against each other
/// without knowing their absolute fees. All arithmetic saturates on `u64`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct FeeLevel(u64);

impl FeeLevel {
    /// The reference level: a transaction paying exactly its base fee.
    pub const BASE: FeeLevel = FeeLevel(256);

    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Level of a transaction paying `fee` drops against a `base_fee` reference.
    ///
    /// `level = fee × BASE / base_fee`. A zero `base_fee` saturates to the maximum level
    /// rather than dividing by zero.
    pub fn from_fee(fee: Drops, base_fee: Drops) -> FeeLevel {
        if base_fee.int() == 0 {
            return FeeLevel(u64::MAX);
        }
        FeeLevel(
            fee.int()
                .saturating_mul(Self::BASE.0)
                .checked_div(base_fee.int())
                .unwrap_or(u64::MAX),
        )
    }

    pub fn saturating_mul(&self, rhs: u64) -> FeeLevel {
        FeeLevel(self.0.saturating_mul(rhs))
    }

    /// `self × percent / 100`, saturating.
    pub fn scale_percent(&self, percent: u32) -> FeeLevel {
        FeeLevel(
            self.0
                .saturating_mul(percent as u64)
                .checked_div(100)
                .unwrap_or(u64::MAX),
        )
    }
}

impl Display for FeeLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Wall-clock time expressed in whole seconds since 2000-01-01 00:00:00 UTC.
///
/// Close-time voting, validation windows, and ledger headers all use this representation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct NetTime(u32);

impl NetTime {
    pub const ZERO: NetTime = NetTime(0);

    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }

    pub fn saturating_add_secs(&self, secs: u32) -> NetTime {
        NetTime(self.0.saturating_add(secs))
    }

    pub fn saturating_sub_secs(&self, secs: u32) -> NetTime {
        NetTime(self.0.saturating_sub(secs))
    }

    /// Absolute distance in seconds between two times.
    pub fn abs_diff(&self, other: NetTime) -> u32 {
        self.0.abs_diff(other.0)
    }
}

impl Display for NetTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The granularity, in seconds, to which a ledger's close time is rounded.
///
/// Always one of the values in [`crate::consensus::timing::RESOLUTIONS`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct CloseResolution(u8);

impl CloseResolution {
    pub const fn new(secs: u8) -> Self {
        Self(secs)
    }

    pub const fn secs(&self) -> u8 {
        self.0
    }
}

impl Display for CloseResolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Header flags of a ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, BorshDeserialize, BorshSerialize)]
pub struct LedgerFlags(u8);

impl LedgerFlags {
    /// Set when the round closed without agreement on a close time. The close time in the
    /// header is then `parent close time + resolution` rather than a voted value.
    pub const NO_CONSENSUS_TIME: LedgerFlags = LedgerFlags(0b0000_0001);

    pub const fn none() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn contains(&self, flag: LedgerFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn insert(&mut self, flag: LedgerFlags) {
        self.0 |= flag.0;
    }
}

/// Per-account transaction sequence number.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct SequenceNumber(u32);

impl SequenceNumber {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }

    pub const fn next(&self) -> SequenceNumber {
        SequenceNumber(self.0 + 1)
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Sequence number of a proposal within one consensus round.
///
/// A validator increments this every time its position changes. The reserved value
/// [`ProposalSeq::BOW_OUT`] is a validator's final message in a round, announcing that it
/// has stopped proposing.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ProposalSeq(u32);

impl ProposalSeq {
    pub const INITIAL: ProposalSeq = ProposalSeq(0);
    pub const BOW_OUT: ProposalSeq = ProposalSeq(u32::MAX);

    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }

    pub const fn next(&self) -> ProposalSeq {
        ProposalSeq(self.0 + 1)
    }

    pub const fn is_bow_out(&self) -> bool {
        self.0 == u32::MAX
    }
}

impl Display for ProposalSeq {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_level_from_fee_is_base_for_reference_fee() {
        let base_fee = Drops::new(10);
        assert_eq!(FeeLevel::from_fee(base_fee, base_fee), FeeLevel::BASE);
        assert_eq!(
            FeeLevel::from_fee(Drops::new(20), base_fee),
            FeeLevel::new(512)
        );
    }

    #[test]
    fn fee_level_saturates() {
        let level = FeeLevel::from_fee(Drops::new(u64::MAX), Drops::new(1));
        assert_eq!(level, FeeLevel::new(u64::MAX));
        assert_eq!(level.saturating_mul(2), FeeLevel::new(u64::MAX));
    }

    #[test]
    fn drops_saturate_rather_than_wrap() {
        assert_eq!(Drops::new(u64::MAX) + Drops::new(1), Drops::new(u64::MAX));
        assert_eq!(Drops::new(5).checked_sub(Drops::new(6)), None);
    }

    #[test]
    fn ledger_flags_roundtrip() {
        let mut flags = LedgerFlags::none();
        assert!(!flags.contains(LedgerFlags::NO_CONSENSUS_TIME));
        flags.insert(LedgerFlags::NO_CONSENSUS_TIME);
        assert!(flags.contains(LedgerFlags::NO_CONSENSUS_TIME));
        assert_eq!(LedgerFlags::from_bits(flags.bits()), flags);
    }
}
