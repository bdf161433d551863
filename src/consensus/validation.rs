/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validation messages and the bookkeeping that turns them into full validation.
//!
//! After accepting a ledger, a validator signs and broadcasts a [`Validation`] naming the
//! ledger's hash and sequence. These are lower-frequency and longer-lived than proposals:
//! a validation stays usable within three windows (wall time past its signing time, local
//! time past first sight, and a bound on how far in the future its signing time may lie,
//! guarding clock errors). A ledger is *fully validated* once a configured quorum of
//! trusted validators has signed matching validations for the same hash at the same
//! sequence. Only fully validated ledgers anchor rounds on non-validator nodes.

use std::collections::HashMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::clock::Clock;
use crate::types::basic::{LedgerSeq, NetTime};
use crate::types::crypto_primitives::{
    verify_signature, Keypair, SignatureBytes, VerifyingKey,
};
use crate::types::hash::{Hash256, HashPrefix};
use crate::types::validator_set::TrustedValidators;

use super::timing::{VALIDATION_VALID_EARLY, VALIDATION_VALID_LOCAL, VALIDATION_VALID_WALL};

/// A validator's signature over an accepted ledger.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Validation {
    pub ledger_hash: Hash256,
    pub ledger_seq: LedgerSeq,
    pub close_time: NetTime,
    /// When the validator signed, by its own clock.
    pub signing_time: NetTime,
    /// Raw bytes of the validator's verifying key.
    pub node: [u8; 32],
    pub signature: SignatureBytes,
}

impl Validation {
    pub fn new_signed(
        keypair: &Keypair,
        ledger_hash: Hash256,
        ledger_seq: LedgerSeq,
        close_time: NetTime,
        signing_time: NetTime,
    ) -> Validation {
        let mut validation = Validation {
            ledger_hash,
            ledger_seq,
            close_time,
            signing_time,
            node: keypair.public().to_bytes(),
            signature: SignatureBytes::new([0u8; 64]),
        };
        validation.signature = keypair.sign(&validation.signing_image());
        validation
    }

    fn signing_image(&self) -> Vec<u8> {
        let mut image = HashPrefix::Validation.bytes().to_vec();
        image.extend_from_slice(&self.ledger_hash.bytes());
        image.extend_from_slice(&self.ledger_seq.try_to_vec().unwrap());
        image.extend_from_slice(&self.close_time.try_to_vec().unwrap());
        image.extend_from_slice(&self.signing_time.try_to_vec().unwrap());
        image.extend_from_slice(&self.node);
        image
    }

    pub fn node_key(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.node).ok()
    }

    pub fn is_correctly_signed(&self) -> bool {
        match self.node_key() {
            Some(key) => verify_signature(&key, &self.signing_image(), &self.signature),
            None => false,
        }
    }
}

/// Why a validation was not recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    UntrustedPeer,
    InvalidSignature,
}

/// Whether a recorded validation counted as current when it arrived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationStatus {
    Current,
    /// Outside the validity windows on arrival. Retained for late tallying but not
    /// counted while stale.
    Stale,
}

struct SeenValidation {
    validation: Validation,
    first_seen: NetTime,
}

/// Collects validations and answers full-validation queries.
pub struct ValidationKeeper<C: Clock> {
    clock: C,
    trusted: TrustedValidators,
    quorum_percent: u32,
    /// Per ledger hash, the latest validation from each trusted validator.
    by_ledger: HashMap<Hash256, HashMap<[u8; 32], SeenValidation>>,
}

impl<C: Clock> ValidationKeeper<C> {
    pub fn new(clock: C, trusted: TrustedValidators, quorum_percent: u32) -> ValidationKeeper<C> {
        ValidationKeeper {
            clock,
            trusted,
            quorum_percent,
            by_ledger: HashMap::new(),
        }
    }

    /// Verify and record a validation.
    pub fn record(&mut self, validation: Validation) -> Result<ValidationStatus, ValidationError> {
        let Some(key) = validation.node_key() else {
            return Err(ValidationError::InvalidSignature);
        };
        if !self.trusted.contains(&key) {
            return Err(ValidationError::UntrustedPeer);
        }
        if !validation.is_correctly_signed() {
            return Err(ValidationError::InvalidSignature);
        }
        let now = self.clock.network_time();
        let status = if Self::in_signing_window(&validation, now) {
            ValidationStatus::Current
        } else {
            ValidationStatus::Stale
        };
        self.by_ledger
            .entry(validation.ledger_hash)
            .or_default()
            .entry(validation.node)
            .or_insert(SeenValidation {
                validation,
                first_seen: now,
            });
        Ok(status)
    }

    fn in_signing_window(validation: &Validation, now: NetTime) -> bool {
        // Not too old, and not from the future beyond honest clock error.
        validation.signing_time.saturating_add_secs(VALIDATION_VALID_WALL) >= now
            && validation.signing_time <= now.saturating_add_secs(VALIDATION_VALID_EARLY)
    }

    fn is_usable(&self, seen: &SeenValidation, now: NetTime) -> bool {
        Self::in_signing_window(&seen.validation, now)
            && now.saturating_sub_secs(VALIDATION_VALID_LOCAL) <= seen.first_seen
    }

    /// How many distinct trusted validators currently stand behind `ledger_hash`.
    pub fn tally(&self, ledger_hash: &Hash256) -> usize {
        let now = self.clock.network_time();
        self.by_ledger
            .get(ledger_hash)
            .map(|validations| {
                validations
                    .values()
                    .filter(|seen| self.is_usable(seen, now))
                    .count()
            })
            .unwrap_or(0)
    }

    /// The number of matching validations required for full validation.
    pub fn quorum(&self) -> usize {
        self.trusted.quorum(self.quorum_percent)
    }

    pub fn is_fully_validated(&self, ledger_hash: &Hash256) -> bool {
        !self.trusted.is_empty() && self.tally(ledger_hash) >= self.quorum()
    }

    /// The highest-sequence ledger hash that currently has a full quorum, if any.
    pub fn best_fully_validated(&self) -> Option<(LedgerSeq, Hash256)> {
        let quorum = self.quorum();
        if self.trusted.is_empty() {
            return None;
        }
        let now = self.clock.network_time();
        self.by_ledger
            .iter()
            .filter_map(|(hash, validations)| {
                let usable: Vec<&SeenValidation> = validations
                    .values()
                    .filter(|seen| self.is_usable(seen, now))
                    .collect();
                if usable.len() >= quorum {
                    let seq = usable
                        .iter()
                        .map(|seen| seen.validation.ledger_seq)
                        .max()?;
                    Some((seq, *hash))
                } else {
                    None
                }
            })
            .max_by_key(|(seq, hash)| (*seq, *hash))
    }

    /// Drop validations that can never count again. Housekeeping, safe to call any
    /// time.
    pub fn prune(&mut self) {
        let now = self.clock.network_time();
        self.by_ledger.retain(|_, validations| {
            validations.retain(|_, seen| {
                seen.validation
                    .signing_time
                    .saturating_add_secs(VALIDATION_VALID_WALL)
                    >= now
            });
            !validations.is_empty()
        });
    }
}
