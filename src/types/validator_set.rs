/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The registry of trusted validators.
//!
//! Unlike membership-changing consensus protocols, the trusted set here is operator
//! configuration: the node counts proposals and validations only from keys in this
//! registry, and a ledger becomes fully validated once a quorum of them has signed
//! matching validations. Iteration order is insertion order, which keeps every
//! derived computation deterministic for a given configuration file.

use indexmap::IndexSet;

pub use ed25519_dalek::VerifyingKey;

/// The set of validator keys this node trusts.
#[derive(Clone, Default)]
pub struct TrustedValidators {
    validators: IndexSet<VerifyingKey>,
}

impl TrustedValidators {
    /// Create an empty registry.
    pub fn new() -> TrustedValidators {
        Self {
            validators: IndexSet::new(),
        }
    }

    pub fn from_keys(keys: impl IntoIterator<Item = VerifyingKey>) -> TrustedValidators {
        Self {
            validators: keys.into_iter().collect(),
        }
    }

    /// Add `validator` to the registry. Returns false if it was already present.
    pub fn insert(&mut self, validator: VerifyingKey) -> bool {
        self.validators.insert(validator)
    }

    pub fn remove(&mut self, validator: &VerifyingKey) -> bool {
        self.validators.shift_remove(validator)
    }

    pub fn contains(&self, validator: &VerifyingKey) -> bool {
        self.validators.contains(validator)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VerifyingKey> {
        self.validators.iter()
    }

    /// The number of matching validations needed to consider a ledger fully validated,
    /// as the smallest count of at least `percent` percent of the registry.
    pub fn quorum(&self, percent: u32) -> usize {
        let total = self.validators.len() as u64;
        (total * percent as u64).div_ceil(100) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    #[test]
    fn quorum_rounds_up() {
        let mut csprg = OsRng {};
        let keys = (0..5).map(|_| SigningKey::generate(&mut csprg).verifying_key());
        let validators = TrustedValidators::from_keys(keys);
        // 80% of 5 is exactly 4; 50% of 5 rounds up to 3.
        assert_eq!(validators.quorum(80), 4);
        assert_eq!(validators.quorum(50), 3);
    }

    #[test]
    fn insert_is_idempotent() {
        let key = SigningKey::generate(&mut OsRng {}).verifying_key();
        let mut validators = TrustedValidators::new();
        assert!(validators.insert(key));
        assert!(!validators.insert(key));
        assert_eq!(validators.len(), 1);
        assert!(validators.contains(&key));
    }
}
