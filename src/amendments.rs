/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The amendment switch: the seam through which protocol rule changes reach the apply
//! engine.
//!
//! The ledger core does not vote on amendments. It only observes the flag set attached to
//! the previous ledger and refuses work it cannot evaluate: a node that sees an enabled
//! feature outside [`SUPPORTED_FEATURES`] becomes amendment-blocked, keeps serving reads,
//! and stops applying transactions or participating in consensus until it is upgraded.
//! [`EnabledSet::unsupported`] is the query that drives that refusal.

use crate::types::basic::LedgerSeq;
use crate::types::hash::{Hash256, HashPrefix, Hasher};

/// Gates the account-maintenance payload type.
pub const FEATURE_ACCOUNT_MAINTENANCE: &str = "account-maintenance";

/// Every feature this build of the node can evaluate. An enabled feature outside this
/// list means the network runs rules this binary does not implement.
pub const SUPPORTED_FEATURES: [&str; 1] = [FEATURE_ACCOUNT_MAINTENANCE];

/// A feature's identity: the digest of its name.
pub fn feature_id(name: &str) -> Hash256 {
    Hasher::digest(HashPrefix::StateKey, name.as_bytes())
}

/// The ids of every feature in [`SUPPORTED_FEATURES`].
pub fn supported_feature_ids() -> Vec<Hash256> {
    SUPPORTED_FEATURES.iter().map(|name| feature_id(name)).collect()
}

/// Queried by preflight and apply before using a gated rule.
pub trait AmendmentSwitch {
    /// Whether `feature` is enabled for the ledger being built at `seq`.
    fn is_enabled(&self, feature: &Hash256, seq: LedgerSeq) -> bool;
}

/// The switch backed by an [`Amendments`](crate::ledger::entry::StateEntry::Amendments)
/// entry read out of the previous ledger's state.
#[derive(Clone, Default)]
pub struct EnabledSet {
    enabled: Vec<Hash256>,
}

impl EnabledSet {
    pub fn new(enabled: Vec<Hash256>) -> EnabledSet {
        EnabledSet { enabled }
    }

    pub fn empty() -> EnabledSet {
        EnabledSet::default()
    }

    /// Enabled features this build cannot evaluate.
    ///
    /// A non-empty answer makes the node amendment-blocked: it must stop applying
    /// transactions and taking part in consensus, since it cannot honor a rule the
    /// network has switched on.
    pub fn unsupported(&self) -> Vec<Hash256> {
        let supported = supported_feature_ids();
        self.enabled
            .iter()
            .filter(|feature| !supported.contains(feature))
            .copied()
            .collect()
    }
}

impl AmendmentSwitch for EnabledSet {
    fn is_enabled(&self, feature: &Hash256, _seq: LedgerSeq) -> bool {
        self.enabled.contains(feature)
    }
}

/// A switch with every feature on. Standalone mode and most tests run with this.
#[derive(Clone, Copy, Default)]
pub struct AllEnabled;

impl AmendmentSwitch for AllEnabled {
    fn is_enabled(&self, _feature: &Hash256, _seq: LedgerSeq) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_set_switches_per_feature() {
        let on = feature_id(FEATURE_ACCOUNT_MAINTENANCE);
        let off = feature_id("something-newer");
        let switch = EnabledSet::new(vec![on]);
        assert!(switch.is_enabled(&on, LedgerSeq::new(5)));
        assert!(!switch.is_enabled(&off, LedgerSeq::new(5)));
    }

    #[test]
    fn unknown_enabled_features_are_reported() {
        let known = feature_id(FEATURE_ACCOUNT_MAINTENANCE);
        let unknown = feature_id("something-newer");

        assert!(EnabledSet::new(vec![known]).unsupported().is_empty());
        assert_eq!(
            EnabledSet::new(vec![known, unknown]).unsupported(),
            vec![unknown]
        );
        assert!(EnabledSet::empty().unsupported().is_empty());
    }
}
