/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The deterministic transaction apply pipeline.
//!
//! One transaction flows through four stages:
//!
//! 1. **Preflight** (stateless): structure and signature. Failures are terminal and the
//!    transaction is never queued or broadcast.
//! 2. **Preclaim** (read-only against the view): sequence, expiry, fee coverage, and
//!    type-specific prerequisites, classified into good / retry / terminal-bad.
//! 3. **Apply** (mutating): debit the full declared fee, advance the signer's sequence,
//!    run the type-specific effect, record metadata.
//! 4. **Invariant check**: a fixed set of whole-view checks. Any failure rolls the effect
//!    back to its fee-only remainder and commits the transaction as
//!    [`InvariantViolation`](result::ApplyCode::InvariantViolation).
//!
//! The pipeline is synchronous with respect to its open view and never suspends
//! mid-transaction: all state it needs must be resident, and a missing trie node surfaces
//! as an error to the caller rather than a wait.

pub mod result;

pub(crate) mod invariants;

pub(crate) mod transactor;

use log;

use crate::amendments::AmendmentSwitch;
use crate::ledger::entry::{account_key, StateEntry};
use crate::ledger::open_view::{AppliedTx, OpenView, ViewError};
use crate::store::NodeStore;
use crate::trie::TrieError;
use crate::types::basic::{Drops, FeeLevel};
use crate::types::transaction::Transaction;

use result::{ApplyCode, CodeBand, TxMeta};

/// Everything the pipeline needs besides the view: the amendment switch and the fee and
/// reserve parameters in force for the ledger being built.
#[derive(Clone)]
pub struct ApplyContext<A: AmendmentSwitch> {
    pub amendments: A,
    /// The reference fee a level-256 transaction pays.
    pub reference_fee: Drops,
    pub reserve_base: Drops,
    pub reserve_increment: Drops,
}

impl<A: AmendmentSwitch> ApplyContext<A> {
    /// The reserve an account with `owner_count` owned objects must hold.
    pub fn reserve(&self, owner_count: u32) -> Drops {
        self.reserve_base
            .saturating_add(Drops::new(
                self.reserve_increment.int().saturating_mul(owner_count as u64),
            ))
    }
}

/// The classification preclaim produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preclaim {
    /// Proceed to apply.
    Good,
    /// A sequence gap or temporarily unsatisfiable precondition; may be queued.
    Retry(ApplyCode),
    /// Terminal; do not queue.
    Bad(ApplyCode),
}

/// What one apply attempt did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub code: ApplyCode,
    /// Whether the transaction entered the view (success or claimed-fee).
    pub applied: bool,
}

/// Stage 1: stateless structural validation.
///
/// On success, returns the transaction's fee level against its own base fee, which is
/// what the admission queue ranks by.
pub fn preflight<A: AmendmentSwitch>(
    tx: &Transaction,
    ctx: &ApplyContext<A>,
    child_seq: crate::types::basic::LedgerSeq,
) -> Result<FeeLevel, ApplyCode> {
    if !tx.is_correctly_signed() {
        return Err(ApplyCode::BadSignature);
    }
    if tx.fee < tx.base_fee(ctx.reference_fee) {
        return Err(ApplyCode::FeeBelowMinimum);
    }
    transactor::preflight_payload(tx, &ctx.amendments, child_seq)?;
    Ok(tx.fee_level(ctx.reference_fee))
}

/// Stage 2: read-only checks against the view.
pub fn preclaim<S: NodeStore, A: AmendmentSwitch>(
    tx: &Transaction,
    view: &OpenView<S>,
    ctx: &ApplyContext<A>,
) -> Result<Preclaim, TrieError> {
    if let Some(last_valid) = tx.last_valid {
        if view.child_seq() > last_valid {
            return Ok(Preclaim::Bad(ApplyCode::Expired));
        }
    }
    if view.contains_tx(&tx.id()) {
        return Ok(Preclaim::Bad(ApplyCode::AlreadyApplied));
    }
    let Some(StateEntry::AccountRoot {
        sequence, balance, ..
    }) = view.account(&tx.account)?
    else {
        return Ok(Preclaim::Bad(ApplyCode::AccountMissing));
    };
    if tx.sequence < sequence {
        return Ok(Preclaim::Bad(ApplyCode::PastSequence));
    }
    if tx.sequence > sequence {
        return Ok(Preclaim::Retry(ApplyCode::FutureSequence));
    }
    if balance < tx.fee {
        return Ok(Preclaim::Retry(ApplyCode::InsufficientFeeBalance));
    }
    if let Err(code) = transactor::preclaim_payload(tx, view, ctx) {
        return Ok(if code.band() == CodeBand::Retry {
            Preclaim::Retry(code)
        } else {
            Preclaim::Bad(code)
        });
    }
    Ok(Preclaim::Good)
}

/// Stages 2 through 4: validate against the view, debit the fee, run the effect, check
/// invariants, and record the outcome in the view.
///
/// The caller is responsible for having preflighted the transaction. A trie error means
/// required state was not resident; nothing was applied in that case.
pub fn apply<S: NodeStore, A: AmendmentSwitch>(
    view: &mut OpenView<S>,
    tx: &Transaction,
    ctx: &ApplyContext<A>,
) -> Result<ApplyOutcome, TrieError> {
    match preclaim(tx, view, ctx)? {
        Preclaim::Good => {}
        Preclaim::Retry(code) | Preclaim::Bad(code) => {
            return Ok(ApplyOutcome {
                code,
                applied: false,
            })
        }
    }

    let before_tx = view.checkpoint();

    // Debit the full declared fee and advance the sequence. This stands even if the
    // effect fails.
    let signer_key = account_key(&tx.account);
    let Some(StateEntry::AccountRoot {
        account,
        balance,
        sequence,
        owner_count,
    }) = view.read_entry(&signer_key)?
    else {
        return Ok(ApplyOutcome {
            code: ApplyCode::AccountMissing,
            applied: false,
        });
    };
    let fee = tx.fee;
    let debited = StateEntry::AccountRoot {
        account,
        balance: balance.saturating_sub(fee),
        sequence: sequence.next(),
        owner_count,
    };
    write_replace(view, signer_key, debited.encode())?;
    view.burn(fee);

    let fee_only = view.checkpoint();
    let mut meta = TxMeta {
        affected: vec![tx.account],
        ..TxMeta::default()
    };

    let mut code = match transactor::apply_payload(tx, view, ctx, &mut meta) {
        Ok(()) => ApplyCode::Applied,
        Err(failure) => {
            debug_assert_eq!(failure.band(), CodeBand::ClaimedFee);
            view.rollback(fee_only.clone());
            meta = TxMeta {
                affected: vec![tx.account],
                ..TxMeta::default()
            };
            failure
        }
    };

    if let Err(violated) = invariants::check_all(view, &before_tx, tx, fee, ctx) {
        log::error!("InvariantViolation, {}, {}", violated, tx.id());
        view.rollback(fee_only);
        meta = TxMeta {
            affected: vec![tx.account],
            ..TxMeta::default()
        };
        code = ApplyCode::InvariantViolation;
    }

    view.push_tx(AppliedTx {
        tx: tx.clone(),
        code,
        meta: meta.encode(),
    });
    Ok(ApplyOutcome {
        code,
        applied: true,
    })
}

/// Replace through the view, funneling trie errors out and treating the impossible
/// key-not-found as corruption of this pipeline's own reasoning.
fn write_replace<S: NodeStore>(
    view: &mut OpenView<S>,
    key: crate::types::hash::Hash256,
    bytes: Vec<u8>,
) -> Result<(), TrieError> {
    match view.replace(key, bytes) {
        Ok(()) => Ok(()),
        Err(ViewError::Trie(err)) => Err(err),
        Err(other) => unreachable!("replacing an entry just read: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amendments::AllEnabled;
    use crate::ledger::ledger::Ledger;
    use crate::store::MemStore;
    use crate::types::basic::{CloseResolution, LedgerSeq, NetTime, SequenceNumber};
    use crate::types::crypto_primitives::{AccountID, Keypair};
    use crate::types::transaction::TxPayload;
    use ed25519_dalek::SigningKey;

    fn keypair(seed: u8) -> Keypair {
        Keypair::new(SigningKey::from_bytes(&[seed; 32]))
    }

    fn ctx() -> ApplyContext<AllEnabled> {
        ApplyContext {
            amendments: AllEnabled,
            reference_fee: Drops::new(10),
            reserve_base: Drops::new(200),
            reserve_increment: Drops::new(50),
        }
    }

    fn funded_genesis(keypair: &Keypair, balance: u64) -> Ledger<MemStore> {
        Ledger::genesis(
            MemStore::new(),
            &[(keypair.account(), Drops::new(balance))],
            CloseResolution::new(30),
        )
        .unwrap()
    }

    fn payment(
        keypair: &Keypair,
        seq: u32,
        fee: u64,
        destination: AccountID,
        amount: u64,
    ) -> Transaction {
        Transaction::new_signed(
            keypair,
            SequenceNumber::new(seq),
            Drops::new(fee),
            None,
            TxPayload::Payment {
                destination,
                amount: Drops::new(amount),
            },
        )
    }

    #[test]
    fn successful_payment_moves_funds_and_burns_fee() {
        let sender = keypair(1);
        let receiver = keypair(2);
        let genesis = funded_genesis(&sender, 100_000);
        let mut view = crate::ledger::open_view::OpenView::new(&genesis);

        let tx = payment(&sender, 1, 10, receiver.account(), 1_000);
        let outcome = apply(&mut view, &tx, &ctx()).unwrap();
        assert_eq!(outcome.code, ApplyCode::Applied);
        assert!(outcome.applied);

        let Some(StateEntry::AccountRoot {
            balance, sequence, ..
        }) = view.account(&sender.account()).unwrap()
        else {
            panic!("sender must still exist");
        };
        assert_eq!(balance, Drops::new(100_000 - 10 - 1_000));
        assert_eq!(sequence, SequenceNumber::new(2));

        let Some(StateEntry::AccountRoot {
            balance: received, ..
        }) = view.account(&receiver.account()).unwrap()
        else {
            panic!("destination must have been created");
        };
        assert_eq!(received, Drops::new(1_000));

        // The fee left circulation.
        assert_eq!(view.coins_total(), Drops::new(100_000 - 10));
    }

    #[test]
    fn sequence_gap_is_a_retry() {
        let sender = keypair(1);
        let genesis = funded_genesis(&sender, 100_000);
        let mut view = crate::ledger::open_view::OpenView::new(&genesis);

        let tx = payment(&sender, 7, 10, keypair(2).account(), 100);
        let outcome = apply(&mut view, &tx, &ctx()).unwrap();
        assert_eq!(outcome.code, ApplyCode::FutureSequence);
        assert!(!outcome.applied);
        assert_eq!(view.tx_count(), 0);
    }

    #[test]
    fn past_sequence_is_terminal() {
        let sender = keypair(1);
        let genesis = funded_genesis(&sender, 100_000);
        let mut view = crate::ledger::open_view::OpenView::new(&genesis);

        apply(
            &mut view,
            &payment(&sender, 1, 10, keypair(2).account(), 500),
            &ctx(),
        )
        .unwrap();
        let outcome = apply(
            &mut view,
            &payment(&sender, 1, 10, keypair(3).account(), 500),
            &ctx(),
        )
        .unwrap();
        assert_eq!(outcome.code, ApplyCode::PastSequence);
        assert!(!outcome.applied);
    }

    #[test]
    fn unfunded_payment_claims_only_the_fee() {
        let sender = keypair(1);
        let genesis = funded_genesis(&sender, 1_000);
        let mut view = crate::ledger::open_view::OpenView::new(&genesis);

        // Reserve is 200, so 1_000 - 10 fee leaves 790 spendable; ask for more.
        let tx = payment(&sender, 1, 10, keypair(2).account(), 900);
        let outcome = apply(&mut view, &tx, &ctx()).unwrap();
        assert_eq!(outcome.code, ApplyCode::UnfundedPayment);
        assert!(outcome.applied);

        let Some(StateEntry::AccountRoot {
            balance, sequence, ..
        }) = view.account(&sender.account()).unwrap()
        else {
            panic!("sender must still exist");
        };
        // Fee taken, sequence advanced, nothing else.
        assert_eq!(balance, Drops::new(990));
        assert_eq!(sequence, SequenceNumber::new(2));
        assert!(view.account(&keypair(2).account()).unwrap().is_none());
    }

    #[test]
    fn creating_destination_below_reserve_claims_fee() {
        let sender = keypair(1);
        let genesis = funded_genesis(&sender, 100_000);
        let mut view = crate::ledger::open_view::OpenView::new(&genesis);

        let tx = payment(&sender, 1, 10, keypair(2).account(), 199);
        let outcome = apply(&mut view, &tx, &ctx()).unwrap();
        assert_eq!(outcome.code, ApplyCode::DestinationReserve);
        assert!(view.account(&keypair(2).account()).unwrap().is_none());
    }

    #[test]
    fn expired_transaction_is_terminal() {
        let sender = keypair(1);
        let genesis = funded_genesis(&sender, 100_000);
        let mut view = crate::ledger::open_view::OpenView::new(&genesis);

        let tx = Transaction::new_signed(
            &sender,
            SequenceNumber::new(1),
            Drops::new(10),
            Some(LedgerSeq::new(1)),
            TxPayload::AccountSet,
        );
        // The child being built has sequence 2, past the last-valid of 1.
        let outcome = apply(&mut view, &tx, &ctx()).unwrap();
        assert_eq!(outcome.code, ApplyCode::Expired);
        assert!(!outcome.applied);
    }

    #[test]
    fn duplicate_application_is_rejected() {
        let sender = keypair(1);
        let genesis = funded_genesis(&sender, 100_000);
        let mut view = crate::ledger::open_view::OpenView::new(&genesis);

        let tx = payment(&sender, 1, 10, keypair(2).account(), 500);
        assert_eq!(
            apply(&mut view, &tx, &ctx()).unwrap().code,
            ApplyCode::Applied
        );
        assert_eq!(
            apply(&mut view, &tx, &ctx()).unwrap().code,
            ApplyCode::AlreadyApplied
        );
        assert_eq!(view.tx_count(), 1);
    }

    #[test]
    fn commit_after_apply_preserves_totals() {
        let sender = keypair(1);
        let genesis = funded_genesis(&sender, 100_000);
        let mut view = crate::ledger::open_view::OpenView::new(&genesis);

        let tx = payment(&sender, 1, 10, keypair(2).account(), 1_000);
        apply(&mut view, &tx, &ctx()).unwrap();

        let child = view
            .commit(crate::ledger::open_view::CloseData {
                close_time: NetTime::new(30),
                close_resolution: CloseResolution::new(30),
                flags: crate::types::basic::LedgerFlags::none(),
            })
            .unwrap();
        assert_eq!(child.coins_total(), Drops::new(99_990));
        assert!(child.contains_tx(&tx.id()).unwrap());
        child.validate().unwrap();
    }
}
