/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Whole-view checks run after every transaction effect.
//!
//! Transactors are trusted to be correct, not assumed to be. After an effect runs, the
//! pipeline diffs every entry the transaction changed against a checkpoint taken just
//! before it and checks a fixed set of invariants. A failure does not abort the node: the
//! effect is rolled back and the transaction is committed as fee-only, with the violation
//! logged at error level.

use crate::amendments::AmendmentSwitch;
use crate::ledger::entry::StateEntry;
use crate::ledger::open_view::{OpenView, ViewCheckpoint};
use crate::store::NodeStore;
use crate::types::basic::Drops;
use crate::types::transaction::Transaction;

use super::ApplyContext;

/// The name of the first invariant that failed.
pub(crate) type InvariantFailure = &'static str;

/// Run every whole-view check for the effect of `tx`.
///
/// `before` is the checkpoint taken before the fee was debited, so the expected net
/// effect on circulating coins is exactly `-fee`.
pub(crate) fn check_all<S: NodeStore, A: AmendmentSwitch>(
    view: &OpenView<S>,
    before: &ViewCheckpoint,
    tx: &Transaction,
    fee: Drops,
    ctx: &ApplyContext<A>,
) -> Result<(), InvariantFailure> {
    coins_conserved(view, before, fee)?;
    no_reserve_underrun(view, before, tx, fee, ctx)?;
    sequence_advanced_once(view, before, tx)?;
    Ok(())
}

/// Balance deltas across all touched accounts plus the burned fee must sum to zero.
/// Coins are only ever destroyed through fees, never created.
fn coins_conserved<S: NodeStore>(
    view: &OpenView<S>,
    before: &ViewCheckpoint,
    fee: Drops,
) -> Result<(), InvariantFailure> {
    let mut delta: i128 = 0;
    for key in view.changed_since(before) {
        let was = account_balance(view.read_entry_at(before, &key).ok().flatten());
        let now = account_balance(view.read_entry(&key).ok().flatten());
        delta += now as i128 - was as i128;
    }
    if delta != -(fee.int() as i128) {
        return Err("coins not conserved");
    }
    let burned = view.coins_at(before).saturating_sub(view.coins_total());
    if burned != fee {
        return Err("burn does not match fee");
    }
    Ok(())
}

/// No effect may take an account below its reserve. The fee is exempt: it is always
/// paid, even out of the reserve.
fn no_reserve_underrun<S: NodeStore, A: AmendmentSwitch>(
    view: &OpenView<S>,
    before: &ViewCheckpoint,
    tx: &Transaction,
    fee: Drops,
    ctx: &ApplyContext<A>,
) -> Result<(), InvariantFailure> {
    for key in view.changed_since(before) {
        let Ok(Some(StateEntry::AccountRoot {
            account,
            balance,
            owner_count,
            ..
        })) = view.read_entry(&key)
        else {
            continue;
        };
        let reserve = ctx.reserve(owner_count);
        if balance >= reserve {
            continue;
        }
        // Below the reserve: acceptable only if the account was no better off before,
        // allowing for the signer's fee.
        let was = Drops::new(account_balance(view.read_entry_at(before, &key).ok().flatten()));
        let floor = if account == tx.account {
            was.saturating_sub(fee)
        } else {
            was
        };
        if floor >= reserve || balance < floor {
            return Err("reserve under-run");
        }
    }
    Ok(())
}

/// The signer's sequence advances exactly once per applied transaction; no other
/// account's sequence moves at all; created accounts start at sequence 1.
fn sequence_advanced_once<S: NodeStore>(
    view: &OpenView<S>,
    before: &ViewCheckpoint,
    tx: &Transaction,
) -> Result<(), InvariantFailure> {
    for key in view.changed_since(before) {
        let (account, seq_now) = match view.read_entry(&key) {
            Ok(Some(StateEntry::AccountRoot {
                account, sequence, ..
            })) => (account, sequence),
            _ => continue,
        };
        let seq_was = match view.read_entry_at(before, &key) {
            Ok(Some(StateEntry::AccountRoot { sequence, .. })) => Some(sequence),
            _ => None,
        };
        match seq_was {
            Some(was) if account == tx.account => {
                if seq_now != was.next() {
                    return Err("signer sequence did not advance exactly once");
                }
            }
            Some(was) => {
                if seq_now != was {
                    return Err("bystander sequence moved");
                }
            }
            None => {
                if seq_now.int() != 1 {
                    return Err("created account with advanced sequence");
                }
            }
        }
    }
    Ok(())
}

fn account_balance(entry: Option<StateEntry>) -> u64 {
    match entry {
        Some(StateEntry::AccountRoot { balance, .. }) => balance.int(),
        _ => 0,
    }
}
