/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-payload-type transaction logic behind a small capability interface.
//!
//! The common framing (signature, fee, sequence, expiry) lives in the pipeline in
//! [`crate::apply`]; a transactor only contributes what is specific to its payload type,
//! in three stages mirroring the pipeline: structural checks, read-only checks against
//! the view, and the mutating effect. Effects run after the fee has been debited and the
//! sequence advanced, and report failures as claimed-fee codes.

use crate::amendments::{feature_id, AmendmentSwitch};
use crate::ledger::entry::{account_key, StateEntry};
use crate::ledger::open_view::OpenView;
use crate::store::NodeStore;
use crate::types::basic::LedgerSeq;
use crate::types::transaction::{Transaction, TxPayload};

use super::result::{ApplyCode, TxMeta};
use super::ApplyContext;

/// The capability interface one payload type implements.
pub(crate) trait Transactor {
    fn preflight<A: AmendmentSwitch>(
        tx: &Transaction,
        amendments: &A,
        child_seq: LedgerSeq,
    ) -> Result<(), ApplyCode>;

    fn preclaim<S: NodeStore, A: AmendmentSwitch>(
        tx: &Transaction,
        view: &OpenView<S>,
        ctx: &ApplyContext<A>,
    ) -> Result<(), ApplyCode>;

    fn apply<S: NodeStore, A: AmendmentSwitch>(
        tx: &Transaction,
        view: &mut OpenView<S>,
        ctx: &ApplyContext<A>,
        meta: &mut TxMeta,
    ) -> Result<(), ApplyCode>;
}

/// Dispatch a preflight by payload type.
pub(crate) fn preflight_payload<A: AmendmentSwitch>(
    tx: &Transaction,
    amendments: &A,
    child_seq: LedgerSeq,
) -> Result<(), ApplyCode> {
    match tx.payload {
        TxPayload::Payment { .. } => PaymentTransactor::preflight(tx, amendments, child_seq),
        TxPayload::AccountSet => AccountSetTransactor::preflight(tx, amendments, child_seq),
    }
}

pub(crate) fn preclaim_payload<S: NodeStore, A: AmendmentSwitch>(
    tx: &Transaction,
    view: &OpenView<S>,
    ctx: &ApplyContext<A>,
) -> Result<(), ApplyCode> {
    match tx.payload {
        TxPayload::Payment { .. } => PaymentTransactor::preclaim(tx, view, ctx),
        TxPayload::AccountSet => AccountSetTransactor::preclaim(tx, view, ctx),
    }
}

pub(crate) fn apply_payload<S: NodeStore, A: AmendmentSwitch>(
    tx: &Transaction,
    view: &mut OpenView<S>,
    ctx: &ApplyContext<A>,
    meta: &mut TxMeta,
) -> Result<(), ApplyCode> {
    match tx.payload {
        TxPayload::Payment { .. } => PaymentTransactor::apply(tx, view, ctx, meta),
        TxPayload::AccountSet => AccountSetTransactor::apply(tx, view, ctx, meta),
    }
}

/// Moves drops between accounts, creating the destination if it is funded past the base
/// reserve.
pub(crate) struct PaymentTransactor;

impl Transactor for PaymentTransactor {
    fn preflight<A: AmendmentSwitch>(
        tx: &Transaction,
        _amendments: &A,
        _child_seq: LedgerSeq,
    ) -> Result<(), ApplyCode> {
        let TxPayload::Payment {
            destination,
            amount,
        } = &tx.payload
        else {
            return Err(ApplyCode::MalformedTransaction);
        };
        if amount.int() == 0 {
            return Err(ApplyCode::ZeroAmount);
        }
        if *destination == tx.account {
            return Err(ApplyCode::SelfPayment);
        }
        Ok(())
    }

    fn preclaim<S: NodeStore, A: AmendmentSwitch>(
        _tx: &Transaction,
        _view: &OpenView<S>,
        _ctx: &ApplyContext<A>,
    ) -> Result<(), ApplyCode> {
        // Destination funding is checked at apply time so a failing payment still claims
        // its fee rather than lingering as a retry.
        Ok(())
    }

    fn apply<S: NodeStore, A: AmendmentSwitch>(
        tx: &Transaction,
        view: &mut OpenView<S>,
        ctx: &ApplyContext<A>,
        meta: &mut TxMeta,
    ) -> Result<(), ApplyCode> {
        let TxPayload::Payment {
            destination,
            amount,
        } = &tx.payload
        else {
            return Err(ApplyCode::InvariantViolation);
        };
        let (destination, amount) = (*destination, *amount);

        let sender_key = account_key(&tx.account);
        let Some(StateEntry::AccountRoot {
            account,
            balance,
            sequence,
            owner_count,
        }) = view
            .read_entry(&sender_key)
            .map_err(|_| ApplyCode::InvariantViolation)?
        else {
            return Err(ApplyCode::InvariantViolation);
        };

        // The fee is already gone; the payment spends what remains above the reserve.
        let reserve = ctx.reserve(owner_count);
        let spendable = balance.saturating_sub(reserve);
        if amount > spendable {
            return Err(ApplyCode::UnfundedPayment);
        }

        let dest_key = account_key(&destination);
        match view
            .read_entry(&dest_key)
            .map_err(|_| ApplyCode::InvariantViolation)?
        {
            Some(StateEntry::AccountRoot {
                account: dest_account,
                balance: dest_balance,
                sequence: dest_sequence,
                owner_count: dest_owner_count,
            }) => {
                let credited = StateEntry::AccountRoot {
                    account: dest_account,
                    balance: dest_balance + amount,
                    sequence: dest_sequence,
                    owner_count: dest_owner_count,
                };
                view.replace(dest_key, credited.encode())
                    .map_err(|_| ApplyCode::InvariantViolation)?;
            }
            Some(_) => return Err(ApplyCode::InvariantViolation),
            None => {
                // Creating an account requires funding it to at least the base reserve.
                if amount < ctx.reserve_base {
                    return Err(ApplyCode::DestinationReserve);
                }
                let created = StateEntry::new_account(destination, amount);
                view.insert(dest_key, created.encode())
                    .map_err(|_| ApplyCode::InvariantViolation)?;
                meta.created_destination = true;
            }
        }

        let debited = StateEntry::AccountRoot {
            account,
            balance: balance.saturating_sub(amount),
            sequence,
            owner_count,
        };
        view.replace(sender_key, debited.encode())
            .map_err(|_| ApplyCode::InvariantViolation)?;

        meta.affected.push(destination);
        meta.delivered = Some(amount);
        Ok(())
    }
}

/// Administrative no-op: burns its fee and advances the sequence. Gated behind the
/// account-maintenance amendment.
pub(crate) struct AccountSetTransactor;

impl AccountSetTransactor {
    pub(crate) const FEATURE: &'static str = crate::amendments::FEATURE_ACCOUNT_MAINTENANCE;
}

impl Transactor for AccountSetTransactor {
    fn preflight<A: AmendmentSwitch>(
        tx: &Transaction,
        amendments: &A,
        child_seq: LedgerSeq,
    ) -> Result<(), ApplyCode> {
        if !amendments.is_enabled(&feature_id(Self::FEATURE), child_seq) {
            return Err(ApplyCode::FeatureDisabled);
        }
        match tx.payload {
            TxPayload::AccountSet => Ok(()),
            _ => Err(ApplyCode::MalformedTransaction),
        }
    }

    fn preclaim<S: NodeStore, A: AmendmentSwitch>(
        _tx: &Transaction,
        _view: &OpenView<S>,
        _ctx: &ApplyContext<A>,
    ) -> Result<(), ApplyCode> {
        Ok(())
    }

    fn apply<S: NodeStore, A: AmendmentSwitch>(
        _tx: &Transaction,
        _view: &mut OpenView<S>,
        _ctx: &ApplyContext<A>,
        _meta: &mut TxMeta,
    ) -> Result<(), ApplyCode> {
        Ok(())
    }
}
