//! Fee escalation and admission queue behavior: the escalation literals, replacement
//! margins, capacity, drain order, and expiry sweeps.

mod common;

use std::sync::Arc;

use common::{keypair, payment, payment_with_expiry};

use concord_rs::amendments::AllEnabled;
use concord_rs::apply::result::ApplyCode;
use concord_rs::apply::ApplyContext;
use concord_rs::config::QueueSetup;
use concord_rs::fees::FeeMetrics;
use concord_rs::ledger::ledger::Ledger;
use concord_rs::ledger::open_view::OpenView;
use concord_rs::queue::{AdmissionQueue, AdmitOutcome};
use concord_rs::store::MemStore;
use concord_rs::types::basic::{CloseResolution, Drops, FeeLevel, LedgerSeq, SequenceNumber};
use concord_rs::types::crypto_primitives::Keypair;

/// A context whose reference fee of 256 drops makes fee levels equal declared fees,
/// which keeps the literals in these tests exact.
fn ctx() -> ApplyContext<AllEnabled> {
    ApplyContext {
        amendments: AllEnabled,
        reference_fee: Drops::new(256),
        reserve_base: Drops::new(200),
        reserve_increment: Drops::new(50),
    }
}

fn escalation_setup() -> QueueSetup {
    QueueSetup {
        minimum_txn_in_ledger: 5,
        target_txn_in_ledger: 50,
        maximum_txn_in_ledger: None,
        minimum_escalation_multiplier: 500,
        ..QueueSetup::default()
    }
}

/// A genesis funding one account per keypair.
fn funded_genesis(accounts: &[(&Keypair, u64)]) -> Ledger<MemStore> {
    let seed: Vec<_> = accounts
        .iter()
        .map(|(keypair, balance)| (keypair.account(), Drops::new(*balance)))
        .collect();
    Ledger::genesis(MemStore::new(), &seed, CloseResolution::new(30)).unwrap()
}

#[test]
fn escalation_kicks_in_past_expected_capacity() {
    let senders: Vec<Keypair> = (1u8..=8).map(keypair).collect();
    let receiver = keypair(100);
    let accounts: Vec<(&Keypair, u64)> =
        senders.iter().map(|keypair| (keypair, 10_000_000u64)).collect();
    let genesis = funded_genesis(&accounts);

    let metrics = Arc::new(FeeMetrics::new(&escalation_setup()));
    let queue = AdmissionQueue::new(escalation_setup(), metrics.clone());
    let mut view = OpenView::new(&genesis);
    let ctx = ctx();

    // Five transactions at exactly the base level sail in.
    for sender in senders.iter().take(5) {
        assert_eq!(metrics.required_level(view.tx_count()), FeeLevel::BASE);
        let outcome = queue.admit(&mut view, payment(sender, 1, 256, &receiver, 1_000), &ctx);
        assert_eq!(outcome.unwrap(), AdmitOutcome::Applied(ApplyCode::Applied));
    }

    // The sixth still pays base (five in the ledger is exactly expected capacity)...
    let outcome = queue.admit(
        &mut view,
        payment(&senders[5], 1, 256, &receiver, 1_000),
        &ctx,
    );
    assert_eq!(outcome.unwrap(), AdmitOutcome::Applied(ApplyCode::Applied));

    // ...after which the wall goes up: 256 · 500 · 6² / 5².
    assert_eq!(
        metrics.required_level(view.tx_count()),
        FeeLevel::new(184_320)
    );

    // One drop level short waits in the queue; meeting the level exactly applies.
    let outcome = queue.admit(
        &mut view,
        payment(&senders[6], 1, 184_319, &receiver, 1_000),
        &ctx,
    );
    assert_eq!(outcome.unwrap(), AdmitOutcome::Queued);
    let outcome = queue.admit(
        &mut view,
        payment(&senders[7], 1, 184_320, &receiver, 1_000),
        &ctx,
    );
    assert_eq!(outcome.unwrap(), AdmitOutcome::Applied(ApplyCode::Applied));
}

#[test]
fn replacement_requires_the_retry_margin() {
    let sender = keypair(1);
    let receiver = keypair(2);
    let genesis = funded_genesis(&[(&sender, 10_000_000)]);

    let metrics = Arc::new(FeeMetrics::new(&escalation_setup()));
    let queue = AdmissionQueue::new(escalation_setup(), metrics);
    let mut view = OpenView::new(&genesis);
    let ctx = ctx();

    // Sequence 7 is in the future for this account, so the transaction queues.
    let outcome = queue.admit(&mut view, payment(&sender, 7, 1_000, &receiver, 500), &ctx);
    assert_eq!(outcome.unwrap(), AdmitOutcome::Queued);
    assert_eq!(
        queue.queued_level(&sender.account(), SequenceNumber::new(7)),
        Some(FeeLevel::new(1_000))
    );

    // Replacement needs 25% more: 1249 is short, 1250 takes the slot.
    let outcome = queue.admit(&mut view, payment(&sender, 7, 1_249, &receiver, 500), &ctx);
    assert_eq!(
        outcome.unwrap(),
        AdmitOutcome::Rejected(ApplyCode::FeeBelowReplacement)
    );
    let outcome = queue.admit(&mut view, payment(&sender, 7, 1_250, &receiver, 500), &ctx);
    assert_eq!(outcome.unwrap(), AdmitOutcome::Queued);
    assert_eq!(queue.len(), 1);
    assert_eq!(
        queue.queued_level(&sender.account(), SequenceNumber::new(7)),
        Some(FeeLevel::new(1_250))
    );
}

#[test]
fn full_queue_evicts_only_for_better_fees() {
    let alice = keypair(1);
    let bob = keypair(2);
    let carol = keypair(3);
    let dave = keypair(4);
    let receiver = keypair(100);
    let genesis = funded_genesis(&[
        (&alice, 10_000_000),
        (&bob, 10_000_000),
        (&carol, 10_000_000),
        (&dave, 10_000_000),
    ]);

    // Capacity: one ledger's worth of two expected transactions.
    let setup = QueueSetup {
        ledgers_in_queue: 1,
        minimum_txn_in_ledger: 2,
        target_txn_in_ledger: 2,
        ..QueueSetup::default()
    };
    let metrics = Arc::new(FeeMetrics::new(&setup));
    let queue = AdmissionQueue::new(setup, metrics);
    let mut view = OpenView::new(&genesis);
    let ctx = ctx();
    assert_eq!(queue.max_size(), 2);

    // Future sequences keep everything in the queue rather than the ledger.
    assert_eq!(
        queue
            .admit(&mut view, payment(&alice, 5, 300, &receiver, 100), &ctx)
            .unwrap(),
        AdmitOutcome::Queued
    );
    assert_eq!(
        queue
            .admit(&mut view, payment(&bob, 5, 400, &receiver, 100), &ctx)
            .unwrap(),
        AdmitOutcome::Queued
    );

    // Full, and 200 does not beat the cheapest entry.
    assert_eq!(
        queue
            .admit(&mut view, payment(&carol, 5, 200, &receiver, 100), &ctx)
            .unwrap(),
        AdmitOutcome::Rejected(ApplyCode::QueueFull)
    );

    // 500 displaces the 300.
    assert_eq!(
        queue
            .admit(&mut view, payment(&dave, 5, 500, &receiver, 100), &ctx)
            .unwrap(),
        AdmitOutcome::Queued
    );
    assert_eq!(queue.len(), 2);
    assert_eq!(
        queue.queued_level(&alice.account(), SequenceNumber::new(5)),
        None
    );
}

#[test]
fn drain_applies_in_fee_order_once_sequences_line_up() {
    let sender = keypair(1);
    let receiver = keypair(2);
    let genesis = funded_genesis(&[(&sender, 10_000_000)]);

    let metrics = Arc::new(FeeMetrics::new(&escalation_setup()));
    let queue = AdmissionQueue::new(escalation_setup(), metrics);
    let mut view = OpenView::new(&genesis);
    let ctx = ctx();

    // Sequences 2 and 3 cannot apply while the account sits at 1; they queue. The
    // follow-on margin (25% over base 256) is cleared by the 400-level fees.
    for seq in [2u32, 3] {
        assert_eq!(
            queue
                .admit(&mut view, payment(&sender, seq, 400, &receiver, 100), &ctx)
                .unwrap(),
            AdmitOutcome::Queued
        );
    }
    assert_eq!(queue.len(), 2);

    // Sequence 1 applies directly and unblocks the chain.
    assert_eq!(
        queue
            .admit(&mut view, payment(&sender, 1, 256, &receiver, 100), &ctx)
            .unwrap(),
        AdmitOutcome::Applied(ApplyCode::Applied)
    );

    let applied = queue.drain(&mut view, &ctx).unwrap();
    assert_eq!(applied, 2);
    assert!(queue.is_empty());
    assert_eq!(view.tx_count(), 3);
}

#[test]
fn sweep_expires_stale_transactions_and_shrinks_the_cap() {
    let sender = keypair(1);
    let receiver = keypair(2);
    let genesis = funded_genesis(&[(&sender, 10_000_000)]);

    let metrics = Arc::new(FeeMetrics::new(&escalation_setup()));
    let queue = AdmissionQueue::new(escalation_setup(), metrics);
    let mut view = OpenView::new(&genesis);
    let ctx = ctx();

    let expiring = payment_with_expiry(&sender, 5, 400, &receiver, 100, 3);
    assert_eq!(
        queue.admit(&mut view, expiring, &ctx).unwrap(),
        AdmitOutcome::Queued
    );
    let lasting = payment_with_expiry(&sender, 6, 400, &receiver, 100, 100);
    assert_eq!(
        queue.admit(&mut view, lasting, &ctx).unwrap(),
        AdmitOutcome::Queued
    );

    // Closing ledger 2 keeps both; closing ledger 3 expires the first.
    queue.on_ledger_closed(LedgerSeq::new(2));
    assert_eq!(queue.len(), 2);
    queue.on_ledger_closed(LedgerSeq::new(3));
    assert_eq!(queue.len(), 1);
    assert_eq!(
        queue.queued_level(&sender.account(), SequenceNumber::new(5)),
        None
    );

    // The cap never goes below one ledger's worth after any sweep.
    assert!(queue.max_size() >= queue.len());
}

#[test]
fn overcommitted_accounts_cannot_stack_the_queue() {
    let sender = keypair(1);
    let receiver = keypair(2);
    // Enough for the reserve, one queued payment, and little more.
    let genesis = funded_genesis(&[(&sender, 3_000)]);

    let metrics = Arc::new(FeeMetrics::new(&escalation_setup()));
    let queue = AdmissionQueue::new(escalation_setup(), metrics);
    let mut view = OpenView::new(&genesis);
    let ctx = ctx();

    // Commits 256 fee + 2000 amount against 3000 - 200 reserve = 2800 spendable.
    assert_eq!(
        queue
            .admit(&mut view, payment(&sender, 5, 256, &receiver, 2_000), &ctx)
            .unwrap(),
        AdmitOutcome::Queued
    );

    // A second queued payment would overcommit the balance.
    assert_eq!(
        queue
            .admit(&mut view, payment(&sender, 6, 256, &receiver, 2_000), &ctx)
            .unwrap(),
        AdmitOutcome::Rejected(ApplyCode::Overcommitted)
    );
}
