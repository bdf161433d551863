//! Round behavior: convergence, dispute resolution under the escalating thresholds,
//! close-time voting, wrong-prior-ledger detection, and desync.

mod common;

use std::time::Duration;

use common::{keypair, payment};

use concord_rs::clock::ManualClock;
use concord_rs::consensus::round::{RoundConsensus, RoundEvent, RoundInputs};
use concord_rs::consensus::types::{Proposal, RoundPhase, TxSet};
use concord_rs::types::basic::{
    CloseResolution, LedgerSeq, NetTime, ProposalSeq,
};
use concord_rs::types::crypto_primitives::Keypair;
use concord_rs::types::hash::Hash256;
use concord_rs::types::validator_set::TrustedValidators;

const PREV_HASH: [u8; 32] = [7u8; 32];

fn inputs() -> RoundInputs {
    RoundInputs {
        prev_hash: Hash256::new(PREV_HASH),
        prev_seq: LedgerSeq::new(1),
        prev_close_time: NetTime::new(990),
        resolution: CloseResolution::new(30),
        prev_round_duration: Duration::from_secs(6),
    }
}

/// A round for `self_keypair` among `peer_count + 1` trusted validators. Returns the
/// round, the peers' keypairs, and the shared clock.
fn round_with_peers(
    self_seed: u8,
    peer_count: u8,
) -> (RoundConsensus<ManualClock>, Vec<Keypair>, ManualClock) {
    let me = keypair(self_seed);
    let peers: Vec<Keypair> = (1..=peer_count).map(|i| keypair(100 + i)).collect();
    let mut trusted = TrustedValidators::new();
    trusted.insert(me.public());
    for peer in &peers {
        trusted.insert(peer.public());
    }
    let clock = ManualClock::starting_at(NetTime::new(1_000));
    let round = RoundConsensus::new(clock.clone(), me, trusted, true, inputs());
    (round, peers, clock)
}

fn peer_proposal(
    peer: &Keypair,
    seq: u32,
    tx_set: Hash256,
    close_time: NetTime,
) -> Proposal {
    Proposal::new_signed(
        peer,
        LedgerSeq::new(2),
        ProposalSeq::new(seq),
        Hash256::new(PREV_HASH),
        tx_set,
        close_time,
    )
}

/// Drive to the establish phase with `candidates` as our position. Returns our initial
/// proposal.
fn close_with(
    round: &mut RoundConsensus<ManualClock>,
    clock: &ManualClock,
    candidates: TxSet,
) -> Proposal {
    round.note_transactions();
    clock.advance(Duration::from_secs(2));
    let events = round.tick();
    assert!(matches!(events.as_slice(), [RoundEvent::ReadyToClose]));
    round.close_ledger(candidates).expect("we are proposing")
}

fn find_accept(events: &[RoundEvent]) -> Option<&concord_rs::consensus::round::RoundResult> {
    events.iter().find_map(|event| match event {
        RoundEvent::Accept(result) => Some(result),
        _ => None,
    })
}

#[test]
fn unanimous_round_accepts_with_agreed_close_time() {
    let (mut round, peers, clock) = round_with_peers(1, 4);
    let set = TxSet::from_txs([payment(&keypair(50), 1, 10, &keypair(51), 500)]);

    let ours = close_with(&mut round, &clock, set.clone());
    // Network time 1002 rounds up to 1020 at the 30s resolution.
    assert_eq!(ours.close_time, NetTime::new(1_020));

    for peer in &peers {
        round
            .on_proposal(peer_proposal(peer, 0, set.hash(), NetTime::new(1_020)))
            .unwrap();
    }

    clock.advance(Duration::from_secs(2));
    let first = round.tick();
    assert!(find_accept(&first).is_none());
    let second = round.tick();
    let result = find_accept(&second).expect("unanimous round must accept");

    assert!(result.close_agreed);
    assert_eq!(result.close_time, NetTime::new(1_020));
    assert_eq!(result.tx_set.hash(), set.hash());
    assert_eq!(result.proposers, 5);
    assert_eq!(round.phase(), RoundPhase::Accepted);
}

#[test]
fn early_set_bodies_do_not_disturb_our_position() {
    let (mut round, peers, clock) = round_with_peers(1, 4);
    let tx = payment(&keypair(50), 1, 10, &keypair(51), 500);
    let set = TxSet::from_txs([tx.clone()]);

    // The set body arrives while the ledger is still open (fetched after an early
    // peer proposal), before our own position exists.
    round.on_tx_set(set.clone());

    // We then close with that very transaction in our candidate set, and every peer
    // agrees. Arrival order alone must not leave the transaction marked as one we
    // vote against.
    close_with(&mut round, &clock, set.clone());
    for peer in &peers {
        round
            .on_proposal(peer_proposal(peer, 0, set.hash(), NetTime::new(1_020)))
            .unwrap();
    }

    clock.advance(Duration::from_secs(2));
    let first = round.tick();
    assert!(
        !first
            .iter()
            .any(|event| matches!(event, RoundEvent::Propose(_))),
        "a position nobody disagrees with must not be re-proposed"
    );
    let tick_events = round.tick();
    let result = find_accept(&tick_events).expect("unanimous round must accept");
    assert!(result.tx_set.contains(&tx.id()));
}

#[test]
fn minority_transaction_is_voted_out() {
    let (mut round, peers, clock) = round_with_peers(1, 4);
    let disputed = payment(&keypair(50), 1, 10, &keypair(51), 500);
    let shared = payment(&keypair(52), 1, 10, &keypair(53), 500);

    let majority_set = TxSet::from_txs([shared.clone()]);
    let our_set = TxSet::from_txs([shared, disputed.clone()]);

    // The majority's set body is known before we close, so disputes form immediately.
    round.on_tx_set(majority_set.clone());
    close_with(&mut round, &clock, our_set);
    for peer in &peers {
        round
            .on_proposal(peer_proposal(peer, 0, majority_set.hash(), NetTime::new(1_020)))
            .unwrap();
    }

    // One yes (ours) against four no: 20% is under every threshold, so the first tick
    // flips our vote and re-proposes.
    let events = round.tick();
    let reproposal = events
        .iter()
        .find_map(|event| match event {
            RoundEvent::Propose(proposal) => Some(proposal.clone()),
            _ => None,
        })
        .expect("losing a dispute forces a new proposal");
    assert_eq!(reproposal.seq, ProposalSeq::new(1));
    assert_eq!(reproposal.tx_set, majority_set.hash());
    assert!(!round.position().contains(&disputed.id()));

    // With positions aligned the round accepts the majority set.
    clock.advance(Duration::from_secs(2));
    round.tick();
    let events = round.tick();
    let result = find_accept(&events).expect("aligned positions must accept");
    assert_eq!(result.tx_set.hash(), majority_set.hash());
}

#[test]
fn split_close_times_accept_without_time_consensus() {
    let (mut round, peers, clock) = round_with_peers(1, 4);
    let set = TxSet::new();

    close_with(&mut round, &clock, set.clone());
    // Everyone agrees on the (empty) set but lands in a different close-time bin.
    for (i, peer) in peers.iter().enumerate() {
        let scattered = NetTime::new(1_020 + 60 * (i as u32 + 1));
        round
            .on_proposal(peer_proposal(peer, 0, set.hash(), scattered))
            .unwrap();
    }

    // No bin can reach 75%, so acceptance waits for the give-up point past twice the
    // previous round duration.
    clock.advance(Duration::from_secs(3));
    assert!(find_accept(&round.tick()).is_none());

    clock.advance(Duration::from_secs(11));
    let mut events = round.tick();
    if find_accept(&events).is_none() {
        events = round.tick();
    }
    let result = find_accept(&events).expect("set agreement without time agreement");
    assert!(!result.close_agreed);
    // Deterministic fallback: the parent's close time plus one resolution unit.
    assert_eq!(result.close_time, NetTime::new(990 + 30));
}

#[test]
fn majority_on_other_prior_ledger_aborts_the_round() {
    let (mut round, peers, clock) = round_with_peers(1, 4);
    let other_prev = Hash256::new([9u8; 32]);
    let set = TxSet::new();

    close_with(&mut round, &clock, set.clone());

    // Three of five voters (us included) name a different prior ledger.
    for peer in peers.iter().take(3) {
        let proposal = Proposal::new_signed(
            peer,
            LedgerSeq::new(2),
            ProposalSeq::INITIAL,
            other_prev,
            set.hash(),
            NetTime::new(1_020),
        );
        round.on_proposal(proposal).unwrap();
    }

    let events = round.tick();
    assert!(events
        .iter()
        .any(|event| matches!(event, RoundEvent::WrongPriorLedger(hash) if *hash == other_prev)));
}

#[test]
fn hopeless_round_desyncs_at_the_hard_limit() {
    let (mut round, peers, clock) = round_with_peers(1, 4);
    let set = TxSet::new();

    close_with(&mut round, &clock, set);

    // Two camps the node can never reconcile: it knows neither set body, so its own
    // position stays a minority of one. The peers keep their proposals fresh, so the
    // round can neither accept nor shed them.
    let mut desynced = false;
    for i in 0..14u32 {
        for (k, peer) in peers.iter().enumerate() {
            let camp = Hash256::new([10 + (k as u8 % 2); 32]);
            round
                .on_proposal(peer_proposal(peer, i, camp, NetTime::new(1_020)))
                .unwrap();
        }
        clock.advance(Duration::from_secs(10));
        let events = round.tick();
        assert!(
            find_accept(&events).is_none(),
            "a 20% position must never reach consensus"
        );
        if events
            .iter()
            .any(|event| matches!(event, RoundEvent::Desync))
        {
            desynced = true;
            break;
        }
    }
    assert!(desynced);

    // A desynced round goes quiet.
    assert!(round.tick().is_empty());
}

#[test]
fn stale_proposals_stop_counting() {
    let (mut round, peers, clock) = round_with_peers(1, 4);
    let set = TxSet::new();

    close_with(&mut round, &clock, set.clone());
    for peer in &peers {
        round
            .on_proposal(peer_proposal(peer, 0, set.hash(), NetTime::new(1_020)))
            .unwrap();
    }

    // Left alone past the freshness window, the peers' positions expire and the node
    // is effectively alone; it still converges (a lone voter agrees with itself), but
    // the proposer count reflects the expiry.
    clock.advance(Duration::from_secs(25));
    round.tick();
    let events = round.tick();
    let result = find_accept(&events).expect("a lone voter agrees with itself");
    assert_eq!(result.proposers, 1);
}

#[test]
fn bowed_out_peers_leave_the_vote() {
    let (mut round, peers, clock) = round_with_peers(1, 4);
    let set = TxSet::new();

    close_with(&mut round, &clock, set.clone());
    for peer in &peers {
        round
            .on_proposal(peer_proposal(peer, 0, set.hash(), NetTime::new(1_020)))
            .unwrap();
    }
    // One peer bows out of the round entirely.
    round
        .on_proposal(peer_proposal(
            &peers[0],
            ProposalSeq::BOW_OUT.int(),
            set.hash(),
            NetTime::new(1_020),
        ))
        .unwrap();

    clock.advance(Duration::from_secs(2));
    round.tick();
    let tick_events = round.tick();
    let result = find_accept(&tick_events).expect("remaining peers still agree");
    assert_eq!(result.proposers, 4);
}
