use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use nav_negotiation::engine::NegotiationPolicy;
use nav_negotiation::{
    CounterpartId, NegotiationCategory, NegotiationError, NegotiationMessage, NegotiationStatus,
    NegotiationStore, NegotiationTransaction, Origin, ReconciliationCache, SharedTransaction,
    TransactionId,
};

const ROUTE: NegotiationCategory = NegotiationCategory::StrategicRoute;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
}

fn request(id: u64, secs: i64) -> NegotiationTransaction<String> {
    NegotiationTransaction::open(
        TransactionId::new(id),
        CounterpartId::new("stcc://sound-vts"),
        ROUTE,
        NegotiationMessage::proposal(Origin::Requester, format!("route-{id}"), at(secs)),
    )
    .unwrap()
}

#[derive(Debug, Clone, Copy)]
enum Move {
    Propose,
    Agree,
    Reject,
    Cancel,
}

fn random_move(rng: &mut StdRng) -> (Origin, Move) {
    let origin = if rng.gen_bool(0.5) {
        Origin::Requester
    } else {
        Origin::Authority
    };
    let kind = match rng.gen_range(0..10) {
        0 => Move::Agree,
        1 => Move::Reject,
        2 => Move::Cancel,
        _ => Move::Propose,
    };
    (origin, kind)
}

fn message_for(origin: Origin, kind: Move, secs: i64) -> NegotiationMessage<String> {
    match kind {
        Move::Propose => NegotiationMessage::proposal(origin, format!("p{secs}"), at(secs)),
        Move::Agree => NegotiationMessage::new(origin, at(secs)).with_status(NegotiationStatus::Agreed),
        Move::Reject => NegotiationMessage::reject(origin, at(secs)),
        Move::Cancel => {
            NegotiationMessage::new(origin, at(secs)).with_status(NegotiationStatus::Canceled)
        }
    }
}

/// Status after `kind` by `by`, or None if the move must be refused
fn expected_status(
    current: NegotiationStatus,
    last_by: Origin,
    by: Origin,
    kind: Move,
) -> Option<NegotiationStatus> {
    if current != NegotiationStatus::Pending {
        return None;
    }
    match (kind, by, last_by) {
        (Move::Propose, Origin::Requester, Origin::Authority)
        | (Move::Propose, Origin::Authority, Origin::Requester) => Some(NegotiationStatus::Pending),
        (Move::Propose, _, _) => None,
        (Move::Agree, Origin::Requester, Origin::Authority) => Some(NegotiationStatus::Agreed),
        (Move::Agree, _, _) => None,
        (Move::Reject, _, _) => Some(NegotiationStatus::Rejected),
        (Move::Cancel, Origin::Requester, _) => Some(NegotiationStatus::Canceled),
        (Move::Cancel, Origin::Authority, _) => None,
    }
}

#[test]
fn random_histories_follow_turn_rules() {
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for round in 0..200u64 {
        let store = NegotiationStore::new(ROUTE);
        let id = TransactionId::new(round);
        store.insert(request(round, 0)).unwrap();

        let mut status = NegotiationStatus::Pending;
        let mut last_by = Origin::Requester;
        let mut accepted = 1;

        for step in 1..20 {
            let (by, kind) = random_move(&mut rng);
            let result = store.append_message(id, message_for(by, kind, step));

            match expected_status(status, last_by, by, kind) {
                Some(next) => {
                    assert_eq!(result, Ok(next), "round {round} step {step}: {by:?} {kind:?}");
                    status = next;
                    last_by = by;
                    accepted += 1;
                }
                None => assert!(
                    result.is_err(),
                    "round {round} step {step}: {by:?} {kind:?} should be refused"
                ),
            }

            let tx = store.get_transaction(id).unwrap();
            assert_eq!(tx.status(), status);
            assert_eq!(tx.messages().len(), accepted);
            assert_eq!(tx.latest_message().map(|m| m.origin()), Some(last_by));
        }
    }
}

#[test]
fn accept_flow() {
    let store = NegotiationStore::new(ROUTE);
    let id = TransactionId::new(1);
    store.insert(request(1, 0)).unwrap();

    assert_eq!(
        store
            .append_message(
                id,
                NegotiationMessage::proposal(Origin::Authority, "route-a".to_string(), at(1))
            )
            .unwrap(),
        NegotiationStatus::Pending
    );
    assert_eq!(
        store
            .append_message(id, NegotiationMessage::agree(at(2)))
            .unwrap(),
        NegotiationStatus::Agreed
    );

    let err = store
        .append_message(id, NegotiationMessage::reject(Origin::Authority, at(3)))
        .unwrap_err();
    assert!(matches!(err, NegotiationError::TransactionClosed { .. }));
}

#[test]
fn consecutive_requester_proposals_are_out_of_turn() {
    let store = NegotiationStore::new(ROUTE);
    let id = TransactionId::new(5);
    store.insert(request(5, 0)).unwrap();

    let err = store
        .append_message(
            id,
            NegotiationMessage::proposal(Origin::Requester, "again".to_string(), at(1)),
        )
        .unwrap_err();
    assert_eq!(
        err,
        NegotiationError::OutOfTurn {
            id,
            origin: Origin::Requester
        }
    );
}

#[test]
fn snapshot_merge_is_idempotent_and_never_removes() {
    let store = NegotiationStore::new(ROUTE);
    store.insert(request(1, 0)).unwrap();

    let mut remote = request(1, 0);
    remote
        .append(NegotiationMessage::proposal(Origin::Authority, "b".to_string(), at(5)))
        .unwrap();
    let view = vec![remote, request(2, 10)];

    let first = store.apply_snapshot(view.clone());
    assert_eq!(first.inserted, 1);
    assert_eq!(first.updated, 1);
    let after_first: Vec<_> = store
        .list_all()
        .iter()
        .map(|tx| (tx.id(), tx.messages().len(), tx.status()))
        .collect();

    let second = store.apply_snapshot(view);
    assert!(!second.changed());
    let after_second: Vec<_> = store
        .list_all()
        .iter()
        .map(|tx| (tx.id(), tx.messages().len(), tx.status()))
        .collect();
    assert_eq!(after_first, after_second);

    // Partial view: nothing disappears
    store.apply_snapshot(Vec::new());
    assert_eq!(store.len(), 2);
    // Newest first
    assert_eq!(store.list_all()[0].id(), TransactionId::new(2));
}

#[test]
fn refresh_keeps_read_flag_and_takes_new_value() {
    let store = NegotiationStore::new(ROUTE);
    let id = TransactionId::new(3);
    store.insert(request(3, 0)).unwrap();

    let cache: ReconciliationCache<SharedTransaction<String>> = ReconciliationCache::new(
        Arc::new(NegotiationPolicy::<String>::new(ROUTE, Origin::Requester, false)),
    );
    cache.refresh(&store.list_all());
    assert!(cache.mark_read(&id));

    store
        .append_message(
            id,
            NegotiationMessage::proposal(Origin::Authority, "counter".to_string(), at(1)),
        )
        .unwrap();
    let changes = cache.refresh(&store.list_all());
    assert_eq!(changes.updated.len(), 1);

    let n = cache.get(&id).unwrap();
    assert!(n.is_read());
    assert_eq!(n.get().messages().len(), 2);
    assert_eq!(
        n.get().latest_payload().map(|p| p.as_str()),
        Some("counter")
    );

    // Resolved transactions first seen after closing start acknowledged
    let mut closed = request(4, 2);
    closed
        .append(NegotiationMessage::reject(Origin::Authority, at(3)))
        .unwrap();
    store.insert(closed).unwrap();
    cache.refresh(&store.list_all());
    let n = cache.get(&TransactionId::new(4)).unwrap();
    assert!(n.is_acknowledged());
    assert!(!n.is_read());
}
