//! Integration Tests for the negotiation engine
//!
//! A vessel-side and a shore-side service share one in-memory backend, so
//! every scenario runs through the same send / fetch / merge / reconcile
//! path as a live client.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::watch;

use super::{NegotiationService, PollConfig, PollWorker, SharedTransaction};
use crate::negotiation::{
    CounterpartId, NegotiationCategory, NegotiationError, NegotiationMessage, NegotiationStatus,
    NegotiationTransaction, Origin, TransactionId,
};
use crate::notification::{
    FnListener, NotificationAlert, NotificationEvent, NotificationListener, NotificationSeverity,
};
use crate::transport::{
    ConnectionState, CounterpartEndpoint, InMemoryTransport, NegotiationTransport,
    OutgoingMessage, SendAck, TransportError,
};

const ROUTE: NegotiationCategory = NegotiationCategory::StrategicRoute;

fn stcc() -> CounterpartId {
    CounterpartId::new("stcc://sound-vts")
}

fn vessel() -> CounterpartId {
    CounterpartId::new("mmsi://219000123")
}

/// Vessel and STCC clients over one backend
struct TestHarness {
    transport: Arc<InMemoryTransport<String>>,
    ship: Arc<NegotiationService<String>>,
    shore: Arc<NegotiationService<String>>,
}

impl TestHarness {
    fn new() -> Self {
        let transport = Arc::new(InMemoryTransport::new());
        transport.connect();
        let dyn_transport: Arc<dyn NegotiationTransport<String>> = transport.clone();

        let ship = Arc::new(NegotiationService::new(
            ROUTE,
            Origin::Requester,
            dyn_transport.clone(),
            false,
        ));
        let shore = Arc::new(NegotiationService::with_policy(
            ROUTE,
            Origin::Authority,
            dyn_transport,
            Arc::new(super::NegotiationPolicy::<String>::new(ROUTE, Origin::Authority, true)),
            2,
        ));
        Self {
            transport,
            ship,
            shore,
        }
    }
}

/// Delivers a message, then lets the sender poll before it sees the ack
///
/// Reproduces the poll loop merging our own message between send and append.
struct PollOnSendTransport {
    inner: Arc<InMemoryTransport<String>>,
    sender: OnceLock<Weak<NegotiationService<String>>>,
}

#[async_trait]
impl NegotiationTransport<String> for PollOnSendTransport {
    fn name(&self) -> &'static str {
        "poll-on-send"
    }

    fn connectivity(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connectivity()
    }

    async fn fetch_transactions(
        &self,
        category: NegotiationCategory,
    ) -> Result<Vec<NegotiationTransaction<String>>, TransportError> {
        self.inner.fetch_transactions(category).await
    }

    async fn send_message(
        &self,
        outgoing: &OutgoingMessage<String>,
    ) -> Result<SendAck, TransportError> {
        let ack = self.inner.send_message(outgoing).await?;
        if let Some(sender) = self.sender.get().and_then(Weak::upgrade) {
            sender.poll_once().await?;
        }
        Ok(ack)
    }

    async fn discover_counterparts(
        &self,
        category: NegotiationCategory,
    ) -> Result<Vec<CounterpartEndpoint>, TransportError> {
        self.inner.discover_counterparts(category).await
    }
}

/// Requester whose every send is followed by a poll of its own
fn polling_ship(backend: &Arc<InMemoryTransport<String>>) -> Arc<NegotiationService<String>> {
    let transport = Arc::new(PollOnSendTransport {
        inner: backend.clone(),
        sender: OnceLock::new(),
    });
    let ship = Arc::new(NegotiationService::<String>::new(
        ROUTE,
        Origin::Requester,
        transport.clone(),
        false,
    ));
    let _ = transport.sender.set(Arc::downgrade(&ship));
    ship
}

/// Comparable projection of a snapshot: id, revision, status and flags
fn digest(
    service: &NegotiationService<String>,
) -> Vec<(TransactionId, usize, NegotiationStatus, bool, bool)> {
    service
        .snapshot()
        .iter()
        .map(|n| {
            (
                *n.id(),
                n.get().messages().len(),
                n.get().status(),
                n.is_read(),
                n.is_acknowledged(),
            )
        })
        .collect()
}

// ============================================================================
// Happy Path Tests
// ============================================================================

/// Request → STCC counter-proposal → vessel accepts
#[tokio::test]
async fn test_accept_flow_between_ship_and_shore() {
    let h = TestHarness::new();

    let id = h
        .ship
        .open(stcc(), "route-a".to_string(), "Requesting approval")
        .await
        .unwrap();
    assert_eq!(h.ship.transaction(id).unwrap().status(), NegotiationStatus::Pending);
    let actions = h.ship.available_actions(id).unwrap();
    assert!(!actions.accept);
    assert!(!actions.counter);
    assert!(actions.cancel);

    // Shore learns about the request through a poll
    let outcome = h.shore.poll_once().await.unwrap();
    assert_eq!(outcome.snapshot.inserted, 1);
    assert_eq!(outcome.added, 1);
    let incoming = h.shore.notification(id).unwrap();
    assert_eq!(incoming.severity(), NotificationSeverity::Warning);
    assert_eq!(
        incoming.alerts(),
        &[NotificationAlert::Popup, NotificationAlert::Beep]
    );

    h.shore
        .reply(id, "route-b".to_string(), "Use the eastern lane")
        .await
        .unwrap();

    let outcome = h.ship.poll_once().await.unwrap();
    assert_eq!(outcome.snapshot.updated, 1);
    assert_eq!(outcome.updated, 1);
    let tx = h.ship.transaction(id).unwrap();
    assert_eq!(tx.latest_payload().map(|p| p.as_str()), Some("route-b"));
    assert!(h.ship.available_actions(id).unwrap().accept);

    let status = h.ship.accept(id, "Thanks").await.unwrap();
    assert_eq!(status, NegotiationStatus::Agreed);
    assert!(!h.ship.available_actions(id).unwrap().any());

    // Closed on both sides
    h.shore.poll_once().await.unwrap();
    assert_eq!(h.shore.transaction(id).unwrap().status(), NegotiationStatus::Agreed);
    let err = h
        .shore
        .reply(id, "route-c".to_string(), "")
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::TransactionClosed { .. }));
}

/// Request → cancel; the read flag survives later refreshes
#[tokio::test]
async fn test_cancel_flow_keeps_read_flag() {
    let h = TestHarness::new();
    let id = h.ship.open(stcc(), "route-a".to_string(), "").await.unwrap();

    let status = h.ship.cancel(id, "changed plans").await.unwrap();
    assert_eq!(status, NegotiationStatus::Canceled);
    let tx = h.ship.transaction(id).unwrap();
    assert_eq!(tx.latest_message().and_then(|m| m.comment()), Some("changed plans"));

    assert!(h.ship.mark_read(id));
    h.ship.poll_once().await.unwrap();
    h.ship.poll_once().await.unwrap();

    let n = h.ship.notification(id).unwrap();
    assert!(n.is_read());
    assert_eq!(n.get().status(), NegotiationStatus::Canceled);
    assert_eq!(h.ship.unread_count(), 0);
}

#[tokio::test]
async fn test_cancel_without_reason_uses_default_comment() {
    let h = TestHarness::new();
    let id = h.ship.open(stcc(), "route-a".to_string(), "").await.unwrap();
    h.ship.cancel(id, "").await.unwrap();

    let remote = h.transport.remote_transaction(ROUTE, id).unwrap();
    assert_eq!(
        remote.latest_message().and_then(|m| m.comment()),
        Some("Request cancelled")
    );
}

/// The authority assigns a SAR task; the unit sees it as a new notification
#[tokio::test]
async fn test_remote_task_appears_as_new_notification() {
    let transport = Arc::new(InMemoryTransport::<String>::new());
    transport.connect();
    let sru = NegotiationService::<String>::new(
        NegotiationCategory::SarTask,
        Origin::Requester,
        transport.clone(),
        true,
    );

    let id = TransactionId::new(42);
    transport
        .push_remote(
            NegotiationCategory::SarTask,
            id,
            CounterpartId::new("sar://jrcc"),
            NegotiationMessage::proposal(Origin::Authority, "sector-7".to_string(), chrono::Utc::now())
                .with_comment("Search sector 7"),
        )
        .unwrap();

    let outcome = sru.poll_once().await.unwrap();
    assert_eq!(outcome.added, 1);
    let n = sru.notification(id).unwrap();
    assert!(!n.is_acknowledged());
    assert!(n.is_auto_acknowledge());
    assert_eq!(n.target_id(), Some("sar://jrcc"));

    // Auto-acknowledge: reading acknowledges
    assert!(sru.mark_read(id));
    assert!(sru.notification(id).unwrap().is_acknowledged());
    assert!(!sru.mark_acknowledged(id));

    // Other categories are not mixed in
    assert!(transport.fetch_transactions(ROUTE).await.unwrap().is_empty());
}

// ============================================================================
// Error Path Tests
// ============================================================================

/// A failed send leaves the transaction untouched and reports the transport error
#[tokio::test]
async fn test_send_failure_leaves_transaction_pending() {
    let h = TestHarness::new();
    let id = h.ship.open(stcc(), "route-a".to_string(), "").await.unwrap();
    h.shore.poll_once().await.unwrap();
    h.shore.reply(id, "route-b".to_string(), "").await.unwrap();
    h.ship.poll_once().await.unwrap();

    h.transport.set_fail_send(true);
    let err = h.ship.accept(id, "ok").await.unwrap_err();
    assert!(matches!(
        err,
        NegotiationError::Transport(TransportError::SendFailed(_))
    ));
    assert_eq!(err.code(), "TRANSPORT");

    let tx = h.ship.transaction(id).unwrap();
    assert_eq!(tx.status(), NegotiationStatus::Pending);
    assert_eq!(tx.messages().len(), 2);

    // Nothing is resent automatically; the user retries
    h.transport.set_fail_send(false);
    assert_eq!(h.ship.accept(id, "ok").await.unwrap(), NegotiationStatus::Agreed);
}

#[tokio::test]
async fn test_local_validation_happens_before_send() {
    let h = TestHarness::new();
    let id = h.ship.open(stcc(), "route-a".to_string(), "").await.unwrap();
    let sends = h.transport.send_count();

    // Own proposal is latest: no accept, no second proposal
    let err = h.ship.accept(id, "").await.unwrap_err();
    assert!(matches!(err, NegotiationError::OutOfTurn { .. }));
    let err = h.ship.reply(id, "route-b".to_string(), "").await.unwrap_err();
    assert!(matches!(err, NegotiationError::OutOfTurn { .. }));

    // Authority may neither cancel nor agree
    h.shore.poll_once().await.unwrap();
    let err = h.shore.cancel(id, "").await.unwrap_err();
    assert!(matches!(err, NegotiationError::NotPermitted { .. }));

    let err = h.ship.reject(TransactionId::new(1), "").await.unwrap_err();
    assert_eq!(err, NegotiationError::UnknownTransaction(TransactionId::new(1)));

    assert_eq!(h.transport.send_count(), sends);
}

#[tokio::test]
async fn test_rejected_transaction_is_closed() {
    let h = TestHarness::new();
    let id = h.ship.open(stcc(), "route-a".to_string(), "").await.unwrap();
    h.shore.poll_once().await.unwrap();

    assert_eq!(
        h.shore.reject(id, "Lane closed").await.unwrap(),
        NegotiationStatus::Rejected
    );
    h.ship.poll_once().await.unwrap();

    let err = h.ship.cancel(id, "").await.unwrap_err();
    assert!(matches!(err, NegotiationError::TransactionClosed { .. }));
}

// ============================================================================
// Reconciliation & Listener Tests
// ============================================================================

#[tokio::test]
async fn test_listeners_see_each_change_once() {
    let h = TestHarness::new();
    let seen: Arc<Mutex<Vec<(&'static str, TransactionId)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: Arc<dyn NotificationListener<SharedTransaction<String>>> =
        Arc::new(FnListener::new(
            move |event: &NotificationEvent<SharedTransaction<String>, TransactionId>| {
                sink.lock().unwrap().push((event.kind(), *event.id()));
            },
        ));
    assert!(h.ship.subscribe(listener.clone()));
    assert!(!h.ship.subscribe(listener.clone()));

    let id = h.ship.open(stcc(), "route-a".to_string(), "").await.unwrap();
    // No remote change: no events
    h.ship.poll_once().await.unwrap();
    h.shore.poll_once().await.unwrap();
    h.shore.reply(id, "route-b".to_string(), "").await.unwrap();
    h.ship.poll_once().await.unwrap();
    h.ship.mark_read(id);
    h.ship.mark_read(id);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![("added", id), ("updated", id), ("updated", id)]
    );

    assert!(h.ship.unsubscribe(&listener));
    h.ship.mark_acknowledged(id);
    assert_eq!(seen.lock().unwrap().len(), 3);
}

/// The poll merges our own open and accept before the local append
#[tokio::test]
async fn test_own_messages_merged_by_poll_during_send() {
    let h = TestHarness::new();
    let ship = polling_ship(&h.transport);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    ship.subscribe(Arc::new(FnListener::new(
        move |event: &NotificationEvent<SharedTransaction<String>, TransactionId>| {
            sink.lock().unwrap().push(event.kind());
        },
    )));

    let id = ship
        .open(stcc(), "route-a".to_string(), "Requesting approval")
        .await
        .unwrap();
    let tx = ship.transaction(id).unwrap();
    assert_eq!(tx.messages().len(), 1);
    assert_eq!(tx.status(), NegotiationStatus::Pending);
    assert_eq!(ship.snapshot().len(), 1);

    h.shore.poll_once().await.unwrap();
    h.shore.reply(id, "route-b".to_string(), "").await.unwrap();
    ship.poll_once().await.unwrap();

    let status = ship.accept(id, "Thanks").await.unwrap();
    assert_eq!(status, NegotiationStatus::Agreed);
    let tx = ship.transaction(id).unwrap();
    assert_eq!(tx.messages().len(), 3);
    assert_eq!(tx.status(), NegotiationStatus::Agreed);
    assert_eq!(
        h.transport.remote_transaction(ROUTE, id).unwrap().messages().len(),
        3
    );
    assert_eq!(ship.notification(id).unwrap().get().messages().len(), 3);
    assert_eq!(*seen.lock().unwrap(), vec!["added", "updated", "updated"]);
}

#[tokio::test]
async fn test_cancel_merged_by_poll_during_send() {
    let h = TestHarness::new();
    let ship = polling_ship(&h.transport);

    let id = ship.open(stcc(), "route-a".to_string(), "").await.unwrap();
    let status = ship.cancel(id, "changed plans").await.unwrap();
    assert_eq!(status, NegotiationStatus::Canceled);

    let tx = ship.transaction(id).unwrap();
    assert_eq!(tx.messages().len(), 2);
    assert_eq!(tx.latest_message().and_then(|m| m.comment()), Some("changed plans"));
    assert_eq!(
        ship.notification(id).unwrap().get().status(),
        NegotiationStatus::Canceled
    );
    assert_eq!(
        h.transport.remote_transaction(ROUTE, id).unwrap().messages().len(),
        2
    );
}

/// Dropped from the backend feed; the local view keeps it
#[tokio::test]
async fn test_expired_transaction_stays_in_view() {
    let h = TestHarness::new();
    let id = h.ship.open(stcc(), "route-a".to_string(), "").await.unwrap();
    h.ship.cancel(id, "").await.unwrap();
    assert!(h.ship.mark_read(id));
    let before = digest(&h.ship);

    assert!(h.transport.expire(ROUTE, id));
    let outcome = h.ship.poll_once().await.unwrap();

    assert!(!outcome.snapshot.changed());
    assert_eq!(outcome.removed, 0);
    assert_eq!(digest(&h.ship), before);
    assert_eq!(
        h.ship.transaction(id).unwrap().status(),
        NegotiationStatus::Canceled
    );
    assert!(h.ship.notification(id).unwrap().is_read());
}

struct PanickingListener;

impl NotificationListener<SharedTransaction<String>> for PanickingListener {
    fn on_notification_event(
        &self,
        _event: &NotificationEvent<SharedTransaction<String>, TransactionId>,
    ) {
        panic!("listener failure");
    }
}

#[tokio::test]
async fn test_panicking_listener_does_not_break_actions() {
    let h = TestHarness::new();
    h.ship.subscribe(Arc::new(PanickingListener));

    let id = h.ship.open(stcc(), "route-a".to_string(), "").await.unwrap();
    assert_eq!(h.ship.snapshot().len(), 1);
    assert!(h.ship.mark_read(id));
}

/// Local state survives a run of failing polls
#[tokio::test]
async fn test_disconnect_resilience() {
    let h = TestHarness::new();
    let worker = PollWorker::new(h.ship.clone(), PollConfig::default());

    let id = h.ship.open(stcc(), "route-a".to_string(), "").await.unwrap();
    for round in 0..3 {
        h.shore.poll_once().await.unwrap();
        if round == 0 {
            h.shore.reply(id, "route-b".to_string(), "").await.unwrap();
        }
        worker.tick().await.unwrap();
    }
    h.ship.mark_read(id);
    let before = digest(&h.ship);
    assert_eq!(before.len(), 1);

    h.transport.set_fail_fetch(true);
    assert!(matches!(worker.tick().await, Err(TransportError::FetchFailed(_))));
    h.transport.disconnect();
    assert_eq!(worker.tick().await.unwrap_err(), TransportError::ConnectionLost);

    assert_eq!(digest(&h.ship), before);
    assert!(h.ship.notification(id).unwrap().is_read());
}

#[tokio::test]
async fn test_discovery_is_best_effort() {
    let h = TestHarness::new();
    h.transport.register_counterpart(
        ROUTE,
        CounterpartEndpoint {
            id: stcc(),
            name: "Sound VTS".into(),
        },
    );
    h.transport.register_counterpart(
        ROUTE,
        CounterpartEndpoint {
            id: vessel(),
            name: "MV Example".into(),
        },
    );

    let outcome = h.ship.poll_once().await.unwrap();
    assert_eq!(outcome.counterparts, Some(2));
    assert_eq!(h.ship.counterparts().len(), 2);
}

/// After on_disconnected returns no further fetch happens
#[tokio::test]
async fn test_no_tick_after_stop() {
    let h = TestHarness::new();
    let worker = PollWorker::new(
        h.ship.clone(),
        PollConfig {
            initial_delay: Duration::ZERO,
            interval: Duration::from_millis(5),
            jitter: Duration::from_millis(2),
        },
    );

    worker.on_connected().await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    worker.on_disconnected().await;

    let fetches = h.transport.fetch_count();
    let ticks = worker.tick_count();
    assert!(ticks >= 1);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(h.transport.fetch_count(), fetches);
    assert_eq!(worker.tick_count(), ticks);
}
