//! In-memory transport
//!
//! A loopback backend holding every category's transactions. It plays the
//! remote side for the demo binary and for tests: the authority's messages
//! are injected with [`InMemoryTransport::push_remote`], and fetch / send
//! failures can be switched on to simulate an unreliable link.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::{debug, info};

use super::{
    ConnectionState, CounterpartEndpoint, DeliveryStatus, NegotiationTransport, OutgoingMessage,
    SendAck, TransportError,
};
use crate::negotiation::{
    CounterpartId, NegotiationCategory, NegotiationError, NegotiationMessage, NegotiationStatus,
    NegotiationTransaction, Payload, TransactionId,
};
use crate::sync;

type Backend<P> = HashMap<NegotiationCategory, BTreeMap<TransactionId, NegotiationTransaction<P>>>;

pub struct InMemoryTransport<P> {
    backend: Mutex<Backend<P>>,
    counterparts: Mutex<HashMap<NegotiationCategory, Vec<CounterpartEndpoint>>>,
    connectivity: watch::Sender<ConnectionState>,
    fail_fetch: AtomicBool,
    fail_send: AtomicBool,
    fetch_count: AtomicUsize,
    send_count: AtomicUsize,
}

impl<P: Payload> InMemoryTransport<P> {
    pub fn new() -> Self {
        let (connectivity, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            backend: Mutex::new(HashMap::new()),
            counterparts: Mutex::new(HashMap::new()),
            connectivity,
            fail_fetch: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            fetch_count: AtomicUsize::new(0),
            send_count: AtomicUsize::new(0),
        }
    }

    pub fn connect(&self) {
        self.connectivity.send_replace(ConnectionState::Connected);
        info!("In-memory transport connected");
    }

    pub fn disconnect(&self) {
        self.connectivity.send_replace(ConnectionState::Disconnected);
        info!("In-memory transport disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity.borrow().is_connected()
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn send_count(&self) -> usize {
        self.send_count.load(Ordering::SeqCst)
    }

    pub fn register_counterpart(&self, category: NegotiationCategory, endpoint: CounterpartEndpoint) {
        sync::lock(&self.counterparts)
            .entry(category)
            .or_default()
            .push(endpoint);
    }

    /// Place a whole transaction in the backend feed
    pub fn seed(&self, transaction: NegotiationTransaction<P>) {
        sync::lock(&self.backend)
            .entry(transaction.category())
            .or_default()
            .insert(transaction.id(), transaction);
    }

    /// The remote party appends a message (or opens a transaction)
    pub fn push_remote(
        &self,
        category: NegotiationCategory,
        id: TransactionId,
        counterpart: CounterpartId,
        message: NegotiationMessage<P>,
    ) -> Result<NegotiationStatus, NegotiationError> {
        let mut backend = sync::lock(&self.backend);
        let feed = backend.entry(category).or_default();
        match feed.get_mut(&id) {
            Some(tx) => tx.append(message),
            None => {
                let tx = NegotiationTransaction::open(id, counterpart, category, message)?;
                let status = tx.status();
                feed.insert(id, tx);
                Ok(status)
            }
        }
    }

    /// Drop a transaction from the feed (resolved and expired on the backend)
    ///
    /// Services that already merged it keep it: snapshot merges never remove,
    /// so an expired transaction stays in the store and the notification view
    /// until the service itself is dropped.
    pub fn expire(&self, category: NegotiationCategory, id: TransactionId) -> bool {
        sync::lock(&self.backend)
            .get_mut(&category)
            .is_some_and(|feed| feed.remove(&id).is_some())
    }

    pub fn remote_transaction(
        &self,
        category: NegotiationCategory,
        id: TransactionId,
    ) -> Option<NegotiationTransaction<P>> {
        sync::lock(&self.backend)
            .get(&category)
            .and_then(|feed| feed.get(&id).cloned())
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::ConnectionLost)
        }
    }
}

impl<P: Payload> Default for InMemoryTransport<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<P: Payload> NegotiationTransport<P> for InMemoryTransport<P> {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn connectivity(&self) -> watch::Receiver<ConnectionState> {
        self.connectivity.subscribe()
    }

    async fn fetch_transactions(
        &self,
        category: NegotiationCategory,
    ) -> Result<Vec<NegotiationTransaction<P>>, TransportError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(TransportError::FetchFailed("injected fetch failure".into()));
        }

        let transactions: Vec<_> = sync::lock(&self.backend)
            .get(&category)
            .map(|feed| feed.values().cloned().collect())
            .unwrap_or_default();
        debug!(target: "WIRE", category = %category, count = transactions.len(), "fetch");
        Ok(transactions)
    }

    async fn send_message(&self, outgoing: &OutgoingMessage<P>) -> Result<SendAck, TransportError> {
        self.send_count.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("injected send failure".into()));
        }

        self.push_remote(
            outgoing.category,
            outgoing.transaction_id,
            outgoing.counterpart.clone(),
            outgoing.message.clone(),
        )
        .map_err(|e| TransportError::Rejected(e.to_string()))?;

        debug!(
            target: "WIRE",
            category = %outgoing.category,
            transaction_id = %outgoing.transaction_id,
            counterpart = %outgoing.counterpart,
            origin = %outgoing.message.origin(),
            "send"
        );
        Ok(SendAck {
            transaction_id: outgoing.transaction_id,
            status: DeliveryStatus::ReceivedByClient,
            acked_at: Utc::now(),
        })
    }

    async fn discover_counterparts(
        &self,
        category: NegotiationCategory,
    ) -> Result<Vec<CounterpartEndpoint>, TransportError> {
        self.ensure_connected()?;
        Ok(sync::lock(&self.counterparts)
            .get(&category)
            .cloned()
            .unwrap_or_default())
    }
}
