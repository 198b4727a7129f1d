//! Negotiation Service
//!
//! Ties one category's store, reconciliation cache and transport together.
//! Consumers read snapshots and toggle flags; outgoing actions go through
//! validate → send → append → reconcile, one at a time.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::ids::IdGenerator;
use super::policy::NegotiationPolicy;
use crate::negotiation::{
    AvailableActions, CounterpartId, NegotiationCategory, NegotiationError, NegotiationMessage,
    NegotiationStatus, NegotiationStore, NegotiationTransaction, Origin, Payload, SnapshotReport,
    TransactionId,
};
use crate::notification::{
    ChangeSet, Notification, NotificationListener, NotificationPolicy, NotificationSnapshot,
    ReconciliationCache,
};
use crate::sync;
use crate::transport::{
    ConnectionState, CounterpartEndpoint, NegotiationTransport, OutgoingMessage, TransportError,
};

/// Shared handle to a transaction as stored and cached
pub type SharedTransaction<P> = Arc<NegotiationTransaction<P>>;

/// Notification wrapping a negotiation transaction
pub type TransactionNotification<P> = Notification<SharedTransaction<P>, TransactionId>;

const DEFAULT_CANCEL_COMMENT: &str = "Request cancelled";

/// Outcome of one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub snapshot: SnapshotReport,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Counterparts found by discovery, if discovery succeeded
    pub counterparts: Option<usize>,
}

pub struct NegotiationService<P: Payload> {
    category: NegotiationCategory,
    local_role: Origin,
    store: NegotiationStore<P>,
    cache: ReconciliationCache<SharedTransaction<P>>,
    transport: Arc<dyn NegotiationTransport<P>>,
    counterparts: RwLock<Vec<CounterpartEndpoint>>,
    ids: Mutex<IdGenerator>,
    outgoing: tokio::sync::Mutex<()>,
    // Keeps list_all + refresh pairs from interleaving
    reconcile_lock: Mutex<()>,
}

impl<P: Payload> NegotiationService<P> {
    pub fn new(
        category: NegotiationCategory,
        local_role: Origin,
        transport: Arc<dyn NegotiationTransport<P>>,
        auto_acknowledge: bool,
    ) -> Self {
        let policy = Arc::new(NegotiationPolicy::<P>::new(category, local_role, auto_acknowledge));
        Self::with_policy(category, local_role, transport, policy, 1)
    }

    /// Custom presentation policy and id node (for several clients on one backend)
    pub fn with_policy(
        category: NegotiationCategory,
        local_role: Origin,
        transport: Arc<dyn NegotiationTransport<P>>,
        policy: Arc<dyn NotificationPolicy<SharedTransaction<P>>>,
        node_id: u8,
    ) -> Self {
        info!(
            category = %category,
            local_role = %local_role,
            transport = transport.name(),
            "Negotiation service created"
        );
        Self {
            category,
            local_role,
            store: NegotiationStore::new(category),
            cache: ReconciliationCache::new(policy),
            transport,
            counterparts: RwLock::new(Vec::new()),
            ids: Mutex::new(IdGenerator::new(node_id)),
            outgoing: tokio::sync::Mutex::new(()),
            reconcile_lock: Mutex::new(()),
        }
    }

    pub fn category(&self) -> NegotiationCategory {
        self.category
    }

    pub fn local_role(&self) -> Origin {
        self.local_role
    }

    pub fn store(&self) -> &NegotiationStore<P> {
        &self.store
    }

    pub fn connectivity(&self) -> watch::Receiver<ConnectionState> {
        self.transport.connectivity()
    }

    // ========================================================================
    // Consumer surface
    // ========================================================================

    pub fn subscribe(&self, listener: Arc<dyn NotificationListener<SharedTransaction<P>>>) -> bool {
        self.cache.subscribe(listener)
    }

    pub fn unsubscribe(&self, listener: &Arc<dyn NotificationListener<SharedTransaction<P>>>) -> bool {
        self.cache.unsubscribe(listener)
    }

    pub fn snapshot(&self) -> NotificationSnapshot<SharedTransaction<P>> {
        self.cache.snapshot()
    }

    pub fn notification(&self, id: TransactionId) -> Option<TransactionNotification<P>> {
        self.cache.get(&id)
    }

    pub fn mark_read(&self, id: TransactionId) -> bool {
        self.cache.mark_read(&id)
    }

    pub fn mark_acknowledged(&self, id: TransactionId) -> bool {
        self.cache.mark_acknowledged(&id)
    }

    pub fn unread_count(&self) -> usize {
        self.cache.unread_count()
    }

    pub fn transaction(&self, id: TransactionId) -> Option<SharedTransaction<P>> {
        self.store.get_transaction(id)
    }

    /// What the local party may do on this transaction now
    pub fn available_actions(&self, id: TransactionId) -> Option<AvailableActions> {
        self.store
            .get_transaction(id)
            .map(|tx| AvailableActions::for_role(&tx, self.local_role))
    }

    /// Counterparts found by the latest successful discovery
    pub fn counterparts(&self) -> Vec<CounterpartEndpoint> {
        sync::read(&self.counterparts).clone()
    }

    // ========================================================================
    // Outgoing actions
    // ========================================================================

    /// Start a new negotiation with a first proposal
    pub async fn open(
        &self,
        counterpart: CounterpartId,
        payload: P,
        comment: &str,
    ) -> Result<TransactionId, NegotiationError> {
        let _outgoing = self.outgoing.lock().await;

        let id = sync::lock(&self.ids).next_id();
        let message =
            NegotiationMessage::proposal(self.local_role, payload, Utc::now()).with_comment(comment);
        let transaction =
            NegotiationTransaction::open(id, counterpart.clone(), self.category, message.clone())?;

        self.send(id, counterpart, message).await?;

        match self.store.insert(transaction) {
            Ok(_) => {}
            // The poll loop already merged it from the backend
            Err(NegotiationError::DuplicateTransaction(_)) => {
                debug!(transaction_id = %id, "Opened transaction already merged by poll");
            }
            Err(e) => return Err(e),
        }
        self.reconcile();

        info!(category = %self.category, transaction_id = %id, "Negotiation opened");
        Ok(id)
    }

    /// Accept the counterpart's latest proposal
    pub async fn accept(
        &self,
        id: TransactionId,
        reply_text: &str,
    ) -> Result<NegotiationStatus, NegotiationError> {
        self.submit(id, |at| {
            NegotiationMessage::new(self.local_role, at)
                .with_status(NegotiationStatus::Agreed)
                .with_comment(reply_text)
        })
        .await
    }

    pub async fn reject(
        &self,
        id: TransactionId,
        reason: &str,
    ) -> Result<NegotiationStatus, NegotiationError> {
        self.submit(id, |at| {
            NegotiationMessage::reject(self.local_role, at).with_comment(reason)
        })
        .await
    }

    /// Withdraw the request; an empty reason gets a default comment
    pub async fn cancel(
        &self,
        id: TransactionId,
        reason: &str,
    ) -> Result<NegotiationStatus, NegotiationError> {
        let reason = if reason.is_empty() {
            DEFAULT_CANCEL_COMMENT
        } else {
            reason
        };
        self.submit(id, |at| {
            NegotiationMessage::new(self.local_role, at)
                .with_status(NegotiationStatus::Canceled)
                .with_comment(reason)
        })
        .await
    }

    /// Counter-propose
    pub async fn reply(
        &self,
        id: TransactionId,
        payload: P,
        comment: &str,
    ) -> Result<NegotiationStatus, NegotiationError> {
        self.submit(id, |at| {
            NegotiationMessage::proposal(self.local_role, payload, at).with_comment(comment)
        })
        .await
    }

    async fn submit<F>(&self, id: TransactionId, build: F) -> Result<NegotiationStatus, NegotiationError>
    where
        F: FnOnce(DateTime<Utc>) -> NegotiationMessage<P>,
    {
        let _outgoing = self.outgoing.lock().await;

        let transaction = self
            .store
            .get_transaction(id)
            .ok_or(NegotiationError::UnknownTransaction(id))?;
        let message = build(self.store.next_sent_at(id));
        self.store.validate_append(id, &message)?;

        self.send(id, transaction.counterpart().clone(), message.clone())
            .await?;

        let status = match self.store.append_message(id, message.clone()) {
            Ok(status) => status,
            Err(e) => match self.store.get_transaction(id) {
                // Our own message came back through a poll between send and append
                Some(tx)
                    if tx.messages().iter().any(|m| {
                        m.origin() == message.origin() && m.sent_at() == message.sent_at()
                    }) =>
                {
                    tx.status()
                }
                _ => return Err(e),
            },
        };
        self.reconcile();
        Ok(status)
    }

    async fn send(
        &self,
        id: TransactionId,
        counterpart: CounterpartId,
        message: NegotiationMessage<P>,
    ) -> Result<(), NegotiationError> {
        let outgoing = OutgoingMessage {
            category: self.category,
            transaction_id: id,
            counterpart,
            message,
        };
        match self.transport.send_message(&outgoing).await {
            Ok(ack) => {
                debug!(
                    transaction_id = %id,
                    delivery = ?ack.status,
                    "Message delivered"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    category = %self.category,
                    transaction_id = %id,
                    error = %e,
                    code = e.code(),
                    "Send failed; transaction left unchanged"
                );
                Err(e.into())
            }
        }
    }

    // ========================================================================
    // Poll loop hooks
    // ========================================================================

    /// Push the store's current contents through the cache
    ///
    /// Listeners may run inside this call and must not call `reconcile` themselves.
    pub fn reconcile(&self) -> ChangeSet<SharedTransaction<P>> {
        let _serial = sync::lock(&self.reconcile_lock);
        self.cache.refresh(&self.store.list_all())
    }

    /// One fetch → merge → reconcile cycle, then best-effort discovery
    pub async fn poll_once(&self) -> Result<PollOutcome, TransportError> {
        let remote = self.transport.fetch_transactions(self.category).await?;
        let snapshot = self.store.apply_snapshot(remote);
        let changes = self.reconcile();

        let counterparts = match self.transport.discover_counterparts(self.category).await {
            Ok(found) => {
                let count = found.len();
                let mut known = sync::write(&self.counterparts);
                if *known != found {
                    info!(category = %self.category, count, "Counterparts updated");
                    *known = found;
                }
                Some(count)
            }
            Err(e) => {
                debug!(category = %self.category, error = %e, "Counterpart discovery failed");
                None
            }
        };

        Ok(PollOutcome {
            snapshot,
            added: changes.added.len(),
            updated: changes.updated.len(),
            removed: changes.removed.len(),
            counterparts,
        })
    }
}
