//! Negotiation Store
//!
//! Holds every known transaction of one category. Reads vastly outnumber
//! writes, so transactions sit behind a single `RwLock` and are shared as
//! `Arc`s; a write clones a transaction only while readers still hold it.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use super::error::NegotiationError;
use super::status::NegotiationStatus;
use super::types::{NegotiationCategory, NegotiationMessage, NegotiationTransaction, Payload, TransactionId};
use crate::sync;

/// Outcome of merging one remote snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    /// Transactions seen for the first time
    pub inserted: usize,
    /// Known transactions that received newer messages
    pub updated: usize,
    /// Messages appended across all updated transactions
    pub appended_messages: usize,
    /// Transactions whose newer messages broke the protocol (merge stopped)
    pub rejected: usize,
}

impl SnapshotReport {
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.updated > 0
    }
}

/// Store of negotiation transactions for one category
pub struct NegotiationStore<P> {
    category: NegotiationCategory,
    transactions: RwLock<HashMap<TransactionId, Arc<NegotiationTransaction<P>>>>,
}

impl<P: Payload> NegotiationStore<P> {
    pub fn new(category: NegotiationCategory) -> Self {
        Self {
            category,
            transactions: RwLock::new(HashMap::new()),
        }
    }

    pub fn category(&self) -> NegotiationCategory {
        self.category
    }

    /// Insert a transaction that is not yet known
    pub fn insert(
        &self,
        transaction: NegotiationTransaction<P>,
    ) -> Result<Arc<NegotiationTransaction<P>>, NegotiationError> {
        let id = transaction.id();
        let mut transactions = sync::write(&self.transactions);
        if transactions.contains_key(&id) {
            return Err(NegotiationError::DuplicateTransaction(id));
        }

        let transaction = Arc::new(transaction);
        transactions.insert(id, transaction.clone());
        debug!(
            category = %self.category,
            transaction_id = %id,
            status = %transaction.status(),
            "Transaction inserted"
        );
        Ok(transaction)
    }

    /// Validate turn and terminal constraints, append, and return the new status
    pub fn append_message(
        &self,
        id: TransactionId,
        message: NegotiationMessage<P>,
    ) -> Result<NegotiationStatus, NegotiationError> {
        let mut transactions = sync::write(&self.transactions);
        let transaction = transactions
            .get_mut(&id)
            .ok_or(NegotiationError::UnknownTransaction(id))?;

        // Check before make_mut so a rejected message never clones
        transaction.check(&message)?;
        let old_status = transaction.status();
        let new_status = Arc::make_mut(transaction).append(message)?;

        if new_status != old_status {
            info!(
                category = %self.category,
                transaction_id = %id,
                old_status = %old_status,
                new_status = %new_status,
                "Negotiation status changed"
            );
        }
        Ok(new_status)
    }

    /// Dry run of `append_message`
    pub fn validate_append(
        &self,
        id: TransactionId,
        message: &NegotiationMessage<P>,
    ) -> Result<NegotiationStatus, NegotiationError> {
        let transactions = sync::read(&self.transactions);
        transactions
            .get(&id)
            .ok_or(NegotiationError::UnknownTransaction(id))?
            .check(message)
    }

    pub fn get_transaction(&self, id: TransactionId) -> Option<Arc<NegotiationTransaction<P>>> {
        sync::read(&self.transactions).get(&id).cloned()
    }

    /// All transactions, newest first (ties broken by id)
    pub fn list_all(&self) -> Vec<Arc<NegotiationTransaction<P>>> {
        let mut all: Vec<_> = sync::read(&self.transactions).values().cloned().collect();
        all.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.id().cmp(&b.id()))
        });
        all
    }

    /// Merge a (possibly partial) remote view
    ///
    /// Only additions are trusted: unknown transactions are inserted, known
    /// ones receive messages newer than their latest local message, and
    /// nothing is ever removed because it is missing from the snapshot.
    pub fn apply_snapshot(&self, remote: Vec<NegotiationTransaction<P>>) -> SnapshotReport {
        let mut report = SnapshotReport::default();
        let mut transactions = sync::write(&self.transactions);

        for remote_tx in remote {
            let id = remote_tx.id();
            if !transactions.contains_key(&id) {
                transactions.insert(id, Arc::new(remote_tx));
                report.inserted += 1;
                continue;
            }
            let Some(local) = transactions.get_mut(&id) else {
                continue;
            };

            let local_latest = local.updated_at();
            let newer: Vec<_> = remote_tx
                .messages()
                .iter()
                .filter(|m| m.sent_at() > local_latest)
                .cloned()
                .collect();
            if newer.is_empty() {
                continue;
            }

            let local = Arc::make_mut(local);
            let mut appended = 0;
            for message in newer {
                if let Err(e) = local.append(message) {
                    warn!(
                        category = %self.category,
                        transaction_id = %id,
                        error = %e,
                        code = e.code(),
                        "Protocol violation in remote snapshot; skipping remaining messages"
                    );
                    report.rejected += 1;
                    break;
                }
                appended += 1;
            }

            if appended > 0 {
                report.updated += 1;
                report.appended_messages += appended;
            }
        }

        if report.changed() || report.rejected > 0 {
            debug!(
                category = %self.category,
                inserted = report.inserted,
                updated = report.updated,
                appended_messages = report.appended_messages,
                rejected = report.rejected,
                "Snapshot applied"
            );
        }
        report
    }

    /// A send timestamp strictly after the transaction's latest message
    pub fn next_sent_at(&self, id: TransactionId) -> DateTime<Utc> {
        let now = Utc::now();
        match self.get_transaction(id) {
            Some(tx) if tx.updated_at() >= now => tx.updated_at() + Duration::milliseconds(1),
            _ => now,
        }
    }

    pub fn len(&self) -> usize {
        sync::read(&self.transactions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
