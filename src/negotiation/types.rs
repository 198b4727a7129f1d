//! Negotiation core types
//!
//! Type definitions for transactions, messages and the parties involved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::error::NegotiationError;
use super::protocol;
use super::status::NegotiationStatus;

/// Opaque domain attachment carried by a message (route plan, effort allocation, ...)
///
/// The engine never looks inside a payload.
pub trait Payload: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + fmt::Debug + Send + Sync + 'static {}

/// Transaction ID - stable for the lifetime of a negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(u64);

impl TransactionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TransactionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the other party (e.g. `mmsi://219000123` or an STCC name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterpartId(String);

impl CounterpartId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CounterpartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the negotiation sent a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// The vessel (or SRU) asking for approval / receiving a task
    Requester,
    /// The shore authority (STCC, SAR coordination)
    Authority,
}

impl Origin {
    /// The opposite party
    #[inline]
    pub fn other(&self) -> Origin {
        match self {
            Origin::Requester => Origin::Authority,
            Origin::Authority => Origin::Requester,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Requester => "REQUESTER",
            Origin::Authority => "AUTHORITY",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Negotiation category - one store, cache and poll loop per category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationCategory {
    /// Strategic route approval between a vessel and an STCC
    StrategicRoute,
    /// Search-and-rescue task assignment between SAR coordination and an SRU
    SarTask,
}

impl NegotiationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationCategory::StrategicRoute => "strategic_route",
            NegotiationCategory::SarTask => "sar_task",
        }
    }
}

impl fmt::Display for NegotiationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in a negotiation's history. Immutable once appended.
#[derive(Debug, Clone, Serialize)]
pub struct NegotiationMessage<P> {
    origin: Origin,
    payload: Option<Arc<P>>,
    comment: Option<String>,
    sent_at: DateTime<Utc>,
    explicit_status: Option<NegotiationStatus>,
}

impl<P: Payload> NegotiationMessage<P> {
    /// Bare message with no payload, comment or status override
    pub fn new(origin: Origin, sent_at: DateTime<Utc>) -> Self {
        Self {
            origin,
            payload: None,
            comment: None,
            sent_at,
            explicit_status: None,
        }
    }

    /// Counter-proposal carrying a payload
    pub fn proposal(origin: Origin, payload: P, sent_at: DateTime<Utc>) -> Self {
        Self::new(origin, sent_at).with_payload(payload)
    }

    /// Requester accepts the authority's latest proposal
    pub fn agree(sent_at: DateTime<Utc>) -> Self {
        Self::new(Origin::Requester, sent_at).with_status(NegotiationStatus::Agreed)
    }

    /// Either party rejects the negotiation
    pub fn reject(origin: Origin, sent_at: DateTime<Utc>) -> Self {
        Self::new(origin, sent_at).with_status(NegotiationStatus::Rejected)
    }

    /// Requester withdraws the request
    pub fn cancel(sent_at: DateTime<Utc>) -> Self {
        Self::new(Origin::Requester, sent_at).with_status(NegotiationStatus::Canceled)
    }

    pub fn with_payload(mut self, payload: P) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    pub fn with_shared_payload(mut self, payload: Arc<P>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        let comment = comment.into();
        self.comment = (!comment.is_empty()).then_some(comment);
        self
    }

    pub fn with_status(mut self, status: NegotiationStatus) -> Self {
        self.explicit_status = Some(status);
        self
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn payload(&self) -> Option<&Arc<P>> {
        self.payload.as_ref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    pub fn explicit_status(&self) -> Option<NegotiationStatus> {
        self.explicit_status
    }

    /// A counter-proposal keeps the negotiation pending
    pub fn is_proposal(&self) -> bool {
        matches!(
            self.explicit_status,
            None | Some(NegotiationStatus::Pending)
        )
    }
}

/// One negotiation thread between a requester and an authority
///
/// `messages` is never empty and `status` always equals the status obtained
/// by replaying `messages` through the transition table.
#[derive(Debug, Clone, Serialize)]
pub struct NegotiationTransaction<P> {
    id: TransactionId,
    counterpart: CounterpartId,
    category: NegotiationCategory,
    messages: Vec<NegotiationMessage<P>>,
    status: NegotiationStatus,
    created_at: DateTime<Utc>,
}

impl<P: Payload> NegotiationTransaction<P> {
    /// Start a transaction from its first message
    pub fn open(
        id: TransactionId,
        counterpart: CounterpartId,
        category: NegotiationCategory,
        first: NegotiationMessage<P>,
    ) -> Result<Self, NegotiationError> {
        Self::from_messages(id, counterpart, category, vec![first])
    }

    /// Rebuild a transaction from a full history, validating every step
    pub fn from_messages(
        id: TransactionId,
        counterpart: CounterpartId,
        category: NegotiationCategory,
        messages: Vec<NegotiationMessage<P>>,
    ) -> Result<Self, NegotiationError> {
        let status = protocol::replay_status(id, &messages)?;
        let created_at = messages
            .first()
            .map(|m| m.sent_at())
            .ok_or(NegotiationError::EmptyTransaction(id))?;

        Ok(Self {
            id,
            counterpart,
            category,
            messages,
            status,
            created_at,
        })
    }

    /// Validate and append one message, returning the new status
    pub fn append(
        &mut self,
        message: NegotiationMessage<P>,
    ) -> Result<NegotiationStatus, NegotiationError> {
        let status = self.check(&message)?;
        self.messages.push(message);
        self.status = status;
        Ok(status)
    }

    /// Status the transaction would reach if `message` were appended
    pub fn check(&self, message: &NegotiationMessage<P>) -> Result<NegotiationStatus, NegotiationError> {
        protocol::transition(self.id, self.status, self.latest_message(), message)
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn counterpart(&self) -> &CounterpartId {
        &self.counterpart
    }

    pub fn category(&self) -> NegotiationCategory {
        self.category
    }

    pub fn messages(&self) -> &[NegotiationMessage<P>] {
        &self.messages
    }

    pub fn status(&self) -> NegotiationStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn latest_message(&self) -> Option<&NegotiationMessage<P>> {
        self.messages.last()
    }

    /// Timestamp of the latest message
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.latest_message()
            .map(|m| m.sent_at())
            .unwrap_or(self.created_at)
    }

    /// Latest message carrying a payload (the proposal currently on the table)
    pub fn latest_payload(&self) -> Option<&Arc<P>> {
        self.messages.iter().rev().find_map(|m| m.payload())
    }

    /// True while pending and the latest message came from the other side of `role`
    pub fn awaiting_reply_from(&self, role: Origin) -> bool {
        !self.status.is_terminal()
            && self
                .latest_message()
                .is_some_and(|m| m.origin() == role.other())
    }
}
