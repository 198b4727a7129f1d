//! Transport Adapter
//!
//! The message transport is an external collaborator. The engine only needs
//! connectivity signals, a pull-based snapshot of transactions, a way to
//! send one message, and discovery of counterparts.

pub mod error;
pub mod memory;

pub use error::TransportError;
pub use memory::InMemoryTransport;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

use crate::negotiation::{
    CounterpartId, NegotiationCategory, NegotiationMessage, NegotiationTransaction, Payload,
    TransactionId,
};

/// Connectivity of the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
        }
    }
}

/// How far an outgoing message got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Handed to the transport
    Sent,
    /// Accepted by the relay / cloud
    ReceivedByCloud,
    /// Confirmed by the counterpart
    ReceivedByClient,
}

/// Acknowledgement of an outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAck {
    pub transaction_id: TransactionId,
    pub status: DeliveryStatus,
    pub acked_at: DateTime<Utc>,
}

/// One message addressed to a counterpart
#[derive(Debug, Clone)]
pub struct OutgoingMessage<P> {
    pub category: NegotiationCategory,
    pub transaction_id: TransactionId,
    pub counterpart: CounterpartId,
    pub message: NegotiationMessage<P>,
}

/// A reachable counterpart offering the negotiation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartEndpoint {
    pub id: CounterpartId,
    pub name: String,
}

/// Message transport seam
///
/// Implementations enforce their own timeouts; the engine adds none.
#[async_trait]
pub trait NegotiationTransport<P: Payload>: Send + Sync {
    /// Get transport name for logging
    fn name(&self) -> &'static str;

    /// Connect / disconnect signal (the onConnected / onDisconnected hooks)
    fn connectivity(&self) -> watch::Receiver<ConnectionState>;

    /// Pull the backend's current view of a category (may be partial)
    async fn fetch_transactions(
        &self,
        category: NegotiationCategory,
    ) -> Result<Vec<NegotiationTransaction<P>>, TransportError>;

    /// Deliver one message to the counterpart
    async fn send_message(&self, outgoing: &OutgoingMessage<P>) -> Result<SendAck, TransportError>;

    /// Locate counterparts offering this category's service
    async fn discover_counterparts(
        &self,
        category: NegotiationCategory,
    ) -> Result<Vec<CounterpartEndpoint>, TransportError>;
}
