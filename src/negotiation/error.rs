//! Negotiation error types

use thiserror::Error;

use super::status::NegotiationStatus;
use super::types::{Origin, TransactionId};
use crate::transport::TransportError;

/// Negotiation error types
///
/// Every variant is a recoverable value handed back to the caller; none of
/// them is fatal to the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    // === Protocol Errors ===
    #[error("Transaction {id} is closed (status {status})")]
    TransactionClosed {
        id: TransactionId,
        status: NegotiationStatus,
    },

    #[error("Out of turn: {origin} cannot propose twice in a row on transaction {id}")]
    OutOfTurn { id: TransactionId, origin: Origin },

    #[error("{origin} is not permitted to mark transaction {id} as {status}")]
    NotPermitted {
        id: TransactionId,
        origin: Origin,
        status: NegotiationStatus,
    },

    #[error("Message for transaction {0} is not newer than the latest message")]
    OutOfOrder(TransactionId),

    // === Lookup Errors ===
    #[error("Transaction not found: {0}")]
    UnknownTransaction(TransactionId),

    #[error("Transaction already exists: {0}")]
    DuplicateTransaction(TransactionId),

    #[error("Transaction {0} has no messages")]
    EmptyTransaction(TransactionId),

    // === Transport Errors ===
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl NegotiationError {
    /// Get the stable error code for consumers and logs
    pub fn code(&self) -> &'static str {
        match self {
            NegotiationError::TransactionClosed { .. } => "TRANSACTION_CLOSED",
            NegotiationError::OutOfTurn { .. } => "OUT_OF_TURN",
            NegotiationError::NotPermitted { .. } => "NOT_PERMITTED",
            NegotiationError::OutOfOrder(_) => "OUT_OF_ORDER",
            NegotiationError::UnknownTransaction(_) => "UNKNOWN_TRANSACTION",
            NegotiationError::DuplicateTransaction(_) => "DUPLICATE_TRANSACTION",
            NegotiationError::EmptyTransaction(_) => "EMPTY_TRANSACTION",
            NegotiationError::Transport(_) => "TRANSPORT",
        }
    }

    /// True for violations of the turn-based protocol itself
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            NegotiationError::TransactionClosed { .. }
                | NegotiationError::OutOfTurn { .. }
                | NegotiationError::NotPermitted { .. }
                | NegotiationError::OutOfOrder(_)
        )
    }
}
