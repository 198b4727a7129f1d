//! Turn-based transition table
//!
//! ```text
//!                 proposal (other party's turn)
//!                 ┌──────────┐
//!                 ▼          │
//!   ──────────▶ PENDING ─────┘
//!                 │
//!     ┌───────────┼────────────────┐
//!     ▼           ▼                ▼
//!   AGREED     REJECTED         CANCELED
//! (requester   (either party)   (requester only)
//!  after an
//!  authority
//!  proposal)
//! ```
//!
//! Rules are checked in a fixed order: closed, ordering, then per-status
//! role and turn constraints.

use serde::Serialize;

use super::error::NegotiationError;
use super::status::NegotiationStatus;
use super::types::{
    NegotiationMessage, NegotiationTransaction, Origin, Payload, TransactionId,
};

/// Compute the status reached by appending `message` after `latest`
pub fn transition<P: Payload>(
    id: TransactionId,
    current: NegotiationStatus,
    latest: Option<&NegotiationMessage<P>>,
    message: &NegotiationMessage<P>,
) -> Result<NegotiationStatus, NegotiationError> {
    if current.is_terminal() {
        return Err(NegotiationError::TransactionClosed {
            id,
            status: current,
        });
    }

    if let Some(latest) = latest
        && message.sent_at() <= latest.sent_at()
    {
        return Err(NegotiationError::OutOfOrder(id));
    }

    let origin = message.origin();
    let latest_origin = latest.map(|m| m.origin());

    match message.explicit_status() {
        None | Some(NegotiationStatus::Pending) => {
            if latest_origin == Some(origin) {
                return Err(NegotiationError::OutOfTurn { id, origin });
            }
            Ok(NegotiationStatus::Pending)
        }
        Some(NegotiationStatus::Agreed) => {
            if origin != Origin::Requester {
                return Err(NegotiationError::NotPermitted {
                    id,
                    origin,
                    status: NegotiationStatus::Agreed,
                });
            }
            if latest_origin != Some(Origin::Authority) {
                return Err(NegotiationError::OutOfTurn { id, origin });
            }
            Ok(NegotiationStatus::Agreed)
        }
        Some(NegotiationStatus::Rejected) => Ok(NegotiationStatus::Rejected),
        Some(NegotiationStatus::Canceled) => {
            if origin != Origin::Requester {
                return Err(NegotiationError::NotPermitted {
                    id,
                    origin,
                    status: NegotiationStatus::Canceled,
                });
            }
            Ok(NegotiationStatus::Canceled)
        }
    }
}

/// Replay a full history from scratch
pub fn replay_status<P: Payload>(
    id: TransactionId,
    messages: &[NegotiationMessage<P>],
) -> Result<NegotiationStatus, NegotiationError> {
    if messages.is_empty() {
        return Err(NegotiationError::EmptyTransaction(id));
    }

    let mut status = NegotiationStatus::Pending;
    let mut latest = None;
    for message in messages {
        status = transition(id, status, latest, message)?;
        latest = Some(message);
    }
    Ok(status)
}

/// Actions the local party may take on a transaction right now
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AvailableActions {
    pub accept: bool,
    pub reject: bool,
    pub cancel: bool,
    pub counter: bool,
}

impl AvailableActions {
    pub fn for_role<P: Payload>(transaction: &NegotiationTransaction<P>, role: Origin) -> Self {
        if transaction.status().is_terminal() {
            return Self::default();
        }

        let their_turn_done = transaction
            .latest_message()
            .is_some_and(|m| m.origin() != role);

        Self {
            accept: role == Origin::Requester && their_turn_done,
            reject: true,
            cancel: role == Origin::Requester,
            counter: their_turn_done,
        }
    }

    pub fn any(&self) -> bool {
        self.accept || self.reject || self.cancel || self.counter
    }
}
