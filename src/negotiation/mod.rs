//! Negotiation transactions
//!
//! Turn-based request/response exchanges between a requester (vessel, SRU)
//! and an authority (STCC, SAR coordination).
//!
//! # State Machine
//!
//! ```text
//! PENDING ──▶ AGREED     (requester accepts the authority's proposal)
//!    │  ──▶ REJECTED   (either party)
//!    │  ──▶ CANCELED   (requester withdraws)
//!    └──▶ PENDING      (counter-proposal, strictly alternating)
//! ```
//!
//! # Invariants
//!
//! 1. **Non-empty history**: a transaction always holds at least one message
//! 2. **Append-only**: messages are never reordered or changed once appended
//! 3. **Cached status**: `status` always equals a replay of the history
//! 4. **Closed is closed**: nothing is appended after a terminal status
//! 5. **Monotonic time**: messages are appended in strictly increasing `sent_at`

pub mod error;
pub mod protocol;
pub mod status;
pub mod store;
pub mod types;

pub use error::NegotiationError;
pub use protocol::{AvailableActions, replay_status};
pub use status::NegotiationStatus;
pub use store::{NegotiationStore, SnapshotReport};
pub use types::{
    CounterpartId, NegotiationCategory, NegotiationMessage, NegotiationTransaction, Origin,
    Payload, TransactionId,
};
