//! Negotiation Engine
//!
//! Per-category service (store + cache + transport) and the poll worker that
//! drives it.
//!
//! # Data Flow
//!
//! ```text
//! transport ──fetch──▶ store.apply_snapshot ──▶ cache.refresh ──▶ listeners
//!     ▲                                                               │
//!     └────────────── send ◀── accept / reject / cancel / reply ◀─────┘
//! ```

pub mod ids;
pub mod policy;
pub mod service;
pub mod worker;

#[cfg(test)]
mod integration_tests;

pub use ids::IdGenerator;
pub use policy::NegotiationPolicy;
pub use service::{NegotiationService, PollOutcome, SharedTransaction, TransactionNotification};
pub use worker::{PollConfig, PollWorker};
