//! nav_negotiation - Ship/Shore Negotiation Engine
//!
//! Turn-based negotiations (strategic route approval, SAR task assignment)
//! between a vessel and a shore authority over an intermittently connected
//! transport, reconciled into a locally annotated notification view.
//!
//! # Modules
//!
//! - [`negotiation`] - Transactions, status state machine, store
//! - [`notification`] - Notification model, reconciliation cache, listeners
//! - [`transport`] - Transport trait and in-memory backend
//! - [`engine`] - Per-category service and poll worker
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing setup

pub mod config;
pub mod engine;
pub mod logging;
pub mod negotiation;
pub mod notification;
pub mod transport;

mod sync;

// Convenient re-exports at crate root
pub use engine::{NegotiationService, PollConfig, PollWorker, SharedTransaction};
pub use negotiation::{
    AvailableActions, CounterpartId, NegotiationCategory, NegotiationError, NegotiationMessage,
    NegotiationStatus, NegotiationStore, NegotiationTransaction, Origin, TransactionId,
};
pub use notification::{
    Notification, NotificationEvent, NotificationListener, NotificationSnapshot,
    ReconciliationCache,
};
pub use transport::{InMemoryTransport, NegotiationTransport, TransportError};
