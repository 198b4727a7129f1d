//! Notifications
//!
//! The consumer-facing view over negotiations. The backend is stateless with
//! respect to per-user annotations, so `read` / `acknowledged` live here and
//! are carried across every refresh that still contains the same id.

pub mod cache;
pub mod listener;
pub mod types;

pub use cache::{ChangeSet, NotificationSnapshot, ReconciliationCache};
pub use listener::{FnListener, ListenerRegistry, NotificationEvent, NotificationListener};
pub use types::{
    Negotiable, Notification, NotificationAlert, NotificationPolicy, NotificationSeverity,
    NotificationTemplate, NotificationType,
};
