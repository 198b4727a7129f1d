//! Listener fan-out
//!
//! Observers are kept in registration order and registered at most once
//! (identity is the `Arc` allocation). Dispatch iterates over a copy of the
//! list, so listeners may subscribe or unsubscribe from inside a callback.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};
use tracing::error;

use super::types::{Negotiable, Notification};
use crate::sync;

/// One logical change in the reconciled view
#[derive(Debug, Clone)]
pub enum NotificationEvent<T, I> {
    Added(Notification<T, I>),
    Updated(Notification<T, I>),
    Removed(I),
}

impl<T, I> NotificationEvent<T, I> {
    pub fn id(&self) -> &I {
        match self {
            NotificationEvent::Added(n) | NotificationEvent::Updated(n) => n.id(),
            NotificationEvent::Removed(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::Added(_) => "added",
            NotificationEvent::Updated(_) => "updated",
            NotificationEvent::Removed(_) => "removed",
        }
    }
}

/// Observer of reconciled notification changes
pub trait NotificationListener<T: Negotiable>: Send + Sync {
    fn on_notification_event(&self, event: &NotificationEvent<T, T::Id>);
}

/// Adapts a closure into a listener
pub struct FnListener<F>(F);

impl<F> FnListener<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<T, F> NotificationListener<T> for FnListener<F>
where
    T: Negotiable,
    F: Fn(&NotificationEvent<T, T::Id>) + Send + Sync,
{
    fn on_notification_event(&self, event: &NotificationEvent<T, T::Id>) {
        (self.0)(event)
    }
}

/// Registration-ordered, duplicate-free listener list
pub struct ListenerRegistry<T: Negotiable> {
    listeners: RwLock<Vec<Arc<dyn NotificationListener<T>>>>,
}

impl<T: Negotiable> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Returns false if the listener was already registered
    pub fn subscribe(&self, listener: Arc<dyn NotificationListener<T>>) -> bool {
        let mut listeners = sync::write(&self.listeners);
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Returns false if the listener was not registered
    pub fn unsubscribe(&self, listener: &Arc<dyn NotificationListener<T>>) -> bool {
        let mut listeners = sync::write(&self.listeners);
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        sync::read(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver every event to every listener; a panicking listener is logged and skipped
    pub fn dispatch(&self, events: &[NotificationEvent<T, T::Id>]) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<_> = sync::read(&self.listeners).clone();

        for event in events {
            for (index, listener) in listeners.iter().enumerate() {
                let delivered = catch_unwind(AssertUnwindSafe(|| {
                    listener.on_notification_event(event)
                }));
                if let Err(panic) = delivered {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(
                        listener = index,
                        event = event.kind(),
                        notification_id = %event.id(),
                        reason = %reason,
                        "Notification listener panicked; continuing with remaining listeners"
                    );
                }
            }
        }
    }
}

impl<T: Negotiable> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
