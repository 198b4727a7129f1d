//! Reconciliation Cache
//!
//! Merges authoritative values from the backend with flags owned by this
//! client. The whole view is an immutable `Arc<CacheView>`: readers clone
//! the `Arc`, writers build (or copy-on-write) the next view and swap it in
//! under the lock, so a reader always sees a complete pre- or post-refresh
//! state.
//!
//! Events are queued in the order the view changed, while the write lock is
//! still held, and delivered from that queue by one caller at a time. A flag
//! change made from inside a listener (or on another thread during a
//! delivery) is appended and delivered after the batch in progress, so the
//! last event a listener sees for an id always matches the view.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Deref;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error};

use super::listener::{ListenerRegistry, NotificationEvent, NotificationListener};
use super::types::{Negotiable, Notification, NotificationPolicy};
use crate::sync;

/// Notifications added, updated and removed by one refresh
#[derive(Debug, Clone)]
pub struct ChangeSet<T: Negotiable> {
    pub added: Vec<Notification<T, T::Id>>,
    pub updated: Vec<Notification<T, T::Id>>,
    pub removed: Vec<T::Id>,
}

impl<T: Negotiable> ChangeSet<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }

    pub fn events(&self) -> Vec<NotificationEvent<T, T::Id>> {
        self.added
            .iter()
            .cloned()
            .map(NotificationEvent::Added)
            .chain(self.updated.iter().cloned().map(NotificationEvent::Updated))
            .chain(self.removed.iter().cloned().map(NotificationEvent::Removed))
            .collect()
    }
}

impl<T: Negotiable> Default for ChangeSet<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheView<T: Negotiable> {
    notifications: Vec<Notification<T, T::Id>>,
    index: HashMap<T::Id, usize>,
}

impl<T: Negotiable> CacheView<T> {
    fn empty() -> Self {
        Self::with_capacity(0)
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            notifications: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    fn get(&self, id: &T::Id) -> Option<&Notification<T, T::Id>> {
        self.index.get(id).map(|&i| &self.notifications[i])
    }

    fn push(&mut self, notification: Notification<T, T::Id>) {
        self.index
            .insert(notification.id().clone(), self.notifications.len());
        self.notifications.push(notification);
    }
}

/// Immutable, consistent view handed to consumers
pub struct NotificationSnapshot<T: Negotiable>(Arc<CacheView<T>>);

impl<T: Negotiable> NotificationSnapshot<T> {
    pub fn get(&self, id: &T::Id) -> Option<&Notification<T, T::Id>> {
        self.0.get(id)
    }

    pub fn unread_count(&self) -> usize {
        self.0.notifications.iter().filter(|n| !n.is_read()).count()
    }
}

impl<T: Negotiable> Clone for NotificationSnapshot<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Negotiable> Deref for NotificationSnapshot<T> {
    type Target = [Notification<T, T::Id>];

    fn deref(&self) -> &Self::Target {
        &self.0.notifications
    }
}

/// Event batches waiting for delivery
struct Outbox<T: Negotiable> {
    queue: VecDeque<Vec<NotificationEvent<T, T::Id>>>,
    delivering: bool,
}

/// Reconciled notification view for one category
pub struct ReconciliationCache<T: Negotiable> {
    view: RwLock<Arc<CacheView<T>>>,
    policy: Arc<dyn NotificationPolicy<T>>,
    listeners: ListenerRegistry<T>,
    // Lock order: view, then outbox
    outbox: Mutex<Outbox<T>>,
}

impl<T: Negotiable> ReconciliationCache<T> {
    pub fn new(policy: Arc<dyn NotificationPolicy<T>>) -> Self {
        Self {
            view: RwLock::new(Arc::new(CacheView::empty())),
            policy,
            listeners: ListenerRegistry::new(),
            outbox: Mutex::new(Outbox {
                queue: VecDeque::new(),
                delivering: false,
            }),
        }
    }

    /// Rebuild the view from the latest values, keeping local flags by id
    ///
    /// Listeners are notified after the new view is in place. If another call
    /// is already delivering, these events are handed to it and this call
    /// returns without waiting for them.
    pub fn refresh(&self, values: &[T]) -> ChangeSet<T> {
        let mut changes = ChangeSet::default();
        {
            let mut guard = sync::write(&self.view);
            let previous = guard.clone();
            let mut next = CacheView::with_capacity(values.len());

            for value in values {
                let id = value.notification_id();
                debug_assert!(
                    !next.index.contains_key(&id),
                    "duplicate notification id {id} in one refresh"
                );
                if next.index.contains_key(&id) {
                    error!(notification_id = %id, "Duplicate notification id in refresh batch; skipping");
                    continue;
                }

                match previous.get(&id) {
                    Some(existing) => {
                        let mut notification = existing.clone();
                        let changed = existing.get().revision() != value.revision();
                        notification.replace_value(value.clone());
                        if changed {
                            changes.updated.push(notification.clone());
                        }
                        next.push(notification);
                    }
                    None => {
                        let notification = Notification::new(
                            id,
                            value.clone(),
                            self.policy.template(value),
                            value.is_resolved(),
                        );
                        changes.added.push(notification.clone());
                        next.push(notification);
                    }
                }
            }

            let kept: HashSet<&T::Id> = next.index.keys().collect();
            changes.removed = previous
                .notifications
                .iter()
                .map(|n| n.id())
                .filter(|id| !kept.contains(id))
                .cloned()
                .collect();

            *guard = Arc::new(next);
            if !changes.is_empty() {
                self.enqueue(changes.events());
            }
        }

        if !changes.is_empty() {
            debug!(
                added = changes.added.len(),
                updated = changes.updated.len(),
                removed = changes.removed.len(),
                "Notifications reconciled"
            );
            self.deliver_pending();
        }
        changes
    }

    /// Returns false if the id is unknown or the notification was already read
    pub fn mark_read(&self, id: &T::Id) -> bool {
        self.update_flag(id, |n| n.set_read(true))
    }

    /// Returns false if the id is unknown or the notification was already acknowledged
    pub fn mark_acknowledged(&self, id: &T::Id) -> bool {
        self.update_flag(id, |n| n.set_acknowledged(true))
    }

    fn update_flag(
        &self,
        id: &T::Id,
        apply: impl FnOnce(&mut Notification<T, T::Id>) -> bool,
    ) -> bool {
        let updated = {
            let mut guard = sync::write(&self.view);
            let Some(&index) = guard.index.get(id) else {
                return false;
            };

            // Probe on a copy so an unchanged flag never forces a copy-on-write
            let mut probe = guard.notifications[index].clone();
            if !apply(&mut probe) {
                return false;
            }
            Arc::make_mut(&mut *guard).notifications[index] = probe.clone();
            self.enqueue(vec![NotificationEvent::Updated(probe.clone())]);
            probe
        };

        debug!(
            notification_id = %id,
            read = updated.is_read(),
            acknowledged = updated.is_acknowledged(),
            "Notification flags updated"
        );
        self.deliver_pending();
        true
    }

    /// Must be called with the view write lock held
    fn enqueue(&self, events: Vec<NotificationEvent<T, T::Id>>) {
        sync::lock(&self.outbox).queue.push_back(events);
    }

    /// Drain the outbox unless another call is already draining it
    fn deliver_pending(&self) {
        {
            let mut outbox = sync::lock(&self.outbox);
            if outbox.delivering {
                return;
            }
            outbox.delivering = true;
        }
        loop {
            let batch = {
                let mut outbox = sync::lock(&self.outbox);
                match outbox.queue.pop_front() {
                    Some(batch) => batch,
                    None => {
                        outbox.delivering = false;
                        return;
                    }
                }
            };
            // Listener panics are caught inside dispatch
            self.listeners.dispatch(&batch);
        }
    }

    pub fn snapshot(&self) -> NotificationSnapshot<T> {
        NotificationSnapshot(sync::read(&self.view).clone())
    }

    pub fn get(&self, id: &T::Id) -> Option<Notification<T, T::Id>> {
        sync::read(&self.view).get(id).cloned()
    }

    pub fn unread_count(&self) -> usize {
        self.snapshot().unread_count()
    }

    pub fn len(&self) -> usize {
        sync::read(&self.view).notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self, listener: Arc<dyn NotificationListener<T>>) -> bool {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, listener: &Arc<dyn NotificationListener<T>>) -> bool {
        self.listeners.unsubscribe(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
