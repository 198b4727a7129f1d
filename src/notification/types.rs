//! Notification model
//!
//! A `Notification` wraps a live negotiable value together with flags that
//! only exist on this client. The backend never sees `read` or
//! `acknowledged`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::negotiation::{NegotiationTransaction, Payload, TransactionId};

/// Defines the notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationSeverity {
    Message,
    Warning,
    Alert,
}

/// What the notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    General,
    StrategicRoute,
    SarTask,
}

/// How a consumer should announce a new notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationAlert {
    Popup,
    Beep,
    SystemTray,
}

/// Anything the reconciliation cache can wrap
pub trait Negotiable: Clone + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Stable identity used to match values across refreshes
    fn notification_id(&self) -> Self::Id;

    /// Resolved values start out acknowledged
    fn is_resolved(&self) -> bool;

    /// Changes whenever the value gains new content
    fn revision(&self) -> usize;
}

impl<P: Payload> Negotiable for Arc<NegotiationTransaction<P>> {
    type Id = TransactionId;

    fn notification_id(&self) -> TransactionId {
        self.id()
    }

    fn is_resolved(&self) -> bool {
        self.status().is_terminal()
    }

    fn revision(&self) -> usize {
        self.messages().len()
    }
}

/// Presentation metadata derived once, when a notification is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTemplate {
    pub notification_type: NotificationType,
    pub severity: NotificationSeverity,
    pub title: String,
    pub description: String,
    pub target_id: Option<String>,
    pub alerts: Vec<NotificationAlert>,
    pub auto_acknowledge: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-category rules for turning a value into notification metadata
pub trait NotificationPolicy<T>: Send + Sync {
    fn template(&self, value: &T) -> NotificationTemplate;
}

/// The reconciled, consumer-facing wrapper
#[derive(Debug, Clone, Serialize)]
pub struct Notification<T, I> {
    id: I,
    value: T,
    notification_type: NotificationType,
    severity: NotificationSeverity,
    title: String,
    description: String,
    target_id: Option<String>,
    alerts: Vec<NotificationAlert>,
    read: bool,
    acknowledged: bool,
    auto_acknowledge: bool,
    created_at: DateTime<Utc>,
}

impl<T, I> Notification<T, I> {
    pub fn new(id: I, value: T, template: NotificationTemplate, acknowledged: bool) -> Self {
        Self {
            id,
            value,
            notification_type: template.notification_type,
            severity: template.severity,
            title: template.title,
            description: template.description,
            target_id: template.target_id,
            alerts: template.alerts,
            read: false,
            acknowledged,
            auto_acknowledge: template.auto_acknowledge,
            created_at: template.created_at,
        }
    }

    pub fn id(&self) -> &I {
        &self.id
    }

    /// The wrapped value as of the latest refresh
    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn notification_type(&self) -> NotificationType {
        self.notification_type
    }

    pub fn severity(&self) -> NotificationSeverity {
        self.severity
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    pub fn alerts(&self) -> &[NotificationAlert] {
        &self.alerts
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Acknowledged automatically when read
    pub fn is_auto_acknowledge(&self) -> bool {
        self.auto_acknowledge
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns true if the flag changed
    pub(crate) fn set_read(&mut self, read: bool) -> bool {
        if self.read == read {
            return false;
        }
        self.read = read;
        if read && self.auto_acknowledge {
            self.acknowledged = true;
        }
        true
    }

    /// Returns true if the flag changed
    pub(crate) fn set_acknowledged(&mut self, acknowledged: bool) -> bool {
        if self.acknowledged == acknowledged {
            return false;
        }
        self.acknowledged = acknowledged;
        true
    }

    pub(crate) fn replace_value(&mut self, value: T) {
        self.value = value;
    }

    /// Plain-text rendering for logs and simple consumers
    pub fn summary(&self) -> String {
        format!(
            "[{:?}] {} ({}) - {}",
            self.severity,
            self.title,
            self.created_at.format("%Y-%m-%d %H:%M"),
            self.description
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(auto_acknowledge: bool) -> NotificationTemplate {
        NotificationTemplate {
            notification_type: NotificationType::General,
            severity: NotificationSeverity::Message,
            title: "Route request".into(),
            description: "Awaiting reply".into(),
            target_id: Some("stcc://sound".into()),
            alerts: vec![NotificationAlert::Popup],
            auto_acknowledge,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_new_notification_is_unread() {
        let n = Notification::new(1u64, "value", template(false), false);
        assert!(!n.is_read());
        assert!(!n.is_acknowledged());
        assert_eq!(n.target_id(), Some("stcc://sound"));
        assert_eq!(n.alerts(), &[NotificationAlert::Popup]);
    }

    #[test]
    fn test_flag_setters_report_changes_only() {
        let mut n = Notification::new(1u64, "value", template(false), false);
        assert!(n.set_read(true));
        assert!(!n.set_read(true));
        assert!(!n.is_acknowledged());
        assert!(n.set_acknowledged(true));
        assert!(!n.set_acknowledged(true));
    }

    #[test]
    fn test_auto_acknowledge_on_read() {
        let mut n = Notification::new(1u64, "value", template(true), false);
        assert!(n.set_read(true));
        assert!(n.is_acknowledged());
    }

    #[test]
    fn test_summary_mentions_title_and_description() {
        let n = Notification::new(1u64, "value", template(false), false);
        let summary = n.summary();
        assert!(summary.contains("Route request"));
        assert!(summary.contains("Awaiting reply"));
    }
}
