//! Notification policy for negotiations
//!
//! Derives title, description, severity and alerts for a transaction the
//! first time the cache sees it.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::negotiation::{NegotiationCategory, NegotiationStatus, NegotiationTransaction, Origin, Payload};
use crate::notification::{
    NotificationAlert, NotificationPolicy, NotificationSeverity, NotificationTemplate,
    NotificationType,
};

pub struct NegotiationPolicy<P> {
    category: NegotiationCategory,
    local_role: Origin,
    auto_acknowledge: bool,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Payload> NegotiationPolicy<P> {
    pub fn new(category: NegotiationCategory, local_role: Origin, auto_acknowledge: bool) -> Self {
        Self {
            category,
            local_role,
            auto_acknowledge,
            _payload: PhantomData,
        }
    }

    fn notification_type(&self) -> NotificationType {
        match self.category {
            NegotiationCategory::StrategicRoute => NotificationType::StrategicRoute,
            NegotiationCategory::SarTask => NotificationType::SarTask,
        }
    }

    fn title(&self, tx: &NegotiationTransaction<P>) -> String {
        let subject = match self.category {
            NegotiationCategory::StrategicRoute => "Route request",
            NegotiationCategory::SarTask => "SAR task",
        };
        format!("{} #{} with {}", subject, tx.id(), tx.counterpart())
    }

    fn description(&self, tx: &NegotiationTransaction<P>) -> String {
        let state = match tx.status() {
            NegotiationStatus::Pending if tx.awaiting_reply_from(self.local_role.other()) => {
                "Awaiting reply from counterpart"
            }
            NegotiationStatus::Pending => "Reply required",
            NegotiationStatus::Agreed => "Agreed",
            NegotiationStatus::Rejected => "Rejected",
            NegotiationStatus::Canceled => "Cancelled",
        };
        match tx.latest_message().and_then(|m| m.comment()) {
            Some(comment) => format!("{}: {}", state, comment),
            None => state.to_string(),
        }
    }
}

impl<P: Payload> NotificationPolicy<Arc<NegotiationTransaction<P>>> for NegotiationPolicy<P> {
    fn template(&self, tx: &Arc<NegotiationTransaction<P>>) -> NotificationTemplate {
        let reply_required = tx.awaiting_reply_from(self.local_role);

        let (severity, alerts) = if reply_required {
            (
                NotificationSeverity::Warning,
                vec![NotificationAlert::Popup, NotificationAlert::Beep],
            )
        } else {
            (NotificationSeverity::Message, Vec::new())
        };

        NotificationTemplate {
            notification_type: self.notification_type(),
            severity,
            title: self.title(tx),
            description: self.description(tx),
            target_id: Some(tx.counterpart().to_string()),
            alerts,
            auto_acknowledge: self.auto_acknowledge,
            created_at: tx.created_at(),
        }
    }
}
