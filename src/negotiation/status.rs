//! Negotiation status definitions
//!
//! Status IDs are stable so they can travel over the wire as a SMALLINT.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Negotiation status
///
/// Terminal statuses: AGREED (10), REJECTED (-10), CANCELED (-20)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum NegotiationStatus {
    /// Initial status - waiting for the other party to answer the latest proposal
    Pending = 0,

    /// Terminal: the requester accepted the authority's latest proposal
    Agreed = 10,

    /// Terminal: either party rejected the negotiation
    Rejected = -10,

    /// Terminal: the requester withdrew the request
    Canceled = -20,
}

impl NegotiationStatus {
    /// Check if this is a terminal status (no more messages accepted)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NegotiationStatus::Pending)
    }

    /// Get the numeric status ID
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from a numeric status ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(NegotiationStatus::Pending),
            10 => Some(NegotiationStatus::Agreed),
            -10 => Some(NegotiationStatus::Rejected),
            -20 => Some(NegotiationStatus::Canceled),
            _ => None,
        }
    }

    /// Get human-readable status name
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationStatus::Pending => "PENDING",
            NegotiationStatus::Agreed => "AGREED",
            NegotiationStatus::Rejected => "REJECTED",
            NegotiationStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for NegotiationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for NegotiationStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        NegotiationStatus::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(NegotiationStatus::Agreed.is_terminal());
        assert!(NegotiationStatus::Rejected.is_terminal());
        assert!(NegotiationStatus::Canceled.is_terminal());

        assert!(!NegotiationStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_id_lookup() {
        assert_eq!(NegotiationStatus::from_id(10), Some(NegotiationStatus::Agreed));
        assert_eq!(
            NegotiationStatus::try_from(-20),
            Ok(NegotiationStatus::Canceled)
        );
        assert!(NegotiationStatus::from_id(999).is_none());
        assert!(NegotiationStatus::try_from(-999).is_err());
    }

    #[test]
    fn test_display_and_serde_name_agree() {
        assert_eq!(NegotiationStatus::Pending.to_string(), "PENDING");
        assert_eq!(
            serde_json::to_string(&NegotiationStatus::Canceled).unwrap(),
            "\"CANCELED\""
        );
    }
}
