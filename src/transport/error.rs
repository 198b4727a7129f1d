use thiserror::Error;

/// Failures reported by a transport adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection lost")]
    ConnectionLost,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Rejected by counterpart: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::ConnectionLost => "CONNECTION_LOST",
            TransportError::Timeout(_) => "TIMEOUT",
            TransportError::SendFailed(_) => "SEND_FAILED",
            TransportError::FetchFailed(_) => "FETCH_FAILED",
            TransportError::Rejected(_) => "REJECTED",
        }
    }

    /// Whether the same call may succeed later without changing the request
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }
}
