use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdxError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("SSP not configured: {0}")]
    NotConfigured(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, AdxError>;

/// Failure classification for a single bidder call. These are recorded
/// against health/circuit state and never surface to the SSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidderErrorKind {
    Timeout,
    Network,
    RateLimit,
    Protocol,
    Internal,
}

#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct BidderError {
    pub kind: BidderErrorKind,
    pub message: String,
}

impl BidderError {
    pub fn new(kind: BidderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(BidderErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BidderErrorKind::Network, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(BidderErrorKind::Protocol, message)
    }

    /// Timeout, network and rate-limit failures may be retried; protocol
    /// and internal failures are terminal for the bidder call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            BidderErrorKind::Timeout | BidderErrorKind::Network | BidderErrorKind::RateLimit
        )
    }
}
