//! Top-level error types for the airing scheduler.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Media lookup (AniList) errors.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("lookup request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("AniList returned HTTP {status}")]
    Status { status: u16 },

    #[error("malformed lookup response: {0}")]
    Malformed(String),
}

impl LookupError {
    /// Transient failures worth retrying: network errors, 5xx, and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            LookupError::Request(_) => true,
            LookupError::Status { status } => *status >= 500 || *status == 429,
            LookupError::Malformed(_) => false,
        }
    }
}

/// Tracking store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Message delivery and guild resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("channel {channel_id} is unavailable")]
    ChannelUnavailable { channel_id: String },

    #[error("send failed: {0}")]
    Send(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
