//! Error types shared by every TierNotify crate.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TierNotifyError>;

/// Errors produced while loading, evaluating, delivering, or persisting.
#[derive(Debug, Error)]
pub enum TierNotifyError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    /// A recipient, usage-signal, asset, or activation lookup failed.
    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Record data that cannot be interpreted: an unknown package or tier,
    /// or enrollment dates that cannot form a trial window.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TierNotifyError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }
}
