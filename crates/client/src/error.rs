//! Errors raised inside the sync core.
//!
//! None of these are fatal: every component recovers locally and reports
//! through connection status or stale-but-present snapshots.

use chama_shared::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The device reported itself offline.
    #[error("network unavailable")]
    NetworkUnavailable,
    /// A push channel could not be opened.
    #[error("failed to establish push channel for {key}: {reason}")]
    ChannelEstablish { key: String, reason: String },
    /// A single poll's data fetch failed.
    #[error("fetch failed: {0}")]
    Fetch(#[from] ApiError),
    /// An optional endpoint is absent on this server.
    #[error("endpoint not available: {endpoint}")]
    NotFound { endpoint: String },
}

impl SyncError {
    pub fn channel(key: impl ToString, reason: impl ToString) -> Self {
        SyncError::ChannelEstablish {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }

    /// Message suitable for showing next to stale data.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Fetch(api) => api.user_message(),
            other => other.to_string(),
        }
    }
}
