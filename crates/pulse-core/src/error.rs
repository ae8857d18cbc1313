//! Error types for the Pulse client core

use thiserror::Error;

/// Main error type for Pulse client operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// No active session where one is required
    #[error("Authentication required")]
    AuthRequired,

    /// Expected a single row and found none (e.g. a deleted post
    /// still reachable from navigation)
    #[error("{0} not found: {1}")]
    NotFound(String, String),

    /// Input rejected before or by the backend (e.g. duplicate
    /// username, over-long post content)
    #[error("Validation failed for {field}: {message}")]
    Validation {
        /// Offending field, for inline surfacing next to the input
        field: String,
        /// Human-readable reason
        message: String,
    },

    /// Transient network failure, presumed recoverable by retry
    #[error("Network error: {0}")]
    Network(String),

    /// Object storage upload failed
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Subscription channel closed unexpectedly
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl FeedError {
    /// Convenience constructor for [`FeedError::NotFound`]
    pub fn not_found(what: impl Into<String>, id: impl std::fmt::Display) -> Self {
        FeedError::NotFound(what.into(), id.to_string())
    }

    /// Convenience constructor for [`FeedError::Validation`]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        FeedError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether a retry is a sensible recovery for this error.
    ///
    /// Screens use this to decide between a retry affordance and a
    /// terminal failure state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Network(_) | FeedError::Upload(_))
    }
}

/// Result type alias using FeedError
pub type FeedResult<T> = Result<T, FeedError>;
