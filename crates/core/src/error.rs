//! Error types for the convrag domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each external capability has its own error type; the pipeline folds
//! them into the top-level [`Error`] at its boundary.

use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all convrag operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Request errors ---
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // --- External capability errors ---
    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Generation failed: {0}")]
    Generation(#[from] ProviderError),

    // --- Session state ---
    #[error("Commit conflict: {0}")]
    CommitConflict(#[from] CommitConflict),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the client may resubmit the same request against fresh state.
    ///
    /// Only commit conflicts qualify: the work succeeded but could not be
    /// recorded. Capability failures have already been retried internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CommitConflict(_))
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Capability errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Query embedding failed: {0}")]
    Embedding(#[from] ProviderError),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Search timed out: {0}")]
    Timeout(String),
}

/// A session write rejected because the caller's snapshot was stale.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("session {session_id} expected {expected} prior turns, found {}", describe_actual(.actual))]
pub struct CommitConflict {
    pub session_id: String,
    pub expected: usize,
    /// Current length, or `None` if the session was cleared meanwhile.
    pub actual: Option<usize>,
}

fn describe_actual(actual: &Option<usize>) -> String {
    match actual {
        Some(n) => n.to_string(),
        None => "no session".into(),
    }
}

/// Classifies capability errors for the bounded retry policy.
pub trait Transient: Sized {
    /// Whether another attempt may succeed.
    fn is_transient(&self) -> bool;

    /// The error reported when an attempt exceeds its deadline.
    fn timed_out(operation: &str, after: Duration) -> Self;
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        Self::Timeout(format!("{operation} after {}s", after.as_secs_f32()))
    }
}

impl Transient for RetrievalError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Embedding(inner) => inner.is_transient(),
            Self::IndexUnavailable(_) | Self::InvalidQuery(_) => false,
        }
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        Self::Timeout(format!("{operation} after {}s", after.as_secs_f32()))
    }
}
