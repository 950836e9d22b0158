//! Error types for the reconciliation engine.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// How an error should drive scheduling. Only the orchestrator turns a
/// class into a scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network-ish failure, safe to retry on the standard backoff.
    Transient,
    /// Requires user action; retried only on the capped backoff tail.
    Permanent,
    /// The backend genuinely failed the action; retried on the standard
    /// backoff, bounded by remediation retry limits.
    Semantic,
    /// Unexpected internal failure, retried on the standard backoff and
    /// logged for operator visibility.
    Internal,
}

/// Engine error types.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Fetching the chart artifact kept failing transiently.
    #[error("artifact fetch failed after {attempts} attempts: {reason}")]
    FetchExhausted { attempts: u32, reason: String },

    /// The chart artifact does not exist.
    #[error("artifact not found: {reason}")]
    ArtifactNotFound { reason: String },

    /// A dependency reference crosses namespaces without permission.
    #[error("dependency '{dependency}' of '{release}' denied: cross-namespace references are not allowed")]
    AccessDenied { release: String, dependency: String },

    /// A lifecycle action failed in the backend.
    #[error("{action} failed: {reason}")]
    ActionFailed { action: String, reason: String },

    /// A lifecycle action exceeded its policy timeout.
    #[error("{action} timed out after {timeout:?}")]
    ActionTimeout { action: String, timeout: Duration },

    /// A status write lost an optimistic-concurrency race.
    #[error("stale status write for '{release}'")]
    Conflict { release: String },

    /// The resource store failed.
    #[error("resource store error: {reason}")]
    StoreFailed { reason: String },

    /// The status aggregator failed unexpectedly.
    #[error("status poll failed for {object}: {reason}")]
    PollFailed { object: String, reason: String },

    /// A reconcile pass panicked; the worker pool survives it.
    #[error("reconcile pass panicked: {reason}")]
    Panicked { reason: String },

    /// The engine is shutting down and refused new work.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Invalid engine or release configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Classify for scheduling.
    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::FetchExhausted { .. }
            | Self::Conflict { .. }
            | Self::StoreFailed { .. }
            | Self::ShuttingDown => ErrorClass::Transient,
            Self::ArtifactNotFound { .. }
            | Self::AccessDenied { .. }
            | Self::InvalidConfig { .. } => ErrorClass::Permanent,
            Self::ActionFailed { .. } | Self::ActionTimeout { .. } => ErrorClass::Semantic,
            Self::PollFailed { .. } | Self::Panicked { .. } => ErrorClass::Internal,
        }
    }

    /// Create an action failure.
    pub fn action_failed(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ActionFailed {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// Create a store failure.
    pub fn store_failed(reason: impl Into<String>) -> Self {
        Self::StoreFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

impl From<capstan_core::ValidationError> for Error {
    fn from(err: capstan_core::ValidationError) -> Self {
        Self::InvalidConfig {
            reason: err.to_string(),
        }
    }
}
