//! Validation errors for the data model.

use thiserror::Error;

/// A release spec that the engine cannot safely act on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The reconcile interval is zero.
    #[error("reconcile interval must be greater than zero")]
    ZeroInterval,
    /// The attempt history bound is zero.
    #[error("max_history must be at least 1")]
    ZeroHistory,
    /// The chart reference is missing its source or chart name.
    #[error("chart reference requires both a source name and a chart name")]
    IncompleteChartRef,
}
