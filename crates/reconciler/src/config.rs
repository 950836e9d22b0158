//! Engine-level configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the reconciliation engine. Per-release knobs live
/// on the release spec; these bound the engine as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Global cap on concurrently in-flight reconciles.
    #[serde(default = "default_concurrent")]
    pub concurrent: usize,
    /// Fixed interval at which unready dependencies are reevaluated.
    #[serde(default = "default_dependency_requeue")]
    pub dependency_requeue: Duration,
    /// Maximum attempts when an artifact fetch fails transiently.
    #[serde(default = "default_artifact_retries")]
    pub artifact_retries: u32,
    /// Grace period for in-flight passes on shutdown.
    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout: Duration,
    /// Base delay of the error rate limiter.
    #[serde(default = "default_base_backoff")]
    pub base_backoff: Duration,
    /// Cap of the error rate limiter.
    #[serde(default = "default_max_backoff")]
    pub max_backoff: Duration,
    /// Permit dependency references that cross namespaces.
    #[serde(default)]
    pub allow_cross_namespace_refs: bool,
    /// Per-object bound on drift status polls.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: Duration,
}

fn default_concurrent() -> usize {
    4
}

fn default_dependency_requeue() -> Duration {
    Duration::from_secs(30)
}

fn default_artifact_retries() -> u32 {
    9
}

fn default_graceful_shutdown_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_base_backoff() -> Duration {
    Duration::from_millis(750)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(900)
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            concurrent: default_concurrent(),
            dependency_requeue: default_dependency_requeue(),
            artifact_retries: default_artifact_retries(),
            graceful_shutdown_timeout: default_graceful_shutdown_timeout(),
            base_backoff: default_base_backoff(),
            max_backoff: default_max_backoff(),
            allow_cross_namespace_refs: false,
            poll_timeout: default_poll_timeout(),
        }
    }
}

impl ReconcilerConfig {
    /// Validate bounds the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero worker cap, a zero
    /// dependency interval, or an inverted backoff range.
    pub fn validate(&self) -> Result<()> {
        if self.concurrent == 0 {
            return Err(Error::invalid_config("concurrent must be at least 1"));
        }
        if self.dependency_requeue.is_zero() {
            return Err(Error::invalid_config(
                "dependency_requeue must be greater than zero",
            ));
        }
        if self.base_backoff.is_zero() || self.base_backoff > self.max_backoff {
            return Err(Error::invalid_config(
                "backoff range requires 0 < base_backoff <= max_backoff",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ReconcilerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrent, 4);
        assert_eq!(config.dependency_requeue, Duration::from_secs(30));
        assert_eq!(config.artifact_retries, 9);
        assert!(!config.allow_cross_namespace_refs);
    }

    #[test]
    fn rejects_zero_workers() {
        let config = ReconcilerConfig {
            concurrent: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_backoff() {
        let config = ReconcilerConfig {
            base_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
