//! Action execution against the release backend.
//!
//! Backend-logic failures are never retried here: they surface as
//! condition failures and rely on the next pass's backoff-driven
//! requeue. Artifact fetches are different: transient network failure
//! is not a semantic release failure, so fetches retry in-pass up to a
//! configured attempt count with jittered exponential backoff. Every
//! mutating call is bounded by the release's policy timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use capstan_core::{AppliedAction, ChartRef, ObjectRef, Release};

use crate::backoff::jittered_backoff;
use crate::config::ReconcilerConfig;
use crate::error::{Error as EngineError, Result};
use crate::planner::{Plan, PlannedAction};

/// A fetched chart artifact with its resolved revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Concrete revision the version constraint resolved to.
    pub revision: String,
    /// Packaged chart bytes.
    pub bytes: Vec<u8>,
}

/// Artifact fetch failure classes. Only the transient class is retried.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network-ish failure, worth retrying.
    #[error("transient fetch failure: {reason}")]
    Transient { reason: String },
    /// The artifact does not exist; retrying cannot help.
    #[error("artifact not found: {reason}")]
    NotFound { reason: String },
}

/// Fetches chart artifacts from storage.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Resolve and fetch the artifact for a chart reference.
    async fn fetch(&self, chart: &ChartRef) -> std::result::Result<Artifact, FetchError>;
}

/// Opaque backend failure. The engine surfaces the message and decides
/// scheduling; it never interprets backend internals.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// Result of a successful mutating backend action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutcome {
    /// Revision now deployed.
    pub revision: String,
    /// Digest over the manifests the action applied.
    pub manifest_digest: String,
    /// Objects the action applied, recorded for drift detection.
    pub applied_objects: Vec<ObjectRef>,
}

/// Result of a backend test run. Does not mutate applied-object state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    /// Whether all test hooks passed.
    pub passed: bool,
    /// Backend-provided detail.
    pub message: String,
}

/// The release backend: performs lifecycle actions, fails opaquely.
#[async_trait]
pub trait ReleaseBackend: Send + Sync {
    /// Install the chart for a release that has no deployed revision.
    async fn install(
        &self,
        release: &Release,
        artifact: &Artifact,
    ) -> std::result::Result<BackendOutcome, BackendError>;

    /// Upgrade the deployed release to the fetched artifact.
    async fn upgrade(
        &self,
        release: &Release,
        artifact: &Artifact,
    ) -> std::result::Result<BackendOutcome, BackendError>;

    /// Roll the deployed release back to a previous revision.
    async fn rollback(
        &self,
        release: &Release,
        to_revision: &str,
    ) -> std::result::Result<BackendOutcome, BackendError>;

    /// Remove the release from the backend.
    async fn uninstall(&self, release: &Release) -> std::result::Result<(), BackendError>;

    /// Run test hooks for the deployed revision.
    async fn test(&self, release: &Release) -> std::result::Result<TestOutcome, BackendError>;
}

/// What the executor did this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// A mutating action succeeded.
    Applied {
        /// Which action ran.
        action: AppliedAction,
        /// What the backend reported.
        outcome: BackendOutcome,
    },
    /// Test hooks ran to completion (pass or fail is in the outcome).
    Tested {
        /// Revision the tests ran against.
        revision: String,
        /// Hook results.
        outcome: TestOutcome,
    },
    /// The release was uninstalled.
    Uninstalled,
    /// The plan required no backend work.
    Skipped,
}

/// Executes planned actions with bounded timeouts and fetch retry.
pub struct ActionExecutor {
    backend: Arc<dyn ReleaseBackend>,
    fetcher: Arc<dyn ArtifactFetcher>,
    artifact_retries: u32,
    fetch_base_backoff: Duration,
    fetch_max_backoff: Duration,
}

impl ActionExecutor {
    /// Create an executor from engine configuration.
    pub fn new(
        backend: Arc<dyn ReleaseBackend>,
        fetcher: Arc<dyn ArtifactFetcher>,
        config: &ReconcilerConfig,
    ) -> Self {
        Self {
            backend,
            fetcher,
            artifact_retries: config.artifact_retries.max(1),
            fetch_base_backoff: config.base_backoff,
            // Fetch retries happen inside one pass; cap their spacing
            // well below the reconcile-level backoff cap.
            fetch_max_backoff: config.max_backoff.min(Duration::from_secs(30)),
        }
    }

    /// Execute the planned action for `release`.
    ///
    /// # Errors
    ///
    /// Fetch exhaustion, missing artifacts, backend failures, and
    /// policy-timeout overruns, as the matching [`EngineError`] kinds.
    pub async fn execute(&self, release: &Release, plan: &Plan) -> Result<ExecutionOutcome> {
        match &plan.action {
            PlannedAction::Install => self.install(release).await,
            PlannedAction::Upgrade => self.upgrade(release).await,
            PlannedAction::RemediateRollback { to_revision } => {
                self.rollback(release, to_revision).await
            }
            PlannedAction::RemediateReinstall => self.reinstall(release).await,
            PlannedAction::Uninstall => self.uninstall(release).await,
            PlannedAction::Test => self.test(release).await,
            PlannedAction::Noop(_) => Ok(ExecutionOutcome::Skipped),
        }
    }

    async fn install(&self, release: &Release) -> Result<ExecutionOutcome> {
        let artifact = self.fetch_artifact(&release.spec.chart).await?;
        let timeout = release.spec.action_timeout(release.spec.install.timeout);
        let outcome = bounded(
            AppliedAction::Install,
            timeout,
            self.backend.install(release, &artifact),
        )
        .await?;
        info!(release = %release.id, revision = %outcome.revision, "install succeeded");
        Ok(ExecutionOutcome::Applied {
            action: AppliedAction::Install,
            outcome,
        })
    }

    async fn upgrade(&self, release: &Release) -> Result<ExecutionOutcome> {
        let artifact = self.fetch_artifact(&release.spec.chart).await?;
        let timeout = release.spec.action_timeout(release.spec.upgrade.timeout);
        let outcome = bounded(
            AppliedAction::Upgrade,
            timeout,
            self.backend.upgrade(release, &artifact),
        )
        .await?;
        info!(release = %release.id, revision = %outcome.revision, "upgrade succeeded");
        Ok(ExecutionOutcome::Applied {
            action: AppliedAction::Upgrade,
            outcome,
        })
    }

    async fn rollback(&self, release: &Release, to_revision: &str) -> Result<ExecutionOutcome> {
        let timeout = release.spec.action_timeout(release.spec.rollback.timeout);
        let outcome = bounded(
            AppliedAction::Rollback,
            timeout,
            self.backend.rollback(release, to_revision),
        )
        .await?;
        info!(release = %release.id, revision = %to_revision, "rollback succeeded");
        Ok(ExecutionOutcome::Applied {
            action: AppliedAction::Rollback,
            outcome,
        })
    }

    /// Remediation without a usable known-good revision: uninstall,
    /// then install fresh.
    async fn reinstall(&self, release: &Release) -> Result<ExecutionOutcome> {
        let timeout = release.spec.action_timeout(release.spec.uninstall.timeout);
        bounded_unit(
            AppliedAction::Uninstall,
            timeout,
            self.backend.uninstall(release),
        )
        .await?;
        debug!(release = %release.id, "uninstalled for reinstall remediation");
        self.install(release).await
    }

    async fn uninstall(&self, release: &Release) -> Result<ExecutionOutcome> {
        let timeout = release.spec.action_timeout(release.spec.uninstall.timeout);
        bounded_unit(
            AppliedAction::Uninstall,
            timeout,
            self.backend.uninstall(release),
        )
        .await?;
        info!(release = %release.id, "uninstall succeeded");
        Ok(ExecutionOutcome::Uninstalled)
    }

    async fn test(&self, release: &Release) -> Result<ExecutionOutcome> {
        let timeout = release.spec.action_timeout(release.spec.test.timeout);
        let revision = release
            .status
            .last_applied_revision
            .clone()
            .unwrap_or_else(|| release.spec.chart.version.clone());
        let outcome = tokio::time::timeout(timeout, self.backend.test(release))
            .await
            .map_err(|_| EngineError::ActionTimeout {
                action: AppliedAction::Test.to_string(),
                timeout,
            })?
            .map_err(|e| EngineError::action_failed(AppliedAction::Test.to_string(), e.0))?;
        Ok(ExecutionOutcome::Tested { revision, outcome })
    }

    async fn fetch_artifact(&self, chart: &ChartRef) -> Result<Artifact> {
        let mut last_reason = String::new();
        for attempt in 0..self.artifact_retries {
            match self.fetcher.fetch(chart).await {
                Ok(artifact) => return Ok(artifact),
                Err(FetchError::NotFound { reason }) => {
                    return Err(EngineError::ArtifactNotFound { reason });
                }
                Err(FetchError::Transient { reason }) => {
                    last_reason = reason;
                    if attempt + 1 < self.artifact_retries {
                        let delay = jittered_backoff(
                            attempt,
                            self.fetch_base_backoff,
                            self.fetch_max_backoff,
                        );
                        warn!(
                            chart = %chart.chart,
                            attempt = attempt + 1,
                            retry_in = ?delay,
                            reason = %last_reason,
                            "artifact fetch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(EngineError::FetchExhausted {
            attempts: self.artifact_retries,
            reason: last_reason,
        })
    }
}

/// Run a mutating backend call under its policy timeout.
async fn bounded<F>(action: AppliedAction, timeout: Duration, fut: F) -> Result<BackendOutcome>
where
    F: std::future::Future<Output = std::result::Result<BackendOutcome, BackendError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| EngineError::ActionTimeout {
            action: action.to_string(),
            timeout,
        })?
        .map_err(|e| EngineError::action_failed(action.to_string(), e.0))
}

async fn bounded_unit<F>(action: AppliedAction, timeout: Duration, fut: F) -> Result<()>
where
    F: std::future::Future<Output = std::result::Result<(), BackendError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| EngineError::ActionTimeout {
            action: action.to_string(),
            timeout,
        })?
        .map_err(|e| EngineError::action_failed(action.to_string(), e.0))
}
