//! The reconcile orchestrator.
//!
//! Drives one pass per release through observe, plan, execute, and
//! conclude. Passes for the same release identity are serialized with a
//! per-identity lock; passes across identities run concurrently up to
//! the configured cap. Each pass runs in its own task so a panic is
//! contained to that pass and surfaces as an internal error instead of
//! taking down the worker pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use capstan_core::{
    AppliedAction, ConditionStatus, ConditionType, Reason, Release, ReleaseId, ReleaseStatus,
};

use crate::backoff::RateLimiter;
use crate::config::ReconcilerConfig;
use crate::drift::{DriftDetector, DriftReport, StatusPoller};
use crate::error::{Error, ErrorClass, Result};
use crate::events::{emit, EventSink, ReleaseEvent};
use crate::executor::{ActionExecutor, ArtifactFetcher, ExecutionOutcome, ReleaseBackend};
use crate::planner::{plan, NoopCause, Plan, PlannedAction};
use crate::resolver::{AccessPolicy, AllowAll, DenyCrossNamespace, DependencyResolver};
use crate::shutdown::ShutdownCoordinator;
use crate::status::{PassResult, Schedule, StatusManager};
use crate::store::ResourceStore;

/// In-pass retries for a status write that loses the optimistic
/// concurrency race. Beyond this the whole pass is retried via requeue.
const STATUS_CONFLICT_RETRIES: u32 = 3;

/// Result of one reconcile pass, as seen by the embedding scheduler.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Nothing left to do; the next spec edit retriggers.
    Done,
    /// Run again after the given delay.
    RequeueAfter(Duration),
    /// The pass failed before its result could be persisted; retry
    /// after the given delay.
    Error {
        /// What went wrong.
        error: Error,
        /// When to retry.
        requeue_after: Duration,
    },
}

/// Owns the collaborators and concurrency discipline of the engine.
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    resolver: DependencyResolver,
    detector: DriftDetector,
    executor: ActionExecutor,
    status: StatusManager,
    events: Arc<dyn EventSink>,
    shutdown: Arc<ShutdownCoordinator>,
    semaphore: Arc<Semaphore>,
    locks: Mutex<HashMap<ReleaseId, Arc<Mutex<()>>>>,
    limiter: RateLimiter,
    max_backoff: Duration,
}

impl Reconciler {
    /// Wire up an engine from its collaborators.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] when the configuration fails validation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ReconcilerConfig,
        store: Arc<dyn ResourceStore>,
        backend: Arc<dyn ReleaseBackend>,
        fetcher: Arc<dyn ArtifactFetcher>,
        poller: Arc<dyn StatusPoller>,
        events: Arc<dyn EventSink>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let policy: Arc<dyn AccessPolicy> = if config.allow_cross_namespace_refs {
            Arc::new(AllowAll)
        } else {
            Arc::new(DenyCrossNamespace)
        };
        Ok(Arc::new(Self {
            resolver: DependencyResolver::new(Arc::clone(&store), policy),
            detector: DriftDetector::new(poller, config.poll_timeout),
            executor: ActionExecutor::new(backend, fetcher, &config),
            status: StatusManager::new(Arc::clone(&events), &config),
            semaphore: Arc::new(Semaphore::new(config.concurrent)),
            locks: Mutex::new(HashMap::new()),
            limiter: RateLimiter::new(config.base_backoff, config.max_backoff),
            max_backoff: config.max_backoff,
            store,
            events,
            shutdown,
        }))
    }

    /// Reconcile one release identity.
    ///
    /// Waits for the per-identity lock and a concurrency permit, then
    /// runs the pass in a spawned task for panic containment. Never
    /// returns an error as such; failures are folded into the outcome.
    pub async fn reconcile(self: &Arc<Self>, id: ReleaseId) -> ReconcileOutcome {
        let guard = match self.shutdown.begin_pass() {
            Ok(guard) => guard,
            Err(error) => return self.error_outcome(0, error),
        };

        // Identity lock first: a pass queued behind its predecessor
        // must not hold a concurrency slot while it waits.
        let lock = self.identity_lock(&id).await.lock_owned().await;
        let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return self.error_outcome(0, Error::ShuttingDown);
        };

        let this = Arc::clone(self);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let _permit = permit;
            let _lock = lock;
            this.run_pass(task_id).await
        });

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    "panic in reconcile pass".to_string()
                } else {
                    join_err.to_string()
                };
                error!(release = %id, %reason, "reconcile pass aborted");
                self.error_outcome(1, Error::Panicked { reason })
            }
        };
        self.prune_identity_lock(&id).await;
        outcome
    }

    /// Reconcile every known release concurrently, bounded by the
    /// configured cap.
    pub async fn reconcile_all(self: &Arc<Self>) -> Vec<(ReleaseId, ReconcileOutcome)> {
        let ids = match self.store.list().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "listing releases failed");
                return Vec::new();
            }
        };
        let passes = ids.into_iter().map(|id| {
            let this = Arc::clone(self);
            async move {
                let outcome = this.reconcile(id.clone()).await;
                (id, outcome)
            }
        });
        join_all(passes).await
    }

    async fn run_pass(self: Arc<Self>, id: ReleaseId) -> ReconcileOutcome {
        let release = match self.store.get(&id).await {
            Ok(Some(release)) => release,
            Ok(None) => {
                debug!(release = %id, "release no longer exists");
                return ReconcileOutcome::Done;
            }
            Err(error) => return self.error_outcome(0, error),
        };

        if release.deletion_requested {
            return self.finalize(release).await;
        }

        if let Err(validation) = release.spec.validate() {
            let result = PassResult::Failed {
                action: None,
                error: validation.into(),
            };
            return self.conclude_and_persist(&release, Vec::new(), false, result).await;
        }

        // Hold a finalizer before the first action so deletion can wait
        // for a clean uninstall. The write bumps the resource version,
        // so re-read.
        let release = if release.finalizer {
            release
        } else {
            if let Err(error) = self.store.set_finalizer(&id, true).await {
                return self.error_outcome(release.status.failures, error);
            }
            match self.store.get(&id).await {
                Ok(Some(release)) => release,
                Ok(None) => return ReconcileOutcome::Done,
                Err(error) => return self.error_outcome(0, error),
            }
        };

        // Observe dependencies and drift even when the outcome is a
        // noop, so status always reflects the latest look at the world.
        let deps = match self.resolver.resolve(&release).await {
            Ok(deps) => deps,
            Err(error) => {
                let result = PassResult::Failed {
                    action: None,
                    error,
                };
                return self
                    .conclude_and_persist(&release, Vec::new(), false, result)
                    .await;
            }
        };

        let drift = if release.status.applied_objects.is_empty() {
            None
        } else {
            match self.detector.detect(&release.status.applied_objects).await {
                Ok(report) => Some(report),
                Err(error) => {
                    let result = PassResult::Failed {
                        action: None,
                        error,
                    };
                    return self
                        .conclude_and_persist(&release, deps.observed, false, result)
                        .await;
                }
            }
        };
        let drift_clean = drift.as_ref().is_some_and(|report| !report.drifted());

        let plan = plan(&release, &deps, drift.as_ref());
        self.log_plan(&release, &plan, drift.as_ref());

        // Announce mutating work before doing it, so a concurrent
        // observer never sees backend churn with a quiet status.
        let release = if plan.action.is_mutating() {
            match self.mark_reconciling(&release, &plan).await {
                Ok(release) => release,
                Err(error) => return self.error_outcome(release.status.failures, error),
            }
        } else {
            release
        };

        let result = match self.executor.execute(&release, &plan).await {
            Ok(ExecutionOutcome::Applied { action, outcome }) => PassResult::Applied {
                action,
                outcome,
                drift_digest: plan.drift_digest.clone(),
            },
            Ok(ExecutionOutcome::Tested { revision, outcome }) => {
                PassResult::Tested { revision, outcome }
            }
            Ok(ExecutionOutcome::Uninstalled) => {
                // Reachable only on deletion, which is handled above.
                return self.release_finalizer(&release).await;
            }
            Ok(ExecutionOutcome::Skipped) => {
                let cause = match plan.action {
                    PlannedAction::Noop(cause) => cause,
                    _ => NoopCause::Settled,
                };
                PassResult::Noop(cause)
            }
            Err(error) => PassResult::Failed {
                action: failed_action(&plan.action),
                error,
            },
        };

        self.conclude_and_persist(&release, deps.observed, drift_clean, result)
            .await
    }

    /// Deletion path: uninstall from the backend, then let go of the
    /// finalizer so the store can collect the resource.
    async fn finalize(self: &Arc<Self>, release: Release) -> ReconcileOutcome {
        if !release.finalizer {
            return ReconcileOutcome::Done;
        }

        let plan = Plan {
            action: PlannedAction::Uninstall,
            drift_digest: None,
        };
        match self.executor.execute(&release, &plan).await {
            Ok(_) => self.release_finalizer(&release).await,
            Err(error) => {
                warn!(release = %release.id, %error, "uninstall for deletion failed");
                let result = PassResult::Failed {
                    action: Some(AppliedAction::Uninstall),
                    error,
                };
                self.conclude_and_persist(&release, Vec::new(), false, result)
                    .await
            }
        }
    }

    async fn release_finalizer(&self, release: &Release) -> ReconcileOutcome {
        if let Err(error) = self.store.set_finalizer(&release.id, false).await {
            return self.error_outcome(release.status.failures, error);
        }
        info!(release = %release.id, "release uninstalled and finalizer released");
        emit(
            self.events.as_ref(),
            ReleaseEvent::info(
                release.id.clone(),
                Reason::UninstallSucceeded,
                "release uninstalled",
            ),
        )
        .await;
        ReconcileOutcome::Done
    }

    /// Write a Reconciling condition ahead of a mutating action and
    /// return the release with its refreshed resource version.
    async fn mark_reconciling(&self, release: &Release, plan: &Plan) -> Result<Release> {
        let mut progress = release.status.clone();
        progress.set_condition(
            ConditionType::Reconciling,
            ConditionStatus::True,
            Reason::Progressing,
            format!("{} in progress", describe(&plan.action)),
            Utc::now(),
        );
        let version = self
            .write_status(&release.id, release.resource_version, progress.clone())
            .await?;
        let mut refreshed = release.clone();
        refreshed.status = progress;
        refreshed.resource_version = version;
        Ok(refreshed)
    }

    async fn conclude_and_persist(
        &self,
        release: &Release,
        observed_deps: Vec<capstan_core::DependencyStatus>,
        drift_clean: bool,
        result: PassResult,
    ) -> ReconcileOutcome {
        let (status, schedule) = self
            .status
            .conclude(release, observed_deps, drift_clean, result, Utc::now())
            .await;

        if let Err(error) = self
            .write_status(&release.id, release.resource_version, status)
            .await
        {
            return self.error_outcome(release.status.failures, error);
        }

        match schedule {
            Schedule::Done => ReconcileOutcome::Done,
            Schedule::After(delay) => ReconcileOutcome::RequeueAfter(delay),
        }
    }

    /// Status write with bounded refresh-and-retry on version conflict.
    async fn write_status(
        &self,
        id: &ReleaseId,
        expected_version: u64,
        status: ReleaseStatus,
    ) -> Result<u64> {
        let mut expected = expected_version;
        for attempt in 0..STATUS_CONFLICT_RETRIES {
            match self.store.update_status(id, expected, status.clone()).await {
                Ok(version) => return Ok(version),
                Err(Error::Conflict { .. }) => {
                    debug!(release = %id, attempt, "status write conflicted, refreshing");
                    match self.store.get(id).await? {
                        Some(fresh) => expected = fresh.resource_version,
                        None => {
                            return Err(Error::Conflict {
                                release: id.to_string(),
                            })
                        }
                    }
                }
                Err(error) => return Err(error),
            }
        }
        Err(Error::Conflict {
            release: id.to_string(),
        })
    }

    fn error_outcome(&self, failures: u32, error: Error) -> ReconcileOutcome {
        let requeue_after = match error.classify() {
            ErrorClass::Permanent => self.max_backoff,
            _ => self.limiter.delay_for(failures.saturating_add(1)),
        };
        ReconcileOutcome::Error {
            error,
            requeue_after,
        }
    }

    async fn identity_lock(&self, id: &ReleaseId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    /// Drop the lock entry once no pass or waiter holds it, so the map
    /// does not accumulate entries for deleted releases. The map's own
    /// reference is the only one left when the entry is idle.
    async fn prune_identity_lock(&self, id: &ReleaseId) {
        let mut locks = self.locks.lock().await;
        if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(id);
        }
    }

    fn log_plan(&self, release: &Release, plan: &Plan, drift: Option<&DriftReport>) {
        match &plan.action {
            PlannedAction::Noop(cause) => {
                debug!(release = %release.id, cause = ?cause, "no action planned");
            }
            action => {
                if let Some(report) = drift.filter(|r| r.drifted()) {
                    info!(release = %release.id, drift = %report.summary(), action = %describe(action), "action planned");
                } else {
                    info!(release = %release.id, action = %describe(action), "action planned");
                }
            }
        }
    }
}

/// The action a failed plan was attempting, for counters and reasons.
fn failed_action(action: &PlannedAction) -> Option<AppliedAction> {
    match action {
        PlannedAction::Install | PlannedAction::RemediateReinstall => Some(AppliedAction::Install),
        PlannedAction::Upgrade => Some(AppliedAction::Upgrade),
        PlannedAction::RemediateRollback { .. } => Some(AppliedAction::Rollback),
        PlannedAction::Uninstall => Some(AppliedAction::Uninstall),
        PlannedAction::Test => Some(AppliedAction::Test),
        PlannedAction::Noop(_) => None,
    }
}

fn describe(action: &PlannedAction) -> &'static str {
    match action {
        PlannedAction::Install => "install",
        PlannedAction::Upgrade => "upgrade",
        PlannedAction::Test => "test",
        PlannedAction::RemediateRollback { .. } => "rollback remediation",
        PlannedAction::RemediateReinstall => "reinstall remediation",
        PlannedAction::Uninstall => "uninstall",
        PlannedAction::Noop(_) => "noop",
    }
}
