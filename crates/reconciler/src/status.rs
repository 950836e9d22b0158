//! Status and condition management.
//!
//! Takes the terminal result of a pass and produces the next persisted
//! status plus the requeue schedule. Transition rules:
//!
//! - Ready becomes True only after a successful mutating action and,
//!   when tests are configured, a passing test run.
//! - Ready becomes False on any failed mutating action or failed
//!   required test.
//! - Reconciling is True while an action spans passes (e.g. a test run
//!   still owed for a freshly applied revision).
//! - Observed generation advances only on a definitive success or a
//!   definitive permanent failure, never while work is still owed.
//!
//! Failures increment the counter and schedule the capped exponential
//! backoff; success resets the counter and schedules the steady-state
//! interval. Dependency waits are expected, not failures: they leave
//! the counter alone and requeue at the fixed dependency interval.
//! A remediation rollback is not a success in this sense: the desired
//! revision is still owed, so counters and pacing carry through to the
//! retried upgrade.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use capstan_core::{
    values_digest, AppliedAction, AttemptOutcome, AttemptRecord, ConditionStatus, ConditionType,
    DependencyStatus, Reason, Release, ReleaseStatus,
};

use crate::backoff::RateLimiter;
use crate::config::ReconcilerConfig;
use crate::error::{Error, ErrorClass};
use crate::events::{emit, EventSink, ReleaseEvent};
use crate::executor::{BackendOutcome, TestOutcome};
use crate::planner::NoopCause;

/// When the next pass should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// No requeue; the next spec edit or external event retriggers.
    Done,
    /// Requeue after the given delay.
    After(Duration),
}

/// Terminal result of a pass, as fed to the status manager.
#[derive(Debug)]
pub enum PassResult {
    /// The planner chose not to act.
    Noop(NoopCause),
    /// A mutating action succeeded.
    Applied {
        action: AppliedAction,
        outcome: BackendOutcome,
        /// Drift digest this action remediated, if it was a remediation.
        drift_digest: Option<String>,
    },
    /// Test hooks ran.
    Tested {
        revision: String,
        outcome: TestOutcome,
    },
    /// An action or pipeline stage failed.
    Failed {
        /// Action that failed, `None` for pipeline failures ahead of
        /// execution (resolver, drift detector, store).
        action: Option<AppliedAction>,
        error: Error,
    },
}

/// Applies transition rules and computes the requeue schedule.
pub struct StatusManager {
    events: Arc<dyn EventSink>,
    limiter: RateLimiter,
    dependency_requeue: Duration,
    max_backoff: Duration,
}

impl StatusManager {
    /// Create a status manager from engine configuration.
    pub fn new(events: Arc<dyn EventSink>, config: &ReconcilerConfig) -> Self {
        Self {
            events,
            limiter: RateLimiter::new(config.base_backoff, config.max_backoff),
            dependency_requeue: config.dependency_requeue,
            max_backoff: config.max_backoff,
        }
    }

    /// Fold a pass result into the release status and decide when to
    /// run again. `drift_clean` reports that every previously applied
    /// object was observed present and healthy this pass.
    pub async fn conclude(
        &self,
        release: &Release,
        observed_deps: Vec<DependencyStatus>,
        drift_clean: bool,
        result: PassResult,
        now: DateTime<Utc>,
    ) -> (ReleaseStatus, Schedule) {
        let mut status = release.status.clone();
        status.dependencies = observed_deps;
        if drift_clean {
            // The last drift event is resolved; new drift is a new event.
            status.last_remediated_drift_digest = None;
            status.drift_remediations = 0;
        }

        let schedule = match result {
            PassResult::Noop(cause) => {
                self.conclude_noop(release, &mut status, cause, now).await
            }
            PassResult::Applied {
                action,
                outcome,
                drift_digest,
            } => {
                self.conclude_applied(release, &mut status, action, outcome, drift_digest, now)
                    .await
            }
            PassResult::Tested { revision, outcome } => {
                self.conclude_tested(release, &mut status, revision, outcome, now)
                    .await
            }
            PassResult::Failed { action, error } => {
                self.conclude_failed(release, &mut status, action, &error, now)
                    .await
            }
        };

        (status, schedule)
    }

    async fn conclude_noop(
        &self,
        release: &Release,
        status: &mut ReleaseStatus,
        cause: NoopCause,
        now: DateTime<Utc>,
    ) -> Schedule {
        match cause {
            NoopCause::Suspended => {
                debug!(release = %release.id, "reconciliation suspended");
                status.remove_condition(ConditionType::Reconciling);
                emit(
                    self.events.as_ref(),
                    ReleaseEvent::info(
                        release.id.clone(),
                        Reason::Suspended,
                        "reconciliation is suspended; status observation continues",
                    ),
                )
                .await;
                Schedule::Done
            }
            NoopCause::DependenciesNotReady => {
                let summary = status
                    .dependencies
                    .iter()
                    .filter(|d| !d.ready)
                    .map(|d| format!("{}: {}", d.release, d.reason))
                    .collect::<Vec<_>>()
                    .join("; ");
                debug!(release = %release.id, %summary, "waiting on dependencies");
                status.set_condition(
                    ConditionType::Ready,
                    ConditionStatus::False,
                    Reason::DependencyNotReady,
                    summary,
                    now,
                );
                // Expected wait: counter untouched, fixed interval.
                Schedule::After(self.dependency_requeue)
            }
            NoopCause::RetriesExhausted => {
                let (reason, what) = match status.last_attempt().map(|a| a.action) {
                    Some(AppliedAction::Install) => (Reason::InstallFailed, "install"),
                    _ => (Reason::UpgradeFailed, "upgrade"),
                };
                warn!(release = %release.id, action = what, "remediation retries exhausted");
                status.set_condition(
                    ConditionType::Ready,
                    ConditionStatus::False,
                    reason,
                    format!("{what} retries exhausted; waiting for a spec change"),
                    now,
                );
                // Definitive for this generation: nothing more will be
                // attempted until the spec moves.
                status.observed_generation = release.spec.generation;
                Schedule::After(release.spec.interval)
            }
            NoopCause::RemediationLimitReached => {
                status.set_condition(
                    ConditionType::Ready,
                    ConditionStatus::False,
                    Reason::DriftDetected,
                    "drift detected but remediation retries are exhausted",
                    now,
                );
                Schedule::After(release.spec.interval)
            }
            NoopCause::Settled => {
                status.remove_condition(ConditionType::Reconciling);
                status.set_condition(
                    ConditionType::Ready,
                    ConditionStatus::True,
                    Reason::ReconciliationSucceeded,
                    "release is in the desired state",
                    now,
                );
                status.failures = 0;
                status.observed_generation = release.spec.generation;
                Schedule::After(release.spec.interval)
            }
        }
    }

    async fn conclude_applied(
        &self,
        release: &Release,
        status: &mut ReleaseStatus,
        action: AppliedAction,
        outcome: BackendOutcome,
        drift_digest: Option<String>,
        now: DateTime<Utc>,
    ) -> Schedule {
        let desired_digest = values_digest(release.spec.values.as_ref());
        let reason = match action {
            AppliedAction::Install => Reason::InstallSucceeded,
            AppliedAction::Upgrade => Reason::UpgradeSucceeded,
            AppliedAction::Rollback => Reason::RollbackSucceeded,
            AppliedAction::Uninstall => Reason::UninstallSucceeded,
            AppliedAction::Test => Reason::TestSucceeded,
        };

        let drift_remediation = drift_digest.is_some();
        status.push_attempt(
            AttemptRecord {
                revision: outcome.revision.clone(),
                action,
                manifest_digest: outcome.manifest_digest.clone(),
                outcome: AttemptOutcome::Succeeded,
                timestamp: now,
            },
            release.spec.max_history,
        );
        status.last_applied_revision = Some(outcome.revision.clone());
        status.applied_objects = outcome.applied_objects;
        // Only a landed install or upgrade moves the attempted target
        // and settles its failure counter; a rollback restores state
        // without touching what is still owed.
        match action {
            AppliedAction::Install => {
                status.last_attempted_revision = Some(outcome.revision.clone());
                status.last_applied_values_digest = Some(desired_digest.clone());
                status.last_attempted_values_digest = Some(desired_digest);
                status.install_failures = 0;
            }
            AppliedAction::Upgrade => {
                status.last_attempted_revision = Some(outcome.revision.clone());
                status.last_applied_values_digest = Some(desired_digest.clone());
                status.last_attempted_values_digest = Some(desired_digest);
                status.upgrade_failures = 0;
            }
            _ => {}
        }

        status.set_condition(
            ConditionType::Released,
            ConditionStatus::True,
            reason,
            format!("{action} of revision {} succeeded", outcome.revision),
            now,
        );
        if let Some(digest) = drift_digest {
            status.last_remediated_drift_digest = Some(digest);
            status.drift_remediations = status.drift_remediations.saturating_add(1);
            status.set_condition(
                ConditionType::Remediated,
                ConditionStatus::True,
                reason,
                "drift remediated",
                now,
            );
        }

        emit(
            self.events.as_ref(),
            ReleaseEvent::info(
                release.id.clone(),
                reason,
                format!("{action} of revision {} succeeded", outcome.revision),
            ),
        )
        .await;

        // A rollback outside a drift event remediates a failed upgrade.
        // The desired revision is still unapplied, so failure counters
        // and backoff pacing survive until the retried upgrade lands.
        if action == AppliedAction::Rollback && !drift_remediation {
            status.set_condition(
                ConditionType::Remediated,
                ConditionStatus::True,
                reason,
                format!(
                    "rolled back to revision {} after a failed upgrade",
                    outcome.revision
                ),
                now,
            );
            return Schedule::After(self.limiter.delay_for(status.failures.max(1)));
        }

        status.failures = 0;
        let tests_owed = release.spec.test.enable
            && status.tested_revision.as_deref() != Some(outcome.revision.as_str());
        if tests_owed {
            // Not definitive yet: tests still gate readiness.
            status.set_condition(
                ConditionType::Ready,
                ConditionStatus::Unknown,
                Reason::Progressing,
                "awaiting test run",
                now,
            );
            status.set_condition(
                ConditionType::Reconciling,
                ConditionStatus::True,
                Reason::Progressing,
                "test run pending for applied revision",
                now,
            );
            Schedule::After(Duration::ZERO)
        } else {
            status.remove_condition(ConditionType::Reconciling);
            status.set_condition(
                ConditionType::Ready,
                ConditionStatus::True,
                reason,
                format!("revision {} applied", outcome.revision),
                now,
            );
            status.observed_generation = release.spec.generation;
            Schedule::After(release.spec.interval)
        }
    }

    async fn conclude_tested(
        &self,
        release: &Release,
        status: &mut ReleaseStatus,
        revision: String,
        outcome: TestOutcome,
        now: DateTime<Utc>,
    ) -> Schedule {
        status.push_attempt(
            AttemptRecord {
                revision: revision.clone(),
                action: AppliedAction::Test,
                manifest_digest: String::new(),
                outcome: if outcome.passed {
                    AttemptOutcome::Succeeded
                } else {
                    AttemptOutcome::Failed {
                        reason: outcome.message.clone(),
                    }
                },
                timestamp: now,
            },
            release.spec.max_history,
        );
        status.remove_condition(ConditionType::Reconciling);

        if outcome.passed || release.spec.test.ignore_failures {
            let reason = if outcome.passed {
                Reason::TestSucceeded
            } else {
                Reason::TestFailed
            };
            status.tested_revision = Some(revision.clone());
            status.set_condition(
                ConditionType::TestSuccess,
                if outcome.passed {
                    ConditionStatus::True
                } else {
                    ConditionStatus::False
                },
                reason,
                outcome.message.clone(),
                now,
            );
            status.set_condition(
                ConditionType::Ready,
                ConditionStatus::True,
                reason,
                if outcome.passed {
                    format!("tests passed for revision {revision}")
                } else {
                    format!("test failures ignored for revision {revision}")
                },
                now,
            );
            status.failures = 0;
            status.observed_generation = release.spec.generation;
            emit(
                self.events.as_ref(),
                ReleaseEvent::info(release.id.clone(), reason, outcome.message),
            )
            .await;
            Schedule::After(release.spec.interval)
        } else {
            status.failures = status.failures.saturating_add(1);
            status.set_condition(
                ConditionType::TestSuccess,
                ConditionStatus::False,
                Reason::TestFailed,
                outcome.message.clone(),
                now,
            );
            status.set_condition(
                ConditionType::Ready,
                ConditionStatus::False,
                Reason::TestFailed,
                outcome.message.clone(),
                now,
            );
            emit(
                self.events.as_ref(),
                ReleaseEvent::warning(release.id.clone(), Reason::TestFailed, outcome.message),
            )
            .await;
            Schedule::After(self.limiter.delay_for(status.failures))
        }
    }

    async fn conclude_failed(
        &self,
        release: &Release,
        status: &mut ReleaseStatus,
        action: Option<AppliedAction>,
        error: &Error,
        now: DateTime<Utc>,
    ) -> Schedule {
        let class = error.classify();
        let reason = failure_reason(action, error);
        let message = error.to_string();

        if let Some(action) = action {
            status.push_attempt(
                AttemptRecord {
                    revision: release.spec.chart.version.clone(),
                    action,
                    manifest_digest: String::new(),
                    outcome: AttemptOutcome::Failed {
                        reason: message.clone(),
                    },
                    timestamp: now,
                },
                release.spec.max_history,
            );
            let attempted_digest = values_digest(release.spec.values.as_ref());
            // Action failure counters track consecutive failures against
            // one target; an edited spec starts a fresh budget.
            let target_moved = status.last_attempted_revision.as_deref()
                != Some(release.spec.chart.version.as_str())
                || status.last_attempted_values_digest.as_deref()
                    != Some(attempted_digest.as_str());
            if target_moved {
                status.install_failures = 0;
                status.upgrade_failures = 0;
            }
            status.last_attempted_revision = Some(release.spec.chart.version.clone());
            status.last_attempted_values_digest = Some(attempted_digest);
            match action {
                AppliedAction::Install => {
                    status.install_failures = status.install_failures.saturating_add(1);
                }
                AppliedAction::Upgrade => {
                    status.upgrade_failures = status.upgrade_failures.saturating_add(1);
                }
                _ => {}
            }
            status.set_condition(
                ConditionType::Released,
                ConditionStatus::False,
                reason,
                message.clone(),
                now,
            );
        }

        status.failures = status.failures.saturating_add(1);
        status.remove_condition(ConditionType::Reconciling);
        status.set_condition(
            ConditionType::Ready,
            ConditionStatus::False,
            reason,
            message.clone(),
            now,
        );

        warn!(release = %release.id, error = %error, class = ?class, "reconcile failed");
        emit(
            self.events.as_ref(),
            ReleaseEvent::warning(release.id.clone(), reason, message),
        )
        .await;

        match class {
            ErrorClass::Permanent => {
                // Requires user action; definitive for this generation.
                status.observed_generation = release.spec.generation;
                Schedule::After(self.max_backoff)
            }
            _ => Schedule::After(self.limiter.delay_for(status.failures)),
        }
    }
}

/// Map a failed action and error to a condition reason.
fn failure_reason(action: Option<AppliedAction>, error: &Error) -> Reason {
    match error {
        Error::FetchExhausted { .. } | Error::ArtifactNotFound { .. } => Reason::ArtifactFailed,
        Error::AccessDenied { .. } => Reason::AccessDenied,
        _ => match action {
            Some(AppliedAction::Install) => Reason::InstallFailed,
            Some(AppliedAction::Upgrade) => Reason::UpgradeFailed,
            Some(AppliedAction::Rollback) => Reason::RollbackFailed,
            Some(AppliedAction::Uninstall) => Reason::UninstallFailed,
            Some(AppliedAction::Test) => Reason::TestFailed,
            None => Reason::ReconciliationFailed,
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;
    use capstan_core::{ChartRef, ObjectRef, ReleaseId, ReleaseSpec};

    use crate::events::MemoryEventSink;

    fn release() -> Release {
        Release::new(
            ReleaseId::new("apps", "podinfo"),
            ReleaseSpec::new(ChartRef::new("charts", "podinfo", "1.0.0")),
        )
    }

    fn manager() -> (StatusManager, Arc<MemoryEventSink>) {
        let sink = MemoryEventSink::new_arc();
        let config = ReconcilerConfig::default();
        (StatusManager::new(sink.clone(), &config), sink)
    }

    fn outcome(revision: &str) -> BackendOutcome {
        BackendOutcome {
            revision: revision.into(),
            manifest_digest: "digest".into(),
            applied_objects: vec![ObjectRef::new("Deployment", "apps", "podinfo")],
        }
    }

    #[tokio::test]
    async fn install_success_sets_ready_and_resets_counters() {
        let (manager, sink) = manager();
        let mut rel = release();
        rel.status.failures = 3;

        let (status, schedule) = manager
            .conclude(
                &rel,
                Vec::new(),
                false,
                PassResult::Applied {
                    action: AppliedAction::Install,
                    outcome: outcome("1.0.0"),
                    drift_digest: None,
                },
                Utc::now(),
            )
            .await;

        assert!(status.is_ready());
        assert_eq!(status.last_applied_revision.as_deref(), Some("1.0.0"));
        assert_eq!(status.failures, 0);
        assert_eq!(status.observed_generation, rel.spec.generation);
        assert_eq!(schedule, Schedule::After(rel.spec.interval));
        assert_eq!(sink.reasons().await, vec![Reason::InstallSucceeded]);
    }

    #[tokio::test]
    async fn success_with_tests_configured_defers_readiness() {
        let (manager, _) = manager();
        let mut rel = release();
        rel.spec.test.enable = true;

        let (status, schedule) = manager
            .conclude(
                &rel,
                Vec::new(),
                false,
                PassResult::Applied {
                    action: AppliedAction::Install,
                    outcome: outcome("1.0.0"),
                    drift_digest: None,
                },
                Utc::now(),
            )
            .await;

        assert!(!status.is_ready());
        let ready = status.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.status, ConditionStatus::Unknown);
        assert!(status.is_true(ConditionType::Reconciling));
        // Generation is not settled while tests are owed.
        assert_eq!(status.observed_generation, 0);
        assert_eq!(schedule, Schedule::After(Duration::ZERO));
    }

    #[tokio::test]
    async fn failed_upgrade_increments_counter_and_backs_off() {
        let (manager, sink) = manager();
        let rel = release();

        let (status, schedule) = manager
            .conclude(
                &rel,
                Vec::new(),
                false,
                PassResult::Failed {
                    action: Some(AppliedAction::Upgrade),
                    error: Error::action_failed("upgrade", "hook timed out"),
                },
                Utc::now(),
            )
            .await;

        assert!(!status.is_ready());
        assert_eq!(status.failures, 1);
        assert_eq!(status.upgrade_failures, 1);
        let ready = status.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.reason, Reason::UpgradeFailed);
        // First failure backs off by exactly the base unit.
        assert_eq!(schedule, Schedule::After(Duration::from_millis(750)));
        assert_eq!(sink.reasons().await, vec![Reason::UpgradeFailed]);
        // Failed attempts never advance the observed generation.
        assert_eq!(status.observed_generation, 0);
    }

    #[tokio::test]
    async fn repeated_failures_back_off_monotonically() {
        let (manager, _) = manager();
        let mut rel = release();
        let mut previous = Duration::ZERO;

        for _ in 0..12 {
            let (status, schedule) = manager
                .conclude(
                    &rel,
                    Vec::new(),
                    false,
                    PassResult::Failed {
                        action: Some(AppliedAction::Upgrade),
                        error: Error::action_failed("upgrade", "still broken"),
                    },
                    Utc::now(),
                )
                .await;
            let Schedule::After(delay) = schedule else {
                panic!("expected a delay");
            };
            assert!(delay >= previous);
            previous = delay;
            rel.status = status;
        }
        assert_eq!(rel.status.failures, 12);
    }

    #[tokio::test]
    async fn dependency_wait_uses_fixed_interval_and_no_counter() {
        let (manager, _) = manager();
        let mut rel = release();
        rel.status.failures = 5;

        let deps = vec![DependencyStatus {
            release: "apps/redis".into(),
            ready: false,
            reason: "not ready".into(),
        }];
        let (status, schedule) = manager
            .conclude(
                &rel,
                deps,
                false,
                PassResult::Noop(NoopCause::DependenciesNotReady),
                Utc::now(),
            )
            .await;

        assert_eq!(status.failures, 5);
        assert_eq!(schedule, Schedule::After(Duration::from_secs(30)));
        let ready = status.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.reason, Reason::DependencyNotReady);
    }

    #[tokio::test]
    async fn permanent_failure_caps_backoff_and_settles_generation() {
        let (manager, _) = manager();
        let rel = release();

        let (status, schedule) = manager
            .conclude(
                &rel,
                Vec::new(),
                false,
                PassResult::Failed {
                    action: None,
                    error: Error::AccessDenied {
                        release: "apps/podinfo".into(),
                        dependency: "infra/redis".into(),
                    },
                },
                Utc::now(),
            )
            .await;

        assert_eq!(schedule, Schedule::After(Duration::from_secs(900)));
        assert_eq!(status.observed_generation, rel.spec.generation);
        let ready = status.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.reason, Reason::AccessDenied);
    }

    #[tokio::test]
    async fn passing_test_completes_readiness() {
        let (manager, _) = manager();
        let mut rel = release();
        rel.spec.test.enable = true;
        rel.status.last_applied_revision = Some("1.0.0".into());

        let (status, schedule) = manager
            .conclude(
                &rel,
                Vec::new(),
                false,
                PassResult::Tested {
                    revision: "1.0.0".into(),
                    outcome: TestOutcome {
                        passed: true,
                        message: "all hooks passed".into(),
                    },
                },
                Utc::now(),
            )
            .await;

        assert!(status.is_ready());
        assert!(status.is_true(ConditionType::TestSuccess));
        assert_eq!(status.tested_revision.as_deref(), Some("1.0.0"));
        assert_eq!(schedule, Schedule::After(rel.spec.interval));
    }

    #[tokio::test]
    async fn failed_required_test_blocks_readiness() {
        let (manager, _) = manager();
        let mut rel = release();
        rel.spec.test.enable = true;

        let (status, schedule) = manager
            .conclude(
                &rel,
                Vec::new(),
                false,
                PassResult::Tested {
                    revision: "1.0.0".into(),
                    outcome: TestOutcome {
                        passed: false,
                        message: "hook smoke-test failed".into(),
                    },
                },
                Utc::now(),
            )
            .await;

        assert!(!status.is_ready());
        assert_eq!(status.failures, 1);
        assert!(status.tested_revision.is_none());
        assert_eq!(schedule, Schedule::After(Duration::from_millis(750)));
    }

    #[tokio::test]
    async fn ignored_test_failure_still_ready() {
        let (manager, _) = manager();
        let mut rel = release();
        rel.spec.test.enable = true;
        rel.spec.test.ignore_failures = true;

        let (status, _) = manager
            .conclude(
                &rel,
                Vec::new(),
                false,
                PassResult::Tested {
                    revision: "1.0.0".into(),
                    outcome: TestOutcome {
                        passed: false,
                        message: "hook failed".into(),
                    },
                },
                Utc::now(),
            )
            .await;

        assert!(status.is_ready());
        assert_eq!(status.tested_revision.as_deref(), Some("1.0.0"));
        let tests = status.condition(ConditionType::TestSuccess).unwrap();
        assert_eq!(tests.status, ConditionStatus::False);
    }

    #[tokio::test]
    async fn suspended_noop_records_event_and_stops_requeue() {
        let (manager, sink) = manager();
        let mut rel = release();
        rel.spec.suspend = true;

        let (status, schedule) = manager
            .conclude(
                &rel,
                Vec::new(),
                false,
                PassResult::Noop(NoopCause::Suspended),
                Utc::now(),
            )
            .await;

        assert_eq!(schedule, Schedule::Done);
        assert!(!status.is_true(ConditionType::Reconciling));
        assert_eq!(sink.reasons().await, vec![Reason::Suspended]);
    }

    #[tokio::test]
    async fn remediation_rollback_keeps_counters_and_backs_off() {
        let (manager, _) = manager();
        let mut rel = release();
        rel.spec.chart.version = "2.0.0".into();
        rel.status.last_applied_revision = Some("1.0.0".into());
        rel.status.last_attempted_revision = Some("2.0.0".into());
        rel.status.failures = 2;
        rel.status.upgrade_failures = 2;

        let (status, schedule) = manager
            .conclude(
                &rel,
                Vec::new(),
                false,
                PassResult::Applied {
                    action: AppliedAction::Rollback,
                    outcome: outcome("1.0.0"),
                    drift_digest: None,
                },
                Utc::now(),
            )
            .await;

        // The desired revision is still owed: counters and the
        // attempted target survive the rollback.
        assert_eq!(status.failures, 2);
        assert_eq!(status.upgrade_failures, 2);
        assert_eq!(status.last_applied_revision.as_deref(), Some("1.0.0"));
        assert_eq!(status.last_attempted_revision.as_deref(), Some("2.0.0"));
        assert!(status.is_true(ConditionType::Remediated));
        assert_eq!(status.observed_generation, 0);
        // Retry pacing continues from the accumulated failure count.
        assert_eq!(schedule, Schedule::After(Duration::from_millis(1500)));
    }

    #[tokio::test]
    async fn moved_target_resets_action_failure_counters() {
        let (manager, _) = manager();
        let mut rel = release();
        rel.status.upgrade_failures = 3;
        rel.status.last_attempted_revision = Some("0.9.0".into());

        let (status, _) = manager
            .conclude(
                &rel,
                Vec::new(),
                false,
                PassResult::Failed {
                    action: Some(AppliedAction::Upgrade),
                    error: Error::action_failed("upgrade", "hook timed out"),
                },
                Utc::now(),
            )
            .await;

        // A fresh target starts a fresh budget.
        assert_eq!(status.upgrade_failures, 1);
        assert_eq!(status.last_attempted_revision.as_deref(), Some("1.0.0"));
    }

    #[tokio::test]
    async fn exhausted_retries_hold_ready_false_until_spec_change() {
        let (manager, _) = manager();
        let mut rel = release();
        rel.status.push_attempt(
            AttemptRecord {
                revision: "1.0.0".into(),
                action: AppliedAction::Upgrade,
                manifest_digest: String::new(),
                outcome: AttemptOutcome::Failed {
                    reason: "hook failed".into(),
                },
                timestamp: Utc::now(),
            },
            5,
        );

        let (status, schedule) = manager
            .conclude(
                &rel,
                Vec::new(),
                false,
                PassResult::Noop(NoopCause::RetriesExhausted),
                Utc::now(),
            )
            .await;

        let ready = status.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, Reason::UpgradeFailed);
        assert_eq!(status.observed_generation, rel.spec.generation);
        assert_eq!(schedule, Schedule::After(rel.spec.interval));
    }

    #[tokio::test]
    async fn clean_drift_observation_resets_remediation_tracking() {
        let (manager, _) = manager();
        let mut rel = release();
        rel.status.last_remediated_drift_digest = Some("abc".into());
        rel.status.drift_remediations = 2;

        let (status, _) = manager
            .conclude(
                &rel,
                Vec::new(),
                true,
                PassResult::Noop(NoopCause::Settled),
                Utc::now(),
            )
            .await;

        assert!(status.last_remediated_drift_digest.is_none());
        assert_eq!(status.drift_remediations, 0);
    }

    #[tokio::test]
    async fn remediation_records_drift_digest() {
        let (manager, _) = manager();
        let mut rel = release();
        rel.status.last_applied_revision = Some("1.0.0".into());

        let (status, _) = manager
            .conclude(
                &rel,
                Vec::new(),
                false,
                PassResult::Applied {
                    action: AppliedAction::Rollback,
                    outcome: outcome("1.0.0"),
                    drift_digest: Some("event-1".into()),
                },
                Utc::now(),
            )
            .await;

        assert_eq!(status.last_remediated_drift_digest.as_deref(), Some("event-1"));
        assert_eq!(status.drift_remediations, 1);
        assert!(status.is_true(ConditionType::Remediated));
    }
}
