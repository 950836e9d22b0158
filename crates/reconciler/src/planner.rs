//! The action planner: a pure decision table.
//!
//! Maps (desired spec, current status, drift report, dependency
//! readiness) to the next lifecycle action. No I/O; every rule is
//! directly unit-testable. Rules are evaluated in order, first match
//! wins:
//!
//! 1. deletion requested        -> Uninstall
//! 2. suspended                 -> Noop (observation already happened)
//! 3. dependencies not ready    -> Noop, dependency requeue
//! 4. nothing applied yet       -> Install, or after a failed install
//!    a reinstall remediation within the install retry budget
//! 5. revision or values moved  -> Upgrade, or after a failed upgrade
//!    a remediation within the upgrade retry budget
//! 6. new drift event, policy on, limit not reached -> Remediate
//! 7. tests enabled, not yet run for applied revision -> Test
//! 8. otherwise                 -> Noop, steady-state requeue
//!
//! Deletion dominates everything; suspension dominates everything but
//! deletion. Remediation is evaluated ahead of testing: a drifted
//! release is not a valid test target, and tests run on a later pass
//! once the remediated revision is back in place.

use capstan_core::{
    values_digest, AppliedAction, AttemptOutcome, Release, ReleaseSpec, ReleaseStatus,
    RemediationStrategy,
};

use crate::drift::DriftReport;
use crate::resolver::DependencyReadiness;

/// Why the planner chose to do nothing this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoopCause {
    /// The release is suspended.
    Suspended,
    /// At least one dependency is unready; requeue at the fixed
    /// dependency interval.
    DependenciesNotReady,
    /// Drift was observed but the remediation retry limit is reached;
    /// requires a spec edit or a distinct drift event.
    RemediationLimitReached,
    /// The last install or upgrade failed and its remediation retry
    /// budget is spent; attempts stop until the spec changes.
    RetriesExhausted,
    /// Converged; requeue at the steady-state interval.
    Settled,
}

/// The lifecycle action chosen for this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    /// First-time install of the current revision.
    Install,
    /// Upgrade to the current revision/values.
    Upgrade,
    /// Run backend test hooks for the applied revision.
    Test,
    /// Roll back to the last-known-good revision.
    RemediateRollback {
        /// Revision to roll back to.
        to_revision: String,
    },
    /// Uninstall and reinstall from scratch; used when no known-good
    /// revision exists or the upgrade policy prefers it.
    RemediateReinstall,
    /// Remove the release from the backend.
    Uninstall,
    /// No action.
    Noop(NoopCause),
}

impl PlannedAction {
    /// Whether the action mutates backend state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Noop(_) | Self::Test)
    }
}

/// A planned action and the drift digest it responds to, when any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// The chosen action.
    pub action: PlannedAction,
    /// Digest of the drift event a remediation responds to. Recorded in
    /// status on success so the same event is remediated only once.
    pub drift_digest: Option<String>,
}

impl Plan {
    fn action(action: PlannedAction) -> Self {
        Self {
            action,
            drift_digest: None,
        }
    }
}

/// Decide the next action for `release`.
pub fn plan(
    release: &Release,
    dependencies: &DependencyReadiness,
    drift: Option<&DriftReport>,
) -> Plan {
    let spec = &release.spec;
    let status = &release.status;

    // 1. Deletion dominates everything.
    if release.deletion_requested {
        return Plan::action(PlannedAction::Uninstall);
    }

    // 2. Suspension dominates everything except deletion; dependency
    // and drift observation happened before planning, for visibility.
    if spec.suspend {
        return Plan::action(PlannedAction::Noop(NoopCause::Suspended));
    }

    // 3. Never act while a dependency is unready. Dependency waits are
    // expected, not failures.
    if !dependencies.all_ready() {
        return Plan::action(PlannedAction::Noop(NoopCause::DependenciesNotReady));
    }

    // 4. Nothing successfully applied yet. A failed install with a
    // remediation budget is uninstalled and reinstalled from scratch;
    // a spent budget stops attempts until the target moves.
    let desired_digest = values_digest(spec.values.as_ref());
    let Some(applied_revision) = status.last_applied_revision.clone() else {
        let retries = spec.install.remediation_retries;
        if retries != 0
            && last_failed(status, AppliedAction::Install)
            && same_target(status, spec, &desired_digest)
        {
            if status.install_failures > retries {
                return Plan::action(PlannedAction::Noop(NoopCause::RetriesExhausted));
            }
            return Plan::action(PlannedAction::RemediateReinstall);
        }
        return Plan::action(PlannedAction::Install);
    };

    // 5. Desired revision or values moved since the last success. A
    // failed upgrade with a remediation budget is remediated per the
    // upgrade strategy before the next attempt; counters only count
    // against the budget while the target stands still.
    if spec.chart.version != applied_revision
        || status.last_applied_values_digest.as_deref() != Some(desired_digest.as_str())
    {
        let retries = spec.upgrade.remediation_retries;
        if retries != 0 && same_target(status, spec, &desired_digest) {
            let exhausted = status.upgrade_failures > retries;
            if last_failed(status, AppliedAction::Upgrade)
                && (!exhausted || spec.upgrade.remediate_last_failure)
            {
                return Plan::action(remediation(spec, applied_revision));
            }
            if exhausted {
                return Plan::action(PlannedAction::Noop(NoopCause::RetriesExhausted));
            }
        }
        return Plan::action(PlannedAction::Upgrade);
    }

    // 6. Drift-triggered remediation, once per distinct drift event.
    if let Some(digest) = drift.and_then(DriftReport::digest) {
        if spec.drift.remediate {
            if status.last_remediated_drift_digest.as_deref() == Some(digest.as_str()) {
                // Still converging on an already-remediated event.
                return Plan::action(PlannedAction::Noop(NoopCause::Settled));
            }
            let limit = spec.drift.remediation_retries;
            if limit != 0 && status.drift_remediations >= limit {
                return Plan::action(PlannedAction::Noop(NoopCause::RemediationLimitReached));
            }
            return Plan {
                action: remediation(spec, applied_revision),
                drift_digest: Some(digest),
            };
        }
    }

    // 7. Tests for the applied revision, when enabled and not yet
    // passed. Rules 4 and 5 guarantee the applied revision is current,
    // so a failed run simply retries here on the next pass.
    if spec.test.enable && status.tested_revision.as_deref() != Some(applied_revision.as_str()) {
        return Plan::action(PlannedAction::Test);
    }

    // 8. Converged.
    Plan::action(PlannedAction::Noop(NoopCause::Settled))
}

/// Whether the most recent attempt was a failed run of `action`.
fn last_failed(status: &ReleaseStatus, action: AppliedAction) -> bool {
    status.last_attempt().is_some_and(|attempt| {
        attempt.action == action && matches!(attempt.outcome, AttemptOutcome::Failed { .. })
    })
}

/// Whether the last attempt targeted the currently desired revision and
/// values. A moved target restarts the remediation budget.
fn same_target(status: &ReleaseStatus, spec: &ReleaseSpec, desired_digest: &str) -> bool {
    status.last_attempted_revision.as_deref() == Some(spec.chart.version.as_str())
        && status.last_attempted_values_digest.as_deref() == Some(desired_digest)
}

/// The remediation action the upgrade policy selects.
fn remediation(spec: &ReleaseSpec, applied_revision: String) -> PlannedAction {
    match spec.upgrade.remediation_strategy {
        RemediationStrategy::Rollback => PlannedAction::RemediateRollback {
            to_revision: applied_revision,
        },
        RemediationStrategy::Uninstall => PlannedAction::RemediateReinstall,
    }
}
