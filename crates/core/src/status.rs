//! Engine-owned release status: conditions, counters, attempt history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition types tracked on a release. A fixed enum rather than
/// string-keyed entries so transitions are exhaustively checkable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// The release as a whole is in its desired state.
    Ready,
    /// The last mutating action (install/upgrade/rollback) succeeded.
    Released,
    /// The last remediation succeeded.
    Remediated,
    /// Test hooks passed for the applied revision.
    TestSuccess,
    /// An action is in flight across reconcile passes.
    Reconciling,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "Ready",
            Self::Released => "Released",
            Self::Remediated => "Remediated",
            Self::TestSuccess => "TestSuccess",
            Self::Reconciling => "Reconciling",
        };
        f.write_str(s)
    }
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Machine-readable reasons attached to conditions and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    InstallSucceeded,
    InstallFailed,
    UpgradeSucceeded,
    UpgradeFailed,
    TestSucceeded,
    TestFailed,
    RollbackSucceeded,
    RollbackFailed,
    UninstallSucceeded,
    UninstallFailed,
    ArtifactFailed,
    DependencyNotReady,
    AccessDenied,
    Suspended,
    Progressing,
    DriftDetected,
    ReconciliationSucceeded,
    ReconciliationFailed,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A named status fact with reason and transition time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition type.
    pub condition_type: ConditionType,
    /// Tri-state status.
    pub status: ConditionStatus,
    /// Machine-readable reason for the current status.
    pub reason: Reason,
    /// Human-readable detail.
    pub message: String,
    /// When `status` last changed. Preserved when only reason/message
    /// change.
    pub last_transition_time: DateTime<Utc>,
}

/// Lifecycle actions that mutate or probe backend state, as recorded in
/// the attempt history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliedAction {
    Install,
    Upgrade,
    Test,
    Rollback,
    Uninstall,
}

impl fmt::Display for AppliedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Test => "test",
            Self::Rollback => "rollback",
            Self::Uninstall => "uninstall",
        };
        f.write_str(s)
    }
}

/// Outcome of a recorded attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Succeeded,
    Failed { reason: String },
}

/// One entry in the release attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Chart revision the attempt targeted.
    pub revision: String,
    /// Action taken.
    pub action: AppliedAction,
    /// Digest of the manifests the action applied, empty for test runs.
    pub manifest_digest: String,
    /// Outcome.
    pub outcome: AttemptOutcome,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
}

/// Identifier of an object applied to the cluster by a release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object kind.
    pub kind: String,
    /// Object namespace, empty for cluster-scoped objects.
    pub namespace: String,
    /// Object name.
    pub name: String,
}

impl ObjectRef {
    /// Create an object reference.
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Per-dependency readiness as observed on the last pass, kept for
/// status visibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyStatus {
    /// Identity of the referenced release, as `namespace/name`.
    pub release: String,
    /// Whether the dependency was ready.
    pub ready: bool,
    /// Why not, when unready.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// Engine-owned observed state of a release.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseStatus {
    /// Last spec generation fully processed. Invariant:
    /// `observed_generation <= spec.generation`.
    pub observed_generation: i64,
    /// Condition entries, at most one per [`ConditionType`].
    pub conditions: Vec<Condition>,
    /// Consecutive failures since the last success, drives backoff.
    pub failures: u32,
    /// Consecutive failed installs, gates install remediation.
    pub install_failures: u32,
    /// Consecutive failed upgrades, gates upgrade remediation.
    pub upgrade_failures: u32,
    /// Drift remediations performed for the current drift report.
    pub drift_remediations: u32,
    /// Revision of the last successful install/upgrade/rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_revision: Option<String>,
    /// Revision of the most recent attempt, successful or not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_revision: Option<String>,
    /// Values digest of the most recent attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_values_digest: Option<String>,
    /// Values digest of the last successful install/upgrade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_values_digest: Option<String>,
    /// Revision test hooks last passed for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tested_revision: Option<String>,
    /// Digest of the drift report last remediated, so one drift event
    /// triggers at most one remediation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_remediated_drift_digest: Option<String>,
    /// Bounded attempt history, newest first.
    pub history: Vec<AttemptRecord>,
    /// Objects applied by the last successful mutating action, polled by
    /// the drift detector.
    pub applied_objects: Vec<ObjectRef>,
    /// Dependency readiness observed on the last pass.
    pub dependencies: Vec<DependencyStatus>,
}

impl ReleaseStatus {
    /// Look up a condition by type.
    pub fn condition(&self, t: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.condition_type == t)
    }

    /// Whether a condition is present with status True.
    pub fn is_true(&self, t: ConditionType) -> bool {
        self.condition(t)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Whether the release is Ready.
    pub fn is_ready(&self) -> bool {
        self.is_true(ConditionType::Ready)
    }

    /// Set a condition, preserving the transition time when the status
    /// does not change.
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: Reason,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let message = message.into();
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            if existing.status != status {
                existing.last_transition_time = now;
            }
            existing.status = status;
            existing.reason = reason;
            existing.message = message;
        } else {
            self.conditions.push(Condition {
                condition_type,
                status,
                reason,
                message,
                last_transition_time: now,
            });
        }
    }

    /// Remove a condition entirely.
    pub fn remove_condition(&mut self, condition_type: ConditionType) {
        self.conditions.retain(|c| c.condition_type != condition_type);
    }

    /// Record an attempt, trimming history to `max_history`.
    pub fn push_attempt(&mut self, record: AttemptRecord, max_history: usize) {
        self.history.insert(0, record);
        self.history.truncate(max_history.max(1));
    }

    /// The most recent attempt, if any.
    pub fn last_attempt(&self) -> Option<&AttemptRecord> {
        self.history.first()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn set_condition_preserves_transition_time_on_same_status() {
        let mut status = ReleaseStatus::default();
        status.set_condition(
            ConditionType::Ready,
            ConditionStatus::True,
            Reason::InstallSucceeded,
            "installed",
            t(100),
        );
        status.set_condition(
            ConditionType::Ready,
            ConditionStatus::True,
            Reason::ReconciliationSucceeded,
            "still fine",
            t(200),
        );

        let cond = status.condition(ConditionType::Ready).unwrap();
        assert_eq!(cond.last_transition_time, t(100));
        assert_eq!(cond.reason, Reason::ReconciliationSucceeded);
    }

    #[test]
    fn set_condition_bumps_transition_time_on_flip() {
        let mut status = ReleaseStatus::default();
        status.set_condition(
            ConditionType::Ready,
            ConditionStatus::True,
            Reason::InstallSucceeded,
            "installed",
            t(100),
        );
        status.set_condition(
            ConditionType::Ready,
            ConditionStatus::False,
            Reason::UpgradeFailed,
            "boom",
            t(200),
        );

        let cond = status.condition(ConditionType::Ready).unwrap();
        assert_eq!(cond.last_transition_time, t(200));
        assert!(!status.is_ready());
    }

    #[test]
    fn history_is_bounded() {
        let mut status = ReleaseStatus::default();
        for i in 0..10 {
            status.push_attempt(
                AttemptRecord {
                    revision: format!("1.0.{i}"),
                    action: AppliedAction::Upgrade,
                    manifest_digest: String::new(),
                    outcome: AttemptOutcome::Succeeded,
                    timestamp: t(i),
                },
                3,
            );
        }
        assert_eq!(status.history.len(), 3);
        assert_eq!(status.last_attempt().unwrap().revision, "1.0.9");
    }
}
