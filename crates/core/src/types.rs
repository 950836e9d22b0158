//! Release identity, spec, and lifecycle policy types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::status::ReleaseStatus;

/// Default steady-state reconcile interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

/// Default timeout for mutating lifecycle actions.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Default bound on stored attempt history.
pub const DEFAULT_MAX_HISTORY: usize = 5;

/// Namespace-qualified release identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseId {
    /// Namespace the release lives in.
    pub namespace: String,
    /// Release name, unique within the namespace.
    pub name: String,
}

impl ReleaseId {
    /// Create a new release identity.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reference to a packaged chart artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRef {
    /// Name of the artifact source.
    pub source_name: String,
    /// Namespace of the artifact source, defaults to the release namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_namespace: Option<String>,
    /// Chart name within the source.
    pub chart: String,
    /// Version constraint, carried as an opaque string. The artifact
    /// fetcher resolves it to a concrete revision.
    pub version: String,
}

impl ChartRef {
    /// Create a chart reference.
    pub fn new(
        source_name: impl Into<String>,
        chart: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            source_namespace: None,
            chart: chart.into(),
            version: version.into(),
        }
    }
}

/// Declared dependency on another release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    /// Name of the referenced release.
    pub name: String,
    /// Namespace of the referenced release, defaults to the dependent's
    /// namespace. Cross-namespace references are subject to access policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Optional readiness requirement: the referenced release must have
    /// observed at least this status generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_observed_generation: Option<i64>,
}

impl DependencyRef {
    /// Create a dependency on a release in the same namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            min_observed_generation: None,
        }
    }

    /// Set an explicit namespace.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Resolve the referenced identity against the dependent's namespace.
    pub fn release_id(&self, default_namespace: &str) -> ReleaseId {
        ReleaseId::new(
            self.namespace.as_deref().unwrap_or(default_namespace),
            self.name.clone(),
        )
    }
}

/// Remediation strategy for a failed upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemediationStrategy {
    /// Roll back to the last successfully applied revision.
    Rollback,
    /// Uninstall, leaving reinstallation to the next reconcile.
    Uninstall,
}

/// Install behavior knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallPolicy {
    /// Timeout for the install action; falls back to the spec timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Skip waiting for applied objects to become ready.
    #[serde(default)]
    pub disable_wait: bool,
    /// Skip install hooks.
    #[serde(default)]
    pub disable_hooks: bool,
    /// Replace an existing failed release of the same name.
    #[serde(default)]
    pub replace: bool,
    /// Create the target namespace if missing.
    #[serde(default)]
    pub create_namespace: bool,
    /// Failed installs to remediate by uninstalling the leftovers and
    /// reinstalling from scratch. Once the budget is spent, install
    /// attempts stop until the spec changes. Zero disables remediation;
    /// failed installs are then retried as-is on backoff.
    #[serde(default)]
    pub remediation_retries: u32,
}

impl Default for InstallPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            disable_wait: false,
            disable_hooks: false,
            replace: false,
            create_namespace: false,
            remediation_retries: 0,
        }
    }
}

/// Upgrade behavior knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradePolicy {
    /// Timeout for the upgrade action; falls back to the spec timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Skip waiting for applied objects to become ready.
    #[serde(default)]
    pub disable_wait: bool,
    /// Skip upgrade hooks.
    #[serde(default)]
    pub disable_hooks: bool,
    /// Force object replacement on conflict.
    #[serde(default)]
    pub force: bool,
    /// Preserve last-applied values when not overridden.
    #[serde(default)]
    pub preserve_values: bool,
    /// What remediation does for this release: roll back to the last
    /// good revision, or uninstall and reinstall from scratch.
    #[serde(default = "default_remediation_strategy")]
    pub remediation_strategy: RemediationStrategy,
    /// Failed upgrades to remediate per `remediation_strategy` before
    /// upgrade attempts stop until the spec changes. Zero disables
    /// remediation; failed upgrades are then retried as-is on backoff.
    #[serde(default)]
    pub remediation_retries: u32,
    /// Also remediate the final failed upgrade once the retry budget is
    /// spent, instead of leaving the release in its failed state.
    #[serde(default)]
    pub remediate_last_failure: bool,
}

fn default_remediation_strategy() -> RemediationStrategy {
    RemediationStrategy::Rollback
}

impl Default for UpgradePolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            disable_wait: false,
            disable_hooks: false,
            force: false,
            preserve_values: false,
            remediation_strategy: RemediationStrategy::Rollback,
            remediation_retries: 0,
            remediate_last_failure: false,
        }
    }
}

/// Test hook execution knobs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestPolicy {
    /// Run backend test hooks after a successful install or upgrade.
    #[serde(default)]
    pub enable: bool,
    /// Timeout for the test run; falls back to the spec timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Treat test failures as informational rather than failing readiness.
    #[serde(default)]
    pub ignore_failures: bool,
}

/// Rollback behavior knobs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RollbackPolicy {
    /// Timeout for the rollback action; falls back to the spec timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Skip waiting for restored objects to become ready.
    #[serde(default)]
    pub disable_wait: bool,
    /// Skip rollback hooks.
    #[serde(default)]
    pub disable_hooks: bool,
    /// Recreate objects instead of updating them in place.
    #[serde(default)]
    pub recreate: bool,
    /// Force object replacement on conflict.
    #[serde(default)]
    pub force: bool,
}

/// Uninstall behavior knobs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UninstallPolicy {
    /// Timeout for the uninstall action; falls back to the spec timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Skip uninstall hooks.
    #[serde(default)]
    pub disable_hooks: bool,
    /// Keep release history in backend storage after uninstall.
    #[serde(default)]
    pub keep_history: bool,
}

/// Drift detection and remediation knobs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriftPolicy {
    /// Remediate when previously applied objects have drifted.
    #[serde(default)]
    pub remediate: bool,
    /// Number of drift remediations before giving up until the drift
    /// report changes or the spec changes. Zero means unlimited.
    #[serde(default)]
    pub remediation_retries: u32,
}

/// User-owned desired state of a release. The engine never writes here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSpec {
    /// Spec revision counter, bumped by the resource store on every edit.
    pub generation: i64,
    /// Chart artifact reference.
    pub chart: ChartRef,
    /// Steady-state reconcile interval.
    #[serde(default = "default_interval")]
    pub interval: Duration,
    /// Default timeout for all lifecycle actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Values overlay merged over chart defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<serde_json::Value>,
    /// Releases that must be ready before this one is acted on.
    #[serde(default)]
    pub depends_on: Vec<DependencyRef>,
    /// Pause reconciliation while keeping status observation.
    #[serde(default)]
    pub suspend: bool,
    /// Bound on stored attempt history.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Namespace objects are applied into, defaults to the release namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,
    /// Namespace the backend stores release bookkeeping in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_namespace: Option<String>,
    /// Service account to impersonate for backend actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Reference to a kubeconfig secret for targeting a remote cluster.
    /// Opaque to the engine, forwarded to the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_config_secret: Option<String>,
    /// Install policy.
    #[serde(default)]
    pub install: InstallPolicy,
    /// Upgrade policy.
    #[serde(default)]
    pub upgrade: UpgradePolicy,
    /// Test policy.
    #[serde(default)]
    pub test: TestPolicy,
    /// Rollback policy.
    #[serde(default)]
    pub rollback: RollbackPolicy,
    /// Uninstall policy.
    #[serde(default)]
    pub uninstall: UninstallPolicy,
    /// Drift detection policy.
    #[serde(default)]
    pub drift: DriftPolicy,
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

impl ReleaseSpec {
    /// Create a spec with defaults for everything but the chart.
    pub fn new(chart: ChartRef) -> Self {
        Self {
            generation: 1,
            chart,
            interval: DEFAULT_INTERVAL,
            timeout: None,
            values: None,
            depends_on: Vec::new(),
            suspend: false,
            max_history: DEFAULT_MAX_HISTORY,
            target_namespace: None,
            storage_namespace: None,
            service_account_name: None,
            kube_config_secret: None,
            install: InstallPolicy::default(),
            upgrade: UpgradePolicy::default(),
            test: TestPolicy::default(),
            rollback: RollbackPolicy::default(),
            uninstall: UninstallPolicy::default(),
            drift: DriftPolicy::default(),
        }
    }

    /// Set the values overlay.
    pub fn with_values(mut self, values: serde_json::Value) -> Self {
        self.values = Some(values);
        self
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, dep: DependencyRef) -> Self {
        self.depends_on.push(dep);
        self
    }

    /// Effective timeout for an action-specific override.
    pub fn action_timeout(&self, override_timeout: Option<Duration>) -> Duration {
        override_timeout
            .or(self.timeout)
            .unwrap_or(DEFAULT_ACTION_TIMEOUT)
    }

    /// Validate invariants the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::ValidationError`] when the interval is zero,
    /// the history bound is zero, or the chart reference is incomplete.
    pub fn validate(&self) -> Result<(), crate::ValidationError> {
        if self.interval.is_zero() {
            return Err(crate::ValidationError::ZeroInterval);
        }
        if self.max_history == 0 {
            return Err(crate::ValidationError::ZeroHistory);
        }
        if self.chart.chart.is_empty() || self.chart.source_name.is_empty() {
            return Err(crate::ValidationError::IncompleteChartRef);
        }
        Ok(())
    }
}

/// A release resource as held by the resource store: identity, desired
/// spec, observed status, and store-level bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    /// Identity.
    pub id: ReleaseId,
    /// User-owned desired state.
    pub spec: ReleaseSpec,
    /// Engine-owned observed state.
    pub status: ReleaseStatus,
    /// The user has requested deletion; the engine must uninstall and
    /// release its finalizer hold.
    #[serde(default)]
    pub deletion_requested: bool,
    /// The engine holds a finalizer on this resource.
    #[serde(default)]
    pub finalizer: bool,
    /// Optimistic-concurrency token, bumped by the store on every write.
    #[serde(default)]
    pub resource_version: u64,
}

impl Release {
    /// Create a resource with empty status, as the store hands it to the
    /// engine on first reconcile.
    pub fn new(id: ReleaseId, spec: ReleaseSpec) -> Self {
        Self {
            id,
            spec,
            status: ReleaseStatus::default(),
            deletion_requested: false,
            finalizer: false,
            resource_version: 1,
        }
    }
}
