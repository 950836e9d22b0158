//! Dependency readiness resolution.
//!
//! Read-only: fetches each referenced release's status and evaluates
//! the readiness predicate. Edges are resolved fresh every pass and
//! never cached, since a dependency may change readiness between
//! passes. A missing dependency counts as unready, not as an error, so
//! dependents created ahead of their dependencies do not flap.

use std::sync::Arc;

use capstan_core::{DependencyStatus, Release, ReleaseId};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::ResourceStore;

/// Access-control boundary for cross-namespace dependency references.
pub trait AccessPolicy: Send + Sync {
    /// Whether a release in `from_namespace` may depend on a release in
    /// `to_namespace`.
    fn allowed(&self, from_namespace: &str, to_namespace: &str) -> bool;
}

/// Permit everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn allowed(&self, _from_namespace: &str, _to_namespace: &str) -> bool {
        true
    }
}

/// Permit only same-namespace references.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyCrossNamespace;

impl AccessPolicy for DenyCrossNamespace {
    fn allowed(&self, from_namespace: &str, to_namespace: &str) -> bool {
        from_namespace == to_namespace
    }
}

/// A dependency that blocked the pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadyDependency {
    /// Identity of the blocking release.
    pub id: ReleaseId,
    /// Why it blocked.
    pub reason: String,
}

/// Outcome of resolving a release's dependency list.
#[derive(Debug, Clone, Default)]
pub struct DependencyReadiness {
    /// Blocking entries; empty means all ready.
    pub unready: Vec<UnreadyDependency>,
    /// Per-dependency observation for status visibility.
    pub observed: Vec<DependencyStatus>,
}

impl DependencyReadiness {
    /// Whether every declared dependency is ready.
    pub fn all_ready(&self) -> bool {
        self.unready.is_empty()
    }

    /// Summary of blocking entries for conditions and events.
    pub fn summary(&self) -> String {
        self.unready
            .iter()
            .map(|d| format!("{}: {}", d.id, d.reason))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Resolves declared dependencies against live release status.
pub struct DependencyResolver {
    store: Arc<dyn ResourceStore>,
    policy: Arc<dyn AccessPolicy>,
}

impl DependencyResolver {
    /// Create a resolver.
    pub fn new(store: Arc<dyn ResourceStore>, policy: Arc<dyn AccessPolicy>) -> Self {
        Self { store, policy }
    }

    /// Resolve the dependency list of `release`.
    ///
    /// # Errors
    ///
    /// [`Error::AccessDenied`] when a reference crosses namespaces
    /// without policy permission (permanent), or a store error when a
    /// status read fails unexpectedly.
    pub async fn resolve(&self, release: &Release) -> Result<DependencyReadiness> {
        let mut readiness = DependencyReadiness::default();

        for dep in &release.spec.depends_on {
            let dep_id = dep.release_id(&release.id.namespace);

            if dep_id.namespace != release.id.namespace
                && !self.policy.allowed(&release.id.namespace, &dep_id.namespace)
            {
                return Err(Error::AccessDenied {
                    release: release.id.to_string(),
                    dependency: dep_id.to_string(),
                });
            }

            let entry = match self.store.get(&dep_id).await? {
                None => Some("release does not exist".to_string()),
                Some(target) => {
                    self.warn_on_direct_cycle(release, &target);
                    evaluate(&target, dep.min_observed_generation)
                }
            };

            match entry {
                Some(reason) => {
                    debug!(release = %release.id, dependency = %dep_id, %reason, "dependency not ready");
                    readiness.observed.push(DependencyStatus {
                        release: dep_id.to_string(),
                        ready: false,
                        reason: reason.clone(),
                    });
                    readiness.unready.push(UnreadyDependency { id: dep_id, reason });
                }
                None => readiness.observed.push(DependencyStatus {
                    release: dep_id.to_string(),
                    ready: true,
                    reason: String::new(),
                }),
            }
        }

        Ok(readiness)
    }

    /// Diagnostic only: a release depending on a release that depends
    /// straight back can never become ready through waiting.
    fn warn_on_direct_cycle(&self, release: &Release, target: &Release) {
        let points_back = target.spec.depends_on.iter().any(|d| {
            d.release_id(&target.id.namespace) == release.id
        });
        if points_back {
            warn!(
                release = %release.id,
                dependency = %target.id,
                "dependency cycle detected; both releases will stay unready until one side is edited"
            );
        }
    }
}

/// Readiness predicate for one dependency target. `None` means ready.
fn evaluate(target: &Release, min_observed_generation: Option<i64>) -> Option<String> {
    if !target.status.is_ready() {
        return Some("Ready condition is not True".to_string());
    }
    let applied = target.status.last_applied_revision.as_deref();
    let attempted = target.status.last_attempted_revision.as_deref();
    if applied != attempted {
        return Some(format!(
            "applied revision {} does not match attempted revision {}",
            applied.unwrap_or("<none>"),
            attempted.unwrap_or("<none>"),
        ));
    }
    if let Some(min) = min_observed_generation {
        if target.status.observed_generation < min {
            return Some(format!(
                "observed generation {} is below required {min}",
                target.status.observed_generation
            ));
        }
    }
    None
}
