//! Shared fixtures: a scriptable backend, fetcher, and poller wired
//! into an engine over the in-memory resource store.

#![allow(clippy::unwrap_used)]
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use capstan_core::{ChartRef, ObjectRef, Release, ReleaseId, ReleaseSpec};
use capstan_reconciler::{
    Artifact, ArtifactFetcher, BackendError, BackendOutcome, EventSink, FetchError,
    InMemoryResourceStore, MemoryEventSink, ObjectStatus, Reconciler, ReconcilerConfig,
    ReleaseBackend, ResourceStore, Result, ShutdownCoordinator, StatusPoller, TestOutcome,
};

/// Backend whose failures are scripted per action. Tracks call counts
/// and the maximum number of concurrently running actions.
pub struct ScriptedBackend {
    pub fail_installs: AtomicU32,
    pub fail_upgrades: AtomicU32,
    pub fail_tests: AtomicU32,
    pub delay_ms: AtomicU64,
    pub installs: AtomicU32,
    pub upgrades: AtomicU32,
    pub rollbacks: AtomicU32,
    pub uninstalls: AtomicU32,
    pub tests: AtomicU32,
    active: AtomicU32,
    pub max_active: AtomicU32,
}

impl ScriptedBackend {
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self {
            fail_installs: AtomicU32::new(0),
            fail_upgrades: AtomicU32::new(0),
            fail_tests: AtomicU32::new(0),
            delay_ms: AtomicU64::new(0),
            installs: AtomicU32::new(0),
            upgrades: AtomicU32::new(0),
            rollbacks: AtomicU32::new(0),
            uninstalls: AtomicU32::new(0),
            tests: AtomicU32::new(0),
            active: AtomicU32::new(0),
            max_active: AtomicU32::new(0),
        })
    }

    /// Decrement a scripted failure budget; true while budget remains.
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn run(&self) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let delay = Duration::from_millis(self.delay_ms.load(Ordering::SeqCst));
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn outcome(release: &Release, revision: &str) -> BackendOutcome {
        BackendOutcome {
            revision: revision.to_string(),
            manifest_digest: format!("manifest-{revision}"),
            applied_objects: vec![ObjectRef::new(
                "Deployment",
                release.id.namespace.clone(),
                release.id.name.clone(),
            )],
        }
    }
}

#[async_trait]
impl ReleaseBackend for ScriptedBackend {
    async fn install(
        &self,
        release: &Release,
        artifact: &Artifact,
    ) -> std::result::Result<BackendOutcome, BackendError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        self.run().await;
        if Self::take(&self.fail_installs) {
            return Err(BackendError("install hook failed".into()));
        }
        Ok(Self::outcome(release, &artifact.revision))
    }

    async fn upgrade(
        &self,
        release: &Release,
        artifact: &Artifact,
    ) -> std::result::Result<BackendOutcome, BackendError> {
        self.upgrades.fetch_add(1, Ordering::SeqCst);
        self.run().await;
        if Self::take(&self.fail_upgrades) {
            return Err(BackendError("upgrade hook failed".into()));
        }
        Ok(Self::outcome(release, &artifact.revision))
    }

    async fn rollback(
        &self,
        release: &Release,
        to_revision: &str,
    ) -> std::result::Result<BackendOutcome, BackendError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.run().await;
        Ok(Self::outcome(release, to_revision))
    }

    async fn uninstall(&self, _release: &Release) -> std::result::Result<(), BackendError> {
        self.uninstalls.fetch_add(1, Ordering::SeqCst);
        self.run().await;
        Ok(())
    }

    async fn test(&self, _release: &Release) -> std::result::Result<TestOutcome, BackendError> {
        self.tests.fetch_add(1, Ordering::SeqCst);
        self.run().await;
        if Self::take(&self.fail_tests) {
            return Ok(TestOutcome {
                passed: false,
                message: "smoke test failed".into(),
            });
        }
        Ok(TestOutcome {
            passed: true,
            message: "all hooks passed".into(),
        })
    }
}

/// Fetcher that fails transiently a scripted number of times, or
/// reports the artifact missing.
pub struct ScriptedFetcher {
    pub transient_failures: AtomicU32,
    pub not_found: AtomicBool,
    pub calls: AtomicU32,
}

impl ScriptedFetcher {
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self {
            transient_failures: AtomicU32::new(0),
            not_found: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ArtifactFetcher for ScriptedFetcher {
    async fn fetch(&self, chart: &ChartRef) -> std::result::Result<Artifact, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.not_found.load(Ordering::SeqCst) {
            return Err(FetchError::NotFound {
                reason: format!("{}/{} has no such version", chart.source_name, chart.chart),
            });
        }
        if ScriptedBackend::take(&self.transient_failures) {
            return Err(FetchError::Transient {
                reason: "connection reset".into(),
            });
        }
        Ok(Artifact {
            revision: chart.version.clone(),
            bytes: b"chart".to_vec(),
        })
    }
}

/// Poller with per-object scripted statuses; unknown objects report
/// Current.
#[derive(Default)]
pub struct ScriptedPoller {
    statuses: Mutex<HashMap<String, ObjectStatus>>,
}

impl ScriptedPoller {
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set(&self, object: &ObjectRef, status: ObjectStatus) {
        self.statuses.lock().await.insert(object.to_string(), status);
    }

    pub async fn clear(&self) {
        self.statuses.lock().await.clear();
    }
}

#[async_trait]
impl StatusPoller for ScriptedPoller {
    async fn poll(&self, object: &ObjectRef) -> Result<ObjectStatus> {
        Ok(self
            .statuses
            .lock()
            .await
            .get(&object.to_string())
            .copied()
            .unwrap_or(ObjectStatus::Current))
    }
}

/// A fully wired engine plus handles to all its fakes.
pub struct Harness {
    pub store: Arc<InMemoryResourceStore>,
    pub backend: Arc<ScriptedBackend>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub poller: Arc<ScriptedPoller>,
    pub events: Arc<MemoryEventSink>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub engine: Arc<Reconciler>,
}

/// Route engine logs through the test harness when `RUST_LOG` is set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness(config: ReconcilerConfig) -> Harness {
    init_tracing();
    let store = InMemoryResourceStore::new_arc();
    let backend = ScriptedBackend::new_arc();
    let fetcher = ScriptedFetcher::new_arc();
    let poller = ScriptedPoller::new_arc();
    let events = MemoryEventSink::new_arc();
    let shutdown = ShutdownCoordinator::new(config.graceful_shutdown_timeout);
    let engine = Reconciler::new(
        config,
        Arc::clone(&store) as Arc<dyn ResourceStore>,
        Arc::clone(&backend) as Arc<dyn ReleaseBackend>,
        Arc::clone(&fetcher) as Arc<dyn ArtifactFetcher>,
        Arc::clone(&poller) as Arc<dyn StatusPoller>,
        Arc::clone(&events) as Arc<dyn EventSink>,
        Arc::clone(&shutdown),
    )
    .unwrap();
    Harness {
        store,
        backend,
        fetcher,
        poller,
        events,
        shutdown,
        engine,
    }
}

pub fn podinfo_spec(version: &str) -> ReleaseSpec {
    ReleaseSpec::new(ChartRef::new("charts", "podinfo", version))
}

pub fn release_id(namespace: &str, name: &str) -> ReleaseId {
    ReleaseId::new(namespace, name)
}
