//! K8s-style reconciliation engine for chart releases.
//!
//! The engine converges declared releases toward their desired state:
//!
//! - **Desired state**: a [`capstan_core::ReleaseSpec`] naming a chart
//!   revision, values, and lifecycle policies
//! - **Actual state**: release status plus live object health from the
//!   cluster status aggregator
//! - **Plan**: a pure decision table mapping the gap to one lifecycle
//!   action per pass
//! - **Execute**: the action runs against a pluggable release backend
//!   with bounded timeouts and artifact fetch retry
//!
//! Every pass ends with a status write; crash recovery is simply
//! re-running the pass from observed state.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use capstan_reconciler::{
//!     InMemoryResourceStore, MemoryEventSink, Reconciler, ReconcilerConfig,
//!     ShutdownCoordinator,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryResourceStore::new_arc();
//!     let shutdown = ShutdownCoordinator::new(Duration::from_secs(600));
//!     let engine = Reconciler::new(
//!         ReconcilerConfig::default(),
//!         store,
//!         backend, // your ReleaseBackend
//!         fetcher, // your ArtifactFetcher
//!         poller,  // your StatusPoller
//!         MemoryEventSink::new_arc(),
//!         shutdown,
//!     )?;
//!
//!     engine.reconcile_all().await;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod backoff;
pub mod config;
pub mod drift;
pub mod error;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod resolver;
pub mod shutdown;
pub mod status;
pub mod store;

// Re-export the surface an embedding runtime needs.
pub use config::ReconcilerConfig;
pub use drift::{DriftDetector, DriftReport, ObjectStatus, StatusPoller};
pub use error::{Error, ErrorClass, Result};
pub use events::{EventSink, EventSeverity, MemoryEventSink, NoopEventSink, ReleaseEvent};
pub use executor::{
    ActionExecutor, Artifact, ArtifactFetcher, BackendError, BackendOutcome, FetchError,
    ReleaseBackend, TestOutcome,
};
pub use orchestrator::{ReconcileOutcome, Reconciler};
pub use planner::{plan, NoopCause, Plan, PlannedAction};
pub use resolver::{AccessPolicy, AllowAll, DenyCrossNamespace, DependencyResolver};
pub use shutdown::{install_signal_handlers, ShutdownCoordinator, ShutdownSignal};
pub use status::{PassResult, Schedule, StatusManager};
pub use store::{InMemoryResourceStore, ResourceStore};
