//! Data model for the capstan release reconciliation engine.
//!
//! This crate holds the declarative half of the system:
//!
//! - **Release spec**: the user-owned desired state (chart reference,
//!   values overlay, lifecycle policies, dependencies).
//! - **Release status**: the engine-owned observed state (conditions,
//!   attempt history, failure counters, applied object set).
//!
//! It is pure data: no I/O, no async. The reconciliation engine lives
//! in `capstan-reconciler` and is the only writer of status.

pub mod digest;
pub mod error;
pub mod status;
pub mod types;

pub use digest::values_digest;
pub use error::ValidationError;
pub use status::{
    AppliedAction, AttemptOutcome, AttemptRecord, Condition, ConditionStatus, ConditionType,
    DependencyStatus, ObjectRef, Reason, ReleaseStatus,
};
pub use types::{
    ChartRef, DependencyRef, DriftPolicy, InstallPolicy, Release, ReleaseId, ReleaseSpec,
    RemediationStrategy, RollbackPolicy, TestPolicy, UninstallPolicy, UpgradePolicy,
};
