//! Drift detection over previously applied objects.
//!
//! Polls the live status of every object recorded by the last
//! successful action. Polls are bounded per object; a timeout reports
//! the object as `InProgress` rather than failing the reconcile. Drift
//! alone forces nothing: the report is planner input, acted on only
//! when the release's drift policy enables remediation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capstan_core::digest::hex_digest;
use capstan_core::ObjectRef;
use itertools::Itertools;
use tracing::debug;

use crate::error::Result;

/// Live status of one applied object, keyed by per-kind readiness rules
/// inside the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    /// The object is still progressing toward readiness.
    InProgress,
    /// The object matches its applied state and is ready.
    Current,
    /// The object exists but has failed.
    Failed,
    /// The object no longer exists.
    NotFound,
}

/// Status-aggregation collaborator: polls one object, bounded by the
/// caller's timeout.
#[async_trait]
pub trait StatusPoller: Send + Sync {
    /// Poll the live status of an object.
    async fn poll(&self, object: &ObjectRef) -> Result<ObjectStatus>;
}

/// One polled object in a drift report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftEntry {
    /// The object polled.
    pub object: ObjectRef,
    /// Its observed status.
    pub status: ObjectStatus,
}

/// Aggregated drift report for one release.
#[derive(Debug, Clone, Default)]
pub struct DriftReport {
    /// One entry per previously applied object.
    pub entries: Vec<DriftEntry>,
}

impl DriftReport {
    /// Drifted when any expected object is gone or failed.
    pub fn drifted(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.status, ObjectStatus::NotFound | ObjectStatus::Failed))
    }

    /// The drifted subset.
    pub fn drifted_objects(&self) -> Vec<&DriftEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, ObjectStatus::NotFound | ObjectStatus::Failed))
            .collect()
    }

    /// Stable digest of the drifted subset. Two passes observing the
    /// same drift event produce the same digest, which is how the
    /// planner remediates once per event instead of once per pass.
    pub fn digest(&self) -> Option<String> {
        if !self.drifted() {
            return None;
        }
        let canonical = self
            .drifted_objects()
            .iter()
            .map(|e| format!("{}={:?}", e.object, e.status))
            .sorted()
            .join(",");
        Some(hex_digest(canonical.as_bytes()))
    }

    /// Human-readable summary of the drifted subset.
    pub fn summary(&self) -> String {
        self.drifted_objects()
            .iter()
            .map(|e| format!("{} is {:?}", e.object, e.status))
            .join("; ")
    }
}

/// Polls applied objects and aggregates a [`DriftReport`].
pub struct DriftDetector {
    poller: Arc<dyn StatusPoller>,
    poll_timeout: Duration,
}

impl DriftDetector {
    /// Create a detector with the given per-object poll bound.
    pub fn new(poller: Arc<dyn StatusPoller>, poll_timeout: Duration) -> Self {
        Self {
            poller,
            poll_timeout,
        }
    }

    /// Poll every object and aggregate.
    ///
    /// # Errors
    ///
    /// Propagates poller errors; a poll that merely exceeds the bound
    /// is reported as `InProgress` instead.
    pub async fn detect(&self, objects: &[ObjectRef]) -> Result<DriftReport> {
        let mut entries = Vec::with_capacity(objects.len());
        for object in objects {
            let status =
                match tokio::time::timeout(self.poll_timeout, self.poller.poll(object)).await {
                    Ok(result) => result?,
                    Err(_elapsed) => {
                        debug!(object = %object, timeout = ?self.poll_timeout, "status poll timed out");
                        ObjectStatus::InProgress
                    }
                };
            entries.push(DriftEntry {
                object: object.clone(),
                status,
            });
        }
        Ok(DriftReport { entries })
    }
}
