//! Fire-and-forget event notification.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use capstan_core::{Reason, ReleaseId};

use crate::error::Result;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Info,
    Warning,
}

/// A condition transition or action outcome worth telling operators about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseEvent {
    /// Release the event concerns.
    pub release: ReleaseId,
    /// Severity.
    pub severity: EventSeverity,
    /// Machine-readable reason.
    pub reason: Reason,
    /// Human-readable detail.
    pub message: String,
}

impl ReleaseEvent {
    /// Create an info event.
    pub fn info(release: ReleaseId, reason: Reason, message: impl Into<String>) -> Self {
        Self {
            release,
            severity: EventSeverity::Info,
            reason,
            message: message.into(),
        }
    }

    /// Create a warning event.
    pub fn warning(release: ReleaseId, reason: Reason, message: impl Into<String>) -> Self {
        Self {
            release,
            severity: EventSeverity::Warning,
            reason,
            message: message.into(),
        }
    }
}

/// Sink for release events. Delivery failures must never fail a
/// reconcile; callers go through [`emit`], which logs and swallows.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    async fn publish(&self, event: ReleaseEvent) -> Result<()>;
}

/// Publish an event, logging delivery failures instead of propagating.
pub async fn emit(sink: &dyn EventSink, event: ReleaseEvent) {
    let release = event.release.clone();
    let reason = event.reason;
    if let Err(err) = sink.publish(event).await {
        warn!(release = %release, reason = %reason, error = %err, "event delivery failed");
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish(&self, _event: ReleaseEvent) -> Result<()> {
        Ok(())
    }
}

/// Sink that records events for assertions.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<ReleaseEvent>>,
}

impl MemoryEventSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty recording sink wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of recorded events.
    pub async fn events(&self) -> Vec<ReleaseEvent> {
        self.events.lock().await.clone()
    }

    /// Recorded reasons, in order.
    pub async fn reasons(&self) -> Vec<Reason> {
        self.events.lock().await.iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, event: ReleaseEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
