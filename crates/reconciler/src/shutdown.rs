//! Graceful shutdown coordination.
//!
//! On a shutdown signal the engine stops accepting new reconcile work
//! and waits for in-flight passes to finish, bounded by the configured
//! grace window. Passes that outlive the window are abandoned; because
//! every pass persists its status before returning, an abandoned pass
//! is simply re-run from observed state on the next start.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// What triggered the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM received.
    Sigterm,
    /// SIGINT received.
    Sigint,
    /// Requested in code.
    Programmatic,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sigterm => write!(f, "SIGTERM"),
            Self::Sigint => write!(f, "SIGINT"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// Coordinates draining of in-flight reconcile passes.
pub struct ShutdownCoordinator {
    initiated: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
    signal_tx: broadcast::Sender<ShutdownSignal>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator with the given grace window.
    pub fn new(grace: Duration) -> Arc<Self> {
        let (signal_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            initiated: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            signal_tx,
            grace,
        })
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.initiated.load(Ordering::Acquire)
    }

    /// Number of reconcile passes currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.signal_tx.subscribe()
    }

    /// Register a reconcile pass. Fails once shutdown has begun so no
    /// new work starts during the drain.
    pub fn begin_pass(self: &Arc<Self>) -> Result<PassGuard> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(PassGuard {
            coordinator: Arc::clone(self),
        })
    }

    /// Request shutdown. Duplicate signals are ignored.
    pub fn initiate(&self, signal: ShutdownSignal) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("shutdown already in progress, ignoring duplicate signal");
            return;
        }
        info!(signal = %signal, in_flight = self.in_flight(), "initiating graceful shutdown");
        if self.signal_tx.send(signal).is_err() {
            debug!("no active subscribers for shutdown signal");
        }
    }

    /// Wait for in-flight passes to finish, bounded by the grace
    /// window.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] when passes were still running at the
    /// deadline.
    pub async fn drain(&self) -> Result<()> {
        let wait = async {
            while self.in_flight() > 0 {
                let notified = self.drained.notified();
                if self.in_flight() == 0 {
                    break;
                }
                notified.await;
            }
        };
        match timeout(self.grace, wait).await {
            Ok(()) => {
                info!("all reconcile passes drained");
                Ok(())
            }
            Err(_) => {
                warn!(
                    remaining = self.in_flight(),
                    grace_secs = self.grace.as_secs(),
                    "grace window exceeded with passes still in flight"
                );
                Err(Error::ShuttingDown)
            }
        }
    }
}

/// Marks one in-flight pass; dropping it releases the slot.
pub struct PassGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        if self.coordinator.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.coordinator.drained.notify_waiters();
        }
    }
}

/// Install OS signal handlers that trigger the coordinator.
pub fn install_signal_handlers(
    coordinator: Arc<ShutdownCoordinator>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "failed to install SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => coordinator.initiate(ShutdownSignal::Sigterm),
                _ = sigint.recv() => coordinator.initiate(ShutdownSignal::Sigint),
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                coordinator.initiate(ShutdownSignal::Sigint);
            }
        }
    })
}
