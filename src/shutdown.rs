use crate::dispatch::AssignmentEngine;
use crate::notify::NotificationDispatcher;
use crate::observability::DispatchMetrics;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Graceful shutdown: waits for queued notifications, then logs final counters
pub struct ShutdownCoordinator {
    notifications: Arc<NotificationDispatcher>,
    metrics: Arc<DispatchMetrics>,
    drain_timeout: Duration,
    log_stats: bool,
}

impl ShutdownCoordinator {
    pub fn new(engine: &AssignmentEngine, drain_timeout: Duration) -> Self {
        Self {
            notifications: engine.notifications().clone(),
            metrics: engine.metrics().clone(),
            drain_timeout,
            log_stats: true,
        }
    }

    pub fn with_stats_logging(mut self, enabled: bool) -> Self {
        self.log_stats = enabled;
        self
    }

    /// Resolves on SIGINT / Ctrl-C
    pub async fn wait_for_signal() -> Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        Ok(())
    }

    /// Returns how many notifications completed during the drain
    pub async fn drain(self) -> Result<usize> {
        let pending = self.notifications.pending();
        info!(pending, timeout_ms = self.drain_timeout.as_millis() as u64, "Draining notifications");

        let completed = self.notifications.drain(self.drain_timeout).await;
        if completed < pending {
            warn!(completed, pending, "Some notifications were abandoned at shutdown");
        }

        if self.log_stats {
            self.metrics.log_stats();
        }
        info!("Graceful shutdown completed");
        Ok(completed)
    }
}
