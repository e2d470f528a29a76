//! Outbound notifications for dispatch events.
//!
//! Delivery is fire-and-forget: a send never blocks or fails the dispatch
//! operation that produced it. Each send runs in its own task under a timeout,
//! and failures are logged and counted.

use crate::dispatch::model::{AgentId, DeliveryStatus, OrderId};
use crate::observability::DispatchMetrics;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    Assigned {
        order_id: OrderId,
        agent_id: AgentId,
        delivery_id: Uuid,
        distance_km: f64,
    },
    Offered {
        order_id: OrderId,
        agent_ids: Vec<AgentId>,
    },
    Declined {
        order_id: OrderId,
        agent_id: AgentId,
    },
    StatusChanged {
        order_id: OrderId,
        agent_id: AgentId,
        status: DeliveryStatus,
    },
}

impl DispatchEvent {
    pub fn order_id(&self) -> &OrderId {
        match self {
            DispatchEvent::Assigned { order_id, .. }
            | DispatchEvent::Offered { order_id, .. }
            | DispatchEvent::Declined { order_id, .. }
            | DispatchEvent::StatusChanged { order_id, .. } => order_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DispatchEvent::Assigned { .. } => "assigned",
            DispatchEvent::Offered { .. } => "offered",
            DispatchEvent::Declined { .. } => "declined",
            DispatchEvent::StatusChanged { .. } => "status_changed",
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: DispatchEvent) -> Result<()>;
}

/// Writes every event to the log as JSON
#[derive(Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, event: DispatchEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)?;
        info!(event = event.kind(), order_id = %event.order_id(), %payload, "Dispatch notification");
        Ok(())
    }
}

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    metrics: Arc<DispatchMetrics>,
    in_flight: Mutex<JoinSet<()>>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration, metrics: Arc<DispatchMetrics>) -> Self {
        Self {
            notifier,
            timeout,
            metrics,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    /// Queue an event for delivery. Must be called from within a tokio runtime.
    pub fn send(&self, event: DispatchEvent) {
        let notifier = self.notifier.clone();
        let metrics = self.metrics.clone();
        let limit = self.timeout;

        let mut in_flight = self.in_flight.lock();
        // reap finished sends so the set stays bounded by what is actually pending
        while in_flight.try_join_next().is_some() {}

        in_flight.spawn(async move {
            let kind = event.kind();
            let order_id = event.order_id().clone();
            match tokio::time::timeout(limit, notifier.notify(event)).await {
                Ok(Ok(())) => debug!(event = kind, order_id = %order_id, "Notification delivered"),
                Ok(Err(e)) => {
                    metrics.record_notification_failure();
                    warn!(event = kind, order_id = %order_id, error = %e, "Notification failed");
                }
                Err(_) => {
                    metrics.record_notification_failure();
                    warn!(
                        event = kind,
                        order_id = %order_id,
                        timeout_ms = limit.as_millis() as u64,
                        "Notification timed out"
                    );
                }
            }
        });
    }

    pub fn pending(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Wait for queued sends to finish. Anything still running when `limit`
    /// expires is aborted. Returns how many sends completed.
    pub async fn drain(&self, limit: Duration) -> usize {
        let mut set = std::mem::take(&mut *self.in_flight.lock());
        let mut completed = 0;
        let finished = tokio::time::timeout(limit, async {
            while set.join_next().await.is_some() {
                completed += 1;
            }
        })
        .await;
        if finished.is_err() {
            warn!(
                remaining = set.len(),
                "Notification drain timed out, aborting remaining sends"
            );
            set.abort_all();
        }
        completed
    }
}
