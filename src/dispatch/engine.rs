use crate::config::{DispatchConfig, DispatchSettings};
use crate::dispatch::eligibility::EligibilityFilter;
use crate::dispatch::errors::{DispatchError, Exclusion, RejectionReason, ValidationError};
use crate::dispatch::geo::{distance_between, GeoPoint};
use crate::dispatch::ledger::DeclineLedger;
use crate::dispatch::model::{
    ActiveAssignment, Agent, AgentId, DeclineRecord, Delivery, DeliveryStatus, Order, OrderId,
    OrderRequest,
};
use crate::dispatch::registry::{AgentGuard, AgentRegistry};
use crate::dispatch::strategy::{AssignmentStrategy, Candidate, StrategyDecision};
use crate::notify::{DispatchEvent, NotificationDispatcher, Notifier};
use crate::observability::DispatchMetrics;
use crate::store::{ClaimAttempt, DeliveryStore, StoreError};
use crate::telemetry::{create_dispatch_span, generate_correlation_id};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Assigned {
        order_id: OrderId,
        agent_id: AgentId,
        /// Unknown only when replaying a claim after the agent lost its location
        distance_km: Option<f64>,
        delivery: Delivery,
    },
    /// Broadcast: every listed agent may claim; the delivery stays pending
    Offered {
        order_id: OrderId,
        agents: Vec<Candidate>,
    },
}

impl AssignmentOutcome {
    pub fn order_id(&self) -> &OrderId {
        match self {
            AssignmentOutcome::Assigned { order_id, .. }
            | AssignmentOutcome::Offered { order_id, .. } => order_id,
        }
    }

    pub fn assigned_agent(&self) -> Option<&AgentId> {
        match self {
            AssignmentOutcome::Assigned { agent_id, .. } => Some(agent_id),
            AssignmentOutcome::Offered { .. } => None,
        }
    }
}

/// Per-order result of a rescan pass
pub type RescanOutcome = (OrderId, Result<AssignmentOutcome, DispatchError>);

/// A pending order an agent may claim
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EligibleOrder {
    pub order: Order,
    pub delivery_id: uuid::Uuid,
    pub distance_km: f64,
}

/// Sole entry point for assignment, claim, decline and lifecycle changes.
///
/// Agent state and decline history are owned by the engine instance; nothing
/// is process-global, so every engine is isolated.
pub struct AssignmentEngine {
    settings: DispatchSettings,
    registry: Arc<AgentRegistry>,
    ledger: Arc<DeclineLedger>,
    filter: EligibilityFilter,
    store: Arc<dyn DeliveryStore>,
    notifications: Arc<NotificationDispatcher>,
    metrics: Arc<DispatchMetrics>,
    store_timeout: Duration,
}

impl AssignmentEngine {
    pub fn new(
        config: &DispatchConfig,
        store: Arc<dyn DeliveryStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let metrics = Arc::new(DispatchMetrics::new());
        let ledger = Arc::new(DeclineLedger::new());
        let registry = Arc::new(AgentRegistry::new(
            config.dispatch.location_freshness_minutes,
        ));
        let notifications = Arc::new(NotificationDispatcher::new(
            notifier,
            config.timeouts.notification(),
            metrics.clone(),
        ));

        Self {
            settings: config.dispatch.clone(),
            filter: EligibilityFilter::new(ledger.clone(), config.dispatch.policy()),
            registry,
            ledger,
            store,
            notifications,
            metrics,
            store_timeout: config.timeouts.store(),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<DeclineLedger> {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    pub fn notifications(&self) -> &Arc<NotificationDispatcher> {
        &self.notifications
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub async fn order(&self, order_id: &OrderId) -> Result<Order, DispatchError> {
        self.with_store("get_order", self.store.get_order(order_id))
            .await
    }

    pub async fn delivery(&self, order_id: &OrderId) -> Result<Delivery, DispatchError> {
        self.with_store("delivery_for_order", self.store.delivery_for_order(order_id))
            .await
    }

    /// Register or refresh an agent profile
    pub fn register_agent(&self, agent: Agent) {
        info!(agent_id = %agent.id, "Registered agent");
        self.registry.upsert_agent(agent);
    }

    /// Location-update write path
    pub fn update_agent_location(
        &self,
        agent_id: &AgentId,
        lat: f64,
        lng: f64,
        at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let point = GeoPoint::new(lat, lng).map_err(ValidationError::from)?;
        self.registry.update_location(agent_id, point, at)
    }

    pub fn set_agent_availability(
        &self,
        agent_id: &AgentId,
        available: bool,
        on_duty: bool,
    ) -> Result<(), DispatchError> {
        self.registry.set_availability(agent_id, available, on_duty)
    }

    pub fn validate_order(&self, order: &Order) -> Result<(), ValidationError> {
        order.validate().inspect_err(|e| {
            self.metrics.record_validation_failure();
            warn!(order_id = %order.id, error = %e, "Order failed validation");
        })
    }

    /// Parse, store and assign a new order. An order with no eligible agent
    /// is still stored and stays pending for a later rescan.
    pub async fn submit_order(
        &self,
        request: OrderRequest,
    ) -> Result<AssignmentOutcome, DispatchError> {
        let order = Order::from_request(request, self.settings.default_radius_km, Utc::now())
            .inspect_err(|e| {
                self.metrics.record_validation_failure();
                warn!(error = %e, "Rejected order request");
            })?;

        let delivery = self
            .with_store("create_order", self.store.create_order(order.clone()))
            .await?;
        info!(
            order_id = %order.id,
            delivery_id = %delivery.id,
            order_type = %order.order_type,
            priority = %order.priority,
            "Order submitted"
        );

        self.assign(&order).await
    }

    /// Select agents for a pending order. Nearest mode claims for the best
    /// candidate; broadcast mode returns the offer list and leaves the
    /// delivery pending. Nothing is mutated when no agent is eligible.
    pub async fn assign(&self, order: &Order) -> Result<AssignmentOutcome, DispatchError> {
        let correlation_id = generate_correlation_id();
        let span = create_dispatch_span("assign", Some(order.id.as_str()), None, &correlation_id);

        async move {
            self.validate_order(order)?;

            let delivery = self
                .with_store("delivery_for_order", self.store.delivery_for_order(&order.id))
                .await?;
            if !delivery.is_claimable() {
                return Err(DispatchError::NotPending {
                    order_id: order.id.clone(),
                    status: delivery.status,
                });
            }

            let (candidates, exclusions) = self.evaluate_candidates(order, Utc::now());
            debug!(
                eligible = candidates.len(),
                excluded = exclusions.len(),
                "Evaluated candidates"
            );

            match AssignmentStrategy::for_mode(order.mode).select(candidates) {
                None => {
                    self.metrics.record_no_eligible_agent();
                    info!(
                        order_id = %order.id,
                        excluded = exclusions.len(),
                        "No eligible agent, order stays pending"
                    );
                    Err(DispatchError::NoEligibleAgent {
                        order_id: order.id.clone(),
                        exclusions,
                    })
                }
                Some(StrategyDecision::Offer(agents)) => {
                    self.metrics.record_offer();
                    info!(order_id = %order.id, offered_to = agents.len(), "Order offered");
                    self.notifications.send(DispatchEvent::Offered {
                        order_id: order.id.clone(),
                        agent_ids: agents.iter().map(|c| c.agent_id.clone()).collect(),
                    });
                    Ok(AssignmentOutcome::Offered {
                        order_id: order.id.clone(),
                        agents,
                    })
                }
                Some(StrategyDecision::Claim(best)) => {
                    self.claim_order(order, &best.agent_id).await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Agent-initiated claim, the broadcast acceptance path. Retrying a claim
    /// the agent already won succeeds again without side effects.
    pub async fn claim(
        &self,
        order_id: &OrderId,
        agent_id: &AgentId,
    ) -> Result<AssignmentOutcome, DispatchError> {
        let correlation_id = generate_correlation_id();
        let span = create_dispatch_span(
            "claim",
            Some(order_id.as_str()),
            Some(agent_id.as_str()),
            &correlation_id,
        );

        async move {
            let order = self
                .with_store("get_order", self.store.get_order(order_id))
                .await?;
            self.claim_order(&order, agent_id).await
        }
        .instrument(span)
        .await
    }

    /// Refuse an order. Allowed when the order is unassigned or assigned to
    /// this agent; a held order is released back to pending. Repeating a
    /// decline returns the original record.
    pub async fn decline(
        &self,
        order_id: &OrderId,
        agent_id: &AgentId,
    ) -> Result<DeclineRecord, DispatchError> {
        let correlation_id = generate_correlation_id();
        let span = create_dispatch_span(
            "decline",
            Some(order_id.as_str()),
            Some(agent_id.as_str()),
            &correlation_id,
        );

        async move {
            let guard = self.registry.lock_agent(agent_id).await?;

            if let Some(existing) = self.ledger.get(order_id, agent_id) {
                debug!("Decline already recorded");
                return Ok(existing);
            }

            let delivery = self
                .with_store("delivery_for_order", self.store.delivery_for_order(order_id))
                .await?;

            // only another agent's hold blocks a decline; no holder is always fine
            let held_by_self = match &delivery.assigned_agent {
                Some(holder) if holder != agent_id => {
                    warn!(assigned_to = %holder, "Rejected decline of another agent's order");
                    return Err(DispatchError::UnauthorizedDecline {
                        order_id: order_id.clone(),
                        agent_id: agent_id.clone(),
                        assigned_to: holder.clone(),
                    });
                }
                Some(_) => true,
                None => false,
            };

            if delivery.status.is_terminal()
                || (held_by_self && !delivery.status.can_transition_to(DeliveryStatus::Pending))
            {
                return Err(DispatchError::InvalidTransition {
                    order_id: order_id.clone(),
                    from: delivery.status,
                    to: DeliveryStatus::Pending,
                });
            }

            if held_by_self {
                let released = self
                    .with_store("release", self.store.release(delivery.id, agent_id))
                    .await?;
                debug!(released, "Released claim on decline");
            }
            // a retry after a timed-out release finds the store already cleared
            if guard.record_release(order_id) && !held_by_self {
                debug!("Dropped local claim the store had already released");
            }

            let (record, _) = self.ledger.record(order_id, agent_id, Utc::now());
            self.metrics.record_decline();
            info!(was_assigned = held_by_self, "Order declined");
            self.notifications.send(DispatchEvent::Declined {
                order_id: order_id.clone(),
                agent_id: agent_id.clone(),
            });
            Ok(record)
        }
        .instrument(span)
        .await
    }

    /// Pending orders this agent could claim right now: highest priority
    /// first, then nearest, then oldest
    pub async fn list_eligible_orders(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<EligibleOrder>, DispatchError> {
        let correlation_id = generate_correlation_id();
        let span = create_dispatch_span(
            "list_eligible_orders",
            None,
            Some(agent_id.as_str()),
            &correlation_id,
        );

        async move {
            let agent = self
                .registry
                .get(agent_id)
                .ok_or_else(|| DispatchError::UnknownAgent(agent_id.clone()))?;

            match self.registry.screen(&agent, Utc::now()) {
                Ok(()) => {}
                Err(RejectionReason::StaleLocation { age_minutes }) => {
                    return Err(DispatchError::StaleLocation {
                        agent_id: agent_id.clone(),
                        age_minutes: Some(age_minutes),
                    });
                }
                Err(RejectionReason::MissingLocation) => {
                    return Err(DispatchError::StaleLocation {
                        agent_id: agent_id.clone(),
                        age_minutes: None,
                    });
                }
                Err(reason) => {
                    debug!(%reason, "Agent cannot take orders");
                    return Ok(Vec::new());
                }
            }

            let pending = self
                .with_store("pending_deliveries", self.store.pending_deliveries())
                .await?;

            let mut eligible = Vec::new();
            for delivery in pending {
                let order = self
                    .with_store("get_order", self.store.get_order(&delivery.order_id))
                    .await?;
                if let Ok(distance_km) = self.filter.check(&agent, &order) {
                    eligible.push(EligibleOrder {
                        order,
                        delivery_id: delivery.id,
                        distance_km,
                    });
                }
            }

            sort_eligible_orders(&mut eligible);
            debug!(count = eligible.len(), "Listed eligible orders");
            Ok(eligible)
        }
        .instrument(span)
        .await
    }

    /// Move the agent's delivery forward in its lifecycle. Reaching a
    /// terminal status frees the agent's capacity.
    pub async fn advance(
        &self,
        order_id: &OrderId,
        agent_id: &AgentId,
        next: DeliveryStatus,
    ) -> Result<Delivery, DispatchError> {
        let correlation_id = generate_correlation_id();
        let span = create_dispatch_span(
            "advance",
            Some(order_id.as_str()),
            Some(agent_id.as_str()),
            &correlation_id,
        );

        async move {
            let guard = self.registry.lock_agent(agent_id).await?;
            let delivery = self
                .with_store("delivery_for_order", self.store.delivery_for_order(order_id))
                .await?;

            if delivery.assigned_agent.as_ref() != Some(agent_id) {
                return Err(DispatchError::NotAssigned {
                    order_id: order_id.clone(),
                    agent_id: agent_id.clone(),
                });
            }
            if delivery.status == next {
                return Ok(delivery);
            }
            // claims and releases have their own paths
            let reserved = matches!(next, DeliveryStatus::Pending | DeliveryStatus::Assigned);
            if reserved || !delivery.status.can_transition_to(next) {
                return Err(DispatchError::InvalidTransition {
                    order_id: order_id.clone(),
                    from: delivery.status,
                    to: next,
                });
            }

            let updated = self
                .with_store(
                    "transition",
                    self.store
                        .transition(delivery.id, agent_id, delivery.status, next),
                )
                .await?;
            if next.is_terminal() {
                guard.record_release(order_id);
            }

            info!(from = %delivery.status, to = %next, "Delivery status changed");
            self.notifications.send(DispatchEvent::StatusChanged {
                order_id: order_id.clone(),
                agent_id: agent_id.clone(),
                status: next,
            });
            Ok(updated)
        }
        .instrument(span)
        .await
    }

    /// One assignment pass over every pending delivery, oldest first.
    /// Scheduling repeated passes is up to the caller.
    pub async fn rescan_pending(&self) -> Result<Vec<RescanOutcome>, DispatchError> {
        let pending = self
            .with_store("pending_deliveries", self.store.pending_deliveries())
            .await?;
        info!(pending = pending.len(), "Rescanning pending deliveries");

        let mut outcomes = Vec::with_capacity(pending.len());
        for delivery in pending {
            let outcome = match self
                .with_store("get_order", self.store.get_order(&delivery.order_id))
                .await
            {
                Ok(order) => self.assign(&order).await,
                Err(e) => Err(e),
            };
            outcomes.push((delivery.order_id, outcome));
        }
        Ok(outcomes)
    }

    fn evaluate_candidates(
        &self,
        order: &Order,
        now: DateTime<Utc>,
    ) -> (Vec<Candidate>, Vec<Exclusion>) {
        let mut candidates = Vec::new();
        let mut exclusions = Vec::new();

        for (agent, screening) in self.registry.screened(now) {
            match screening.and_then(|_| self.filter.check(&agent, order)) {
                Ok(distance_km) => candidates.push(Candidate {
                    location_at: agent.location_updated_at.unwrap_or(now),
                    agent_id: agent.id,
                    distance_km,
                }),
                Err(reason) => {
                    debug!(agent_id = %agent.id, reason = reason.code(), "Excluded candidate");
                    exclusions.push(Exclusion {
                        agent_id: agent.id,
                        reason,
                    });
                }
            }
        }

        exclusions.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        (candidates, exclusions)
    }

    /// Eligibility re-check and compare-and-set claim, under the agent's lock
    async fn claim_order(
        &self,
        order: &Order,
        agent_id: &AgentId,
    ) -> Result<AssignmentOutcome, DispatchError> {
        let guard = self.registry.lock_agent(agent_id).await?;
        let delivery = self
            .with_store("delivery_for_order", self.store.delivery_for_order(&order.id))
            .await?;

        if delivery.assigned_agent.as_ref() == Some(agent_id) && delivery.status.is_active() {
            return Ok(self.replayed_claim(&guard, order, delivery));
        }
        if !delivery.is_claimable() {
            return Err(self.claim_conflict(order, agent_id));
        }

        let agent = guard.snapshot();
        self.registry
            .screen(&agent, Utc::now())
            .map_err(|reason| match reason {
                RejectionReason::StaleLocation { age_minutes } => DispatchError::StaleLocation {
                    agent_id: agent_id.clone(),
                    age_minutes: Some(age_minutes),
                },
                RejectionReason::MissingLocation => DispatchError::StaleLocation {
                    agent_id: agent_id.clone(),
                    age_minutes: None,
                },
                reason => DispatchError::NotEligible {
                    order_id: order.id.clone(),
                    agent_id: agent_id.clone(),
                    reason,
                },
            })?;
        let distance_km =
            self.filter
                .check(&agent, order)
                .map_err(|reason| DispatchError::NotEligible {
                    order_id: order.id.clone(),
                    agent_id: agent_id.clone(),
                    reason,
                })?;

        match self
            .with_store("try_claim", self.store.try_claim(delivery.id, agent_id))
            .await?
        {
            ClaimAttempt::Claimed(delivery) => {
                guard.record_claim(ActiveAssignment::from(order));
                self.metrics.record_assignment();
                info!(
                    order_id = %order.id,
                    agent_id = %agent_id,
                    distance_km,
                    "Order assigned"
                );
                self.notifications.send(DispatchEvent::Assigned {
                    order_id: order.id.clone(),
                    agent_id: agent_id.clone(),
                    delivery_id: delivery.id,
                    distance_km,
                });
                Ok(AssignmentOutcome::Assigned {
                    order_id: order.id.clone(),
                    agent_id: agent_id.clone(),
                    distance_km: Some(distance_km),
                    delivery,
                })
            }
            ClaimAttempt::Taken {
                current: Some(holder),
                ..
            } if &holder == agent_id => {
                let delivery = self
                    .with_store("delivery_for_order", self.store.delivery_for_order(&order.id))
                    .await?;
                Ok(self.replayed_claim(&guard, order, delivery))
            }
            ClaimAttempt::Taken { .. } => Err(self.claim_conflict(order, agent_id)),
        }
    }

    fn replayed_claim(
        &self,
        guard: &AgentGuard,
        order: &Order,
        delivery: Delivery,
    ) -> AssignmentOutcome {
        // a previous attempt may have claimed in the store without recording locally
        guard.record_claim(ActiveAssignment::from(order));
        let agent = guard.snapshot();
        debug!(order_id = %order.id, agent_id = %agent.id, "Claim already held");
        AssignmentOutcome::Assigned {
            order_id: order.id.clone(),
            distance_km: distance_between(agent.location, order.pickup).ok(),
            agent_id: agent.id,
            delivery,
        }
    }

    fn claim_conflict(&self, order: &Order, agent_id: &AgentId) -> DispatchError {
        self.metrics.record_claim_conflict();
        warn!(order_id = %order.id, agent_id = %agent_id, "Lost claim race");
        DispatchError::ClaimConflict {
            order_id: order.id.clone(),
            agent_id: agent_id.clone(),
        }
    }

    async fn with_store<T, F>(&self, operation: &'static str, call: F) -> Result<T, DispatchError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                let timeout_ms = self.store_timeout.as_millis() as u64;
                self.metrics.record_store_timeout();
                warn!(operation, timeout_ms, "Store call timed out");
                Err(DispatchError::Timeout {
                    operation,
                    timeout_ms,
                })
            }
        }
    }
}

/// Priority high to low, then distance near to far, then creation time old to new
pub fn sort_eligible_orders(orders: &mut [EligibleOrder]) {
    orders.sort_by(|a, b| {
        b.order
            .priority
            .cmp(&a.order.priority)
            .then_with(|| a.distance_km.total_cmp(&b.distance_km))
            .then_with(|| a.order.created_at.cmp(&b.order.created_at))
    });
}
