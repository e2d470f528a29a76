use crate::dispatch::errors::RejectionReason;
use crate::dispatch::geo::distance_between;
use crate::dispatch::ledger::DeclineLedger;
use crate::dispatch::model::{Agent, Order, OrderType};
use std::sync::Arc;

/// Limits the filter enforces per agent
#[derive(Debug, Clone)]
pub struct EligibilityPolicy {
    /// Time-sensitive order types subject to `restricted_type_cap`
    pub restricted_types: Vec<OrderType>,
    pub restricted_type_cap: usize,
    pub max_active_assignments: usize,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self {
            restricted_types: vec![OrderType::Food, OrderType::Fast],
            restricted_type_cap: 2,
            max_active_assignments: 5,
        }
    }
}

/// Decides whether one agent may take one order.
///
/// Checks short-circuit, cheapest and most selective first:
/// decline history, restricted-type capacity, general capacity and weight,
/// then distance to pickup. Availability and location freshness are screened
/// by the registry before an agent reaches this filter.
#[derive(Debug)]
pub struct EligibilityFilter {
    ledger: Arc<DeclineLedger>,
    policy: EligibilityPolicy,
}

impl EligibilityFilter {
    pub fn new(ledger: Arc<DeclineLedger>, policy: EligibilityPolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    pub fn is_restricted(&self, order_type: OrderType) -> bool {
        self.policy.restricted_types.contains(&order_type)
    }

    /// Distance to pickup in km when eligible, otherwise the first failing check
    pub fn check(&self, agent: &Agent, order: &Order) -> Result<f64, RejectionReason> {
        if self.ledger.has_declined(&order.id, &agent.id) {
            return Err(RejectionReason::Declined);
        }

        if self.is_restricted(order.order_type) {
            let held = agent.count_of_types(&self.policy.restricted_types);
            if held >= self.policy.restricted_type_cap {
                return Err(RejectionReason::RestrictedTypeCapacity {
                    held,
                    cap: self.policy.restricted_type_cap,
                });
            }
        }

        let held = agent.active.len();
        if held >= self.policy.max_active_assignments {
            return Err(RejectionReason::ActiveSetFull {
                held,
                max: self.policy.max_active_assignments,
            });
        }

        let load_kg = agent.load_kg();
        if load_kg + order.weight_kg > agent.capacity_kg {
            return Err(RejectionReason::OverWeight {
                load_kg,
                order_kg: order.weight_kg,
                capacity_kg: agent.capacity_kg,
            });
        }

        let distance_km = distance_between(agent.location, order.pickup)
            .map_err(|_| RejectionReason::MissingLocation)?;
        if distance_km > order.radius_km {
            return Err(RejectionReason::OutOfRadius {
                distance_km,
                radius_km: order.radius_km,
            });
        }

        Ok(distance_km)
    }

    pub fn is_eligible(&self, agent: &Agent, order: &Order) -> (bool, Option<RejectionReason>) {
        match self.check(agent, order) {
            Ok(_) => (true, None),
            Err(reason) => (false, Some(reason)),
        }
    }
}
