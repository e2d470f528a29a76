use crate::dispatch::geo::GeoError;
use crate::dispatch::model::{AgentId, DeliveryStatus, OrderId};
use crate::store::StoreError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Malformed order; fatal for the call that submitted it
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("pickup coordinates are required")]
    MissingPickup,

    #[error("invalid coordinates: {0}")]
    Coordinates(#[from] GeoError),

    #[error("weight must be a non-negative number, got {0}")]
    NegativeWeight(f64),

    #[error("assignment radius must be positive, got {0}")]
    NonPositiveRadius(f64),

    #[error("unknown order type: {0}")]
    UnknownOrderType(String),

    #[error("unknown priority: {0}")]
    UnknownPriority(String),

    #[error("unknown assignment mode: {0}")]
    UnknownAssignmentMode(String),

    #[error("unknown package size: {0}")]
    UnknownPackageSize(String),
}

/// Why one agent cannot take one order. The first failing check wins.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectionReason {
    Unavailable,
    OffDuty,
    MissingLocation,
    StaleLocation { age_minutes: i64 },
    Declined,
    RestrictedTypeCapacity { held: usize, cap: usize },
    ActiveSetFull { held: usize, max: usize },
    OverWeight { load_kg: f64, order_kg: f64, capacity_kg: f64 },
    OutOfRadius { distance_km: f64, radius_km: f64 },
}

impl RejectionReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::Unavailable => "unavailable",
            RejectionReason::OffDuty => "off_duty",
            RejectionReason::MissingLocation => "missing_location",
            RejectionReason::StaleLocation { .. } => "stale_location",
            RejectionReason::Declined => "declined",
            RejectionReason::RestrictedTypeCapacity { .. } => "restricted_type_capacity",
            RejectionReason::ActiveSetFull { .. } => "active_set_full",
            RejectionReason::OverWeight { .. } => "over_weight",
            RejectionReason::OutOfRadius { .. } => "out_of_radius",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Unavailable => write!(f, "agent is not available"),
            RejectionReason::OffDuty => write!(f, "agent is off duty"),
            RejectionReason::MissingLocation => write!(f, "agent has no known location"),
            RejectionReason::StaleLocation { age_minutes } => {
                write!(f, "location is {age_minutes} minutes old")
            }
            RejectionReason::Declined => write!(f, "agent declined this order"),
            RejectionReason::RestrictedTypeCapacity { held, cap } => {
                write!(f, "restricted-type capacity reached ({held}/{cap})")
            }
            RejectionReason::ActiveSetFull { held, max } => {
                write!(f, "active assignments full ({held}/{max})")
            }
            RejectionReason::OverWeight {
                load_kg,
                order_kg,
                capacity_kg,
            } => write!(
                f,
                "carrying {load_kg:.1} kg + {order_kg:.1} kg exceeds {capacity_kg:.1} kg"
            ),
            RejectionReason::OutOfRadius {
                distance_km,
                radius_km,
            } => write!(f, "{distance_km:.2} km away, radius is {radius_km:.2} km"),
        }
    }
}

/// An excluded candidate and the first check it failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
    pub agent_id: AgentId,
    pub reason: RejectionReason,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("order validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("no eligible agent for order {order_id} ({} candidates excluded)", .exclusions.len())]
    NoEligibleAgent {
        order_id: OrderId,
        exclusions: Vec<Exclusion>,
    },

    #[error("order {order_id} is no longer available to agent {agent_id}")]
    ClaimConflict { order_id: OrderId, agent_id: AgentId },

    #[error("agent {agent_id} cannot decline order {order_id} assigned to {assigned_to}")]
    UnauthorizedDecline {
        order_id: OrderId,
        agent_id: AgentId,
        assigned_to: AgentId,
    },

    #[error("agent {agent_id} location is stale or missing")]
    StaleLocation {
        agent_id: AgentId,
        age_minutes: Option<i64>,
    },

    #[error("agent {agent_id} is not eligible for order {order_id}: {reason}")]
    NotEligible {
        order_id: OrderId,
        agent_id: AgentId,
        reason: RejectionReason,
    },

    #[error("order {order_id} is not assigned to agent {agent_id}")]
    NotAssigned { order_id: OrderId, agent_id: AgentId },

    #[error("order {order_id} is {status}, not pending")]
    NotPending {
        order_id: OrderId,
        status: DeliveryStatus,
    },

    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
}

impl DispatchError {
    /// Outcomes that leave the order pending for a later rescan
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DispatchError::NoEligibleAgent { .. } | DispatchError::Timeout { .. }
        )
    }
}
