//! Orders, deliveries and agents as the dispatch engine sees them.
//!
//! Loosely-typed ingestion fields (type, priority, mode, package size) are
//! parsed into closed enums here, so everything downstream matches on a
//! finite set instead of comparing strings.

use crate::dispatch::errors::ValidationError;
use crate::dispatch::geo::GeoPoint;
use crate::priority::Priority;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(OrderId);
string_id!(AgentId);

/// Order type category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Perishable, prepared food
    Food,
    /// Express items such as pharmacy runs
    Fast,
    Regular,
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "food" | "perishable" => Ok(OrderType::Food),
            "fast" => Ok(OrderType::Fast),
            "regular" => Ok(OrderType::Regular),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OrderType::Food => "food",
            OrderType::Fast => "fast",
            OrderType::Regular => "regular",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMode {
    #[default]
    Nearest,
    Broadcast,
}

impl FromStr for AssignmentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(AssignmentMode::Nearest),
            "broadcast" => Ok(AssignmentMode::Broadcast),
            other => Err(other.to_string()),
        }
    }
}

/// Package size class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageSize {
    Small,
    Medium,
    Large,
    ExtraLarge,
}

impl PackageSize {
    /// Size class implied by weight when the order does not name one
    pub fn for_weight(weight_kg: f64) -> Self {
        if weight_kg < 2.0 {
            PackageSize::Small
        } else if weight_kg < 5.0 {
            PackageSize::Medium
        } else if weight_kg < 10.0 {
            PackageSize::Large
        } else {
            PackageSize::ExtraLarge
        }
    }
}

impl FromStr for PackageSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" | "small_box" => Ok(PackageSize::Small),
            "medium" | "medium_box" => Ok(PackageSize::Medium),
            "large" | "large_box" => Ok(PackageSize::Large),
            "extra_large" | "extra_large_box" => Ok(PackageSize::ExtraLarge),
            other => Err(other.to_string()),
        }
    }
}

/// Order as submitted by the ingestion boundary, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub pickup_lat: Option<f64>,
    pub pickup_lng: Option<f64>,
    #[serde(default)]
    pub dropoff_lat: Option<f64>,
    #[serde(default)]
    pub dropoff_lng: Option<f64>,
    pub weight_kg: f64,
    #[serde(default)]
    pub package_size: Option<String>,
    pub order_type: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
    pub weight_kg: f64,
    pub package_size: PackageSize,
    pub order_type: OrderType,
    pub priority: Priority,
    pub radius_km: f64,
    pub mode: AssignmentMode,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Parse and validate an ingestion request into a typed order
    pub fn from_request(
        request: OrderRequest,
        default_radius_km: f64,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let order_type = request
            .order_type
            .parse::<OrderType>()
            .map_err(ValidationError::UnknownOrderType)?;
        let priority = match request.priority.as_deref() {
            Some(raw) => raw.parse().map_err(ValidationError::UnknownPriority)?,
            None => Priority::default(),
        };
        let mode = match request.mode.as_deref() {
            Some(raw) => raw.parse().map_err(ValidationError::UnknownAssignmentMode)?,
            None => AssignmentMode::default(),
        };
        let package_size = match request.package_size.as_deref() {
            Some(raw) => raw.parse().map_err(ValidationError::UnknownPackageSize)?,
            None => PackageSize::for_weight(request.weight_kg),
        };

        let order = Order {
            id: request
                .id
                .map(OrderId)
                .unwrap_or_else(|| OrderId(Uuid::new_v4().to_string())),
            pickup: GeoPoint::from_parts(request.pickup_lat, request.pickup_lng)?,
            dropoff: GeoPoint::from_parts(request.dropoff_lat, request.dropoff_lng)?,
            weight_kg: request.weight_kg,
            package_size,
            order_type,
            priority,
            radius_km: request.radius_km.unwrap_or(default_radius_km),
            mode,
            created_at: now,
        };

        order.validate()?;
        Ok(order)
    }

    /// Structural validity: pickup present and in range, weight non-negative, radius positive
    pub fn validate(&self) -> Result<(), ValidationError> {
        let pickup = self.pickup.ok_or(ValidationError::MissingPickup)?;
        pickup.check()?;
        if let Some(dropoff) = self.dropoff {
            dropoff.check()?;
        }
        if !self.weight_kg.is_finite() || self.weight_kg < 0.0 {
            return Err(ValidationError::NegativeWeight(self.weight_kg));
        }
        if !self.radius_km.is_finite() || self.radius_km <= 0.0 {
            return Err(ValidationError::NonPositiveRadius(self.radius_km));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    Accepted,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Cancelled | DeliveryStatus::Failed
        )
    }

    /// Statuses in which an agent holds the delivery
    pub fn is_active(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Assigned
                | DeliveryStatus::Accepted
                | DeliveryStatus::PickedUp
                | DeliveryStatus::InTransit
        )
    }

    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        match (self, next) {
            (Pending, Assigned) => true,
            (Assigned, Accepted) | (Accepted, PickedUp) | (PickedUp, InTransit) => true,
            (InTransit, Delivered) => true,
            (Assigned, Pending) | (Accepted, Pending) => true,
            (from, Cancelled) => !from.is_terminal(),
            (from, Failed) => from.is_active(),
            _ => false,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::Accepted => "accepted",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
            DeliveryStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Mutable assignment record for one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: OrderId,
    pub assigned_agent: Option<AgentId>,
    pub status: DeliveryStatus,
    pub mode: AssignmentMode,
    pub radius_km: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
}

impl Delivery {
    pub fn pending_for(order: &Order, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order.id.clone(),
            assigned_agent: None,
            status: DeliveryStatus::Pending,
            mode: order.mode,
            radius_km: order.radius_km,
            created_at: now,
            updated_at: now,
            assigned_at: None,
        }
    }

    pub fn is_claimable(&self) -> bool {
        self.assigned_agent.is_none() && self.status == DeliveryStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclineRecord {
    pub order_id: OrderId,
    pub agent_id: AgentId,
    pub declined_at: DateTime<Utc>,
}

/// One order held by an agent, with what the eligibility checks need
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAssignment {
    pub order_id: OrderId,
    pub order_type: OrderType,
    pub weight_kg: f64,
}

impl From<&Order> for ActiveAssignment {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            order_type: order.order_type,
            weight_kg: order.weight_kg,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_capacity_kg() -> f64 {
    20.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default = "default_true")]
    pub on_duty: bool,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub location_updated_at: Option<DateTime<Utc>>,
    #[serde(default = "default_capacity_kg")]
    pub capacity_kg: f64,
    #[serde(default)]
    pub active: Vec<ActiveAssignment>,
}

impl Agent {
    pub fn new(id: impl Into<AgentId>, capacity_kg: f64) -> Self {
        Self {
            id: id.into(),
            available: true,
            on_duty: true,
            location: None,
            location_updated_at: None,
            capacity_kg,
            active: Vec::new(),
        }
    }

    pub fn with_location(mut self, point: GeoPoint, at: DateTime<Utc>) -> Self {
        self.location = Some(point);
        self.location_updated_at = Some(at);
        self
    }

    pub fn load_kg(&self) -> f64 {
        self.active.iter().map(|a| a.weight_kg).sum()
    }

    pub fn count_of_types(&self, types: &[OrderType]) -> usize {
        self.active
            .iter()
            .filter(|a| types.contains(&a.order_type))
            .count()
    }

    pub fn holds(&self, order_id: &OrderId) -> bool {
        self.active.iter().any(|a| &a.order_id == order_id)
    }

    /// Age of the last location fix; future timestamps count as fresh
    pub fn location_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.location_updated_at
            .map(|at| (now - at).max(Duration::zero()))
    }
}
