pub mod eligibility;
pub mod engine;
pub mod errors;
pub mod geo;
pub mod ledger;
pub mod model;
pub mod registry;
pub mod strategy;

pub use eligibility::{EligibilityFilter, EligibilityPolicy};
pub use engine::{AssignmentEngine, AssignmentOutcome, EligibleOrder, RescanOutcome};
pub use errors::{DispatchError, Exclusion, RejectionReason, ValidationError};
pub use geo::{distance, haversine_km, GeoError, GeoPoint};
pub use ledger::DeclineLedger;
pub use model::{
    Agent, AgentId, AssignmentMode, DeclineRecord, Delivery, DeliveryStatus, Order, OrderId,
    OrderRequest, OrderType, PackageSize,
};
pub use registry::AgentRegistry;
pub use strategy::{AssignmentStrategy, Candidate, StrategyDecision};
