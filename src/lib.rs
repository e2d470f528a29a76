// Courier dispatch library: driver-order assignment with exclusive claiming
// This exposes the core components for testing and integration

pub mod config;
pub mod dispatch;
pub mod notify;
pub mod observability;
pub mod priority;
pub mod shutdown;
pub mod store;
pub mod telemetry;

// Re-export key types for easy access
pub use crate::config::{
    config, DispatchConfig, DispatchSettings, ObservabilityConfig, TimeoutConfig,
};
pub use dispatch::{
    Agent, AgentId, AssignmentEngine, AssignmentMode, AssignmentOutcome, DeclineRecord, Delivery,
    DeliveryStatus, DispatchError, EligibleOrder, Order, OrderId, OrderRequest, OrderType,
    RejectionReason, ValidationError,
};
pub use notify::{DispatchEvent, LoggingNotifier, NotificationDispatcher, Notifier};
pub use observability::{DispatchMetrics, DispatchStats, OperationTimer};
pub use priority::Priority;
pub use shutdown::ShutdownCoordinator;
pub use store::{ClaimAttempt, DeliveryStore, InMemoryStore, StoreError};
pub use telemetry::{
    create_dispatch_span, generate_correlation_id, init_telemetry, shutdown_telemetry,
};
