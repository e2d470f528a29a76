// Persistence boundary for orders and deliveries.
// Claims go through `try_claim`, a conditional update that only succeeds while
// the delivery is pending with no assignee. Callers never read-then-write.

pub mod memory;

pub use memory::InMemoryStore;

use crate::dispatch::model::{AgentId, Delivery, DeliveryStatus, Order, OrderId};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("order {order_id} already exists")]
    DuplicateOrder { order_id: OrderId },

    #[error("delivery {delivery_id} changed concurrently")]
    Conflict { delivery_id: Uuid },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result of the atomic claim primitive
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimAttempt {
    Claimed(Delivery),
    /// The delivery was not claimable; carries what was found instead
    Taken {
        current: Option<AgentId>,
        status: DeliveryStatus,
    },
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Store a new order together with its pending delivery, in one step.
    /// Orders are immutable: an id that already exists is refused and the
    /// stored order is left untouched.
    async fn create_order(&self, order: Order) -> Result<Delivery, StoreError>;

    async fn get_order(&self, order_id: &OrderId) -> Result<Order, StoreError>;

    /// The order's current (latest) delivery
    async fn delivery_for_order(&self, order_id: &OrderId) -> Result<Delivery, StoreError>;

    /// Pending deliveries with no assignee, oldest first
    async fn pending_deliveries(&self) -> Result<Vec<Delivery>, StoreError>;

    /// Set the assignee only if it is currently unset and the delivery is pending
    async fn try_claim(
        &self,
        delivery_id: Uuid,
        agent_id: &AgentId,
    ) -> Result<ClaimAttempt, StoreError>;

    /// Clear the assignee only if it currently equals `agent_id`; the delivery
    /// returns to pending. Returns whether anything changed.
    async fn release(&self, delivery_id: Uuid, agent_id: &AgentId) -> Result<bool, StoreError>;

    /// Move `agent_id`'s delivery from `from` to `to`, failing with
    /// `Conflict` if either no longer matches
    async fn transition(
        &self,
        delivery_id: Uuid,
        agent_id: &AgentId,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<Delivery, StoreError>;
}
