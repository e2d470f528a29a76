use crate::dispatch::model::{AgentId, Delivery, DeliveryStatus, Order, OrderId};
use crate::store::{ClaimAttempt, DeliveryStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Process-local store. Each delivery sits behind its own mutex, so the
/// conditional updates are atomic per delivery.
#[derive(Default)]
pub struct InMemoryStore {
    orders: DashMap<OrderId, Order>,
    deliveries: DashMap<Uuid, Arc<Mutex<Delivery>>>,
    current_delivery: DashMap<OrderId, Uuid>,
    latency: Option<Duration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, to exercise caller timeouts
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn delivery_cell(&self, delivery_id: Uuid) -> Result<Arc<Mutex<Delivery>>, StoreError> {
        self.deliveries
            .get(&delivery_id)
            .map(|cell| cell.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "delivery",
                id: delivery_id.to_string(),
            })
    }
}

#[async_trait]
impl DeliveryStore for InMemoryStore {
    async fn create_order(&self, order: Order) -> Result<Delivery, StoreError> {
        self.simulate_latency().await;
        // the entry holds the shard lock, so two creators for one order serialize here
        match self.current_delivery.entry(order.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateOrder {
                order_id: order.id.clone(),
            }),
            Entry::Vacant(slot) => {
                let delivery = Delivery::pending_for(&order, Utc::now());
                self.deliveries
                    .insert(delivery.id, Arc::new(Mutex::new(delivery.clone())));
                self.orders.insert(order.id.clone(), order);
                slot.insert(delivery.id);
                Ok(delivery)
            }
        }
    }

    async fn get_order(&self, order_id: &OrderId) -> Result<Order, StoreError> {
        self.simulate_latency().await;
        self.orders
            .get(order_id)
            .map(|order| order.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "order",
                id: order_id.to_string(),
            })
    }

    async fn delivery_for_order(&self, order_id: &OrderId) -> Result<Delivery, StoreError> {
        self.simulate_latency().await;
        let delivery_id = self
            .current_delivery
            .get(order_id)
            .map(|id| *id.value())
            .ok_or_else(|| StoreError::NotFound {
                entity: "delivery for order",
                id: order_id.to_string(),
            })?;
        let cell = self.delivery_cell(delivery_id)?;
        let delivery = cell.lock().clone();
        Ok(delivery)
    }

    async fn pending_deliveries(&self) -> Result<Vec<Delivery>, StoreError> {
        self.simulate_latency().await;
        let mut pending: Vec<Delivery> = self
            .deliveries
            .iter()
            .map(|cell| cell.value().lock().clone())
            .filter(|delivery| delivery.is_claimable())
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn try_claim(
        &self,
        delivery_id: Uuid,
        agent_id: &AgentId,
    ) -> Result<ClaimAttempt, StoreError> {
        self.simulate_latency().await;
        let cell = self.delivery_cell(delivery_id)?;
        let mut delivery = cell.lock();
        if !delivery.is_claimable() {
            return Ok(ClaimAttempt::Taken {
                current: delivery.assigned_agent.clone(),
                status: delivery.status,
            });
        }
        let now = Utc::now();
        delivery.assigned_agent = Some(agent_id.clone());
        delivery.status = DeliveryStatus::Assigned;
        delivery.assigned_at = Some(now);
        delivery.updated_at = now;
        Ok(ClaimAttempt::Claimed(delivery.clone()))
    }

    async fn release(&self, delivery_id: Uuid, agent_id: &AgentId) -> Result<bool, StoreError> {
        self.simulate_latency().await;
        let cell = self.delivery_cell(delivery_id)?;
        let mut delivery = cell.lock();
        let held = delivery.assigned_agent.as_ref() == Some(agent_id);
        if !held || !delivery.status.can_transition_to(DeliveryStatus::Pending) {
            return Ok(false);
        }
        delivery.assigned_agent = None;
        delivery.assigned_at = None;
        delivery.status = DeliveryStatus::Pending;
        delivery.updated_at = Utc::now();
        Ok(true)
    }

    async fn transition(
        &self,
        delivery_id: Uuid,
        agent_id: &AgentId,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<Delivery, StoreError> {
        self.simulate_latency().await;
        let cell = self.delivery_cell(delivery_id)?;
        let mut delivery = cell.lock();
        if delivery.status != from || delivery.assigned_agent.as_ref() != Some(agent_id) {
            return Err(StoreError::Conflict { delivery_id });
        }
        delivery.status = to;
        delivery.updated_at = Utc::now();
        Ok(delivery.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::geo::GeoPoint;
    use crate::dispatch::model::{AssignmentMode, OrderType, PackageSize};
    use crate::priority::Priority;

    fn order(id: &str) -> Order {
        Order {
            id: OrderId::from(id),
            pickup: Some(GeoPoint::new(25.2048, 55.2708).unwrap()),
            dropoff: None,
            weight_kg: 1.0,
            package_size: PackageSize::Small,
            order_type: OrderType::Regular,
            priority: Priority::Standard,
            radius_km: 5.0,
            mode: AssignmentMode::Broadcast,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_set() {
        let store = InMemoryStore::new();
        let delivery = store.create_order(order("o-1")).await.unwrap();
        let a = AgentId::from("a");
        let b = AgentId::from("b");

        match store.try_claim(delivery.id, &a).await.unwrap() {
            ClaimAttempt::Claimed(d) => {
                assert_eq!(d.assigned_agent, Some(a.clone()));
                assert_eq!(d.status, DeliveryStatus::Assigned);
            }
            other => panic!("expected claim, got {other:?}"),
        }
        assert_eq!(
            store.try_claim(delivery.id, &b).await.unwrap(),
            ClaimAttempt::Taken {
                current: Some(a.clone()),
                status: DeliveryStatus::Assigned,
            }
        );
        assert!(store.pending_deliveries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_only_by_holder() {
        let store = InMemoryStore::new();
        let delivery = store.create_order(order("o-1")).await.unwrap();
        let a = AgentId::from("a");
        store.try_claim(delivery.id, &a).await.unwrap();

        assert!(!store.release(delivery.id, &AgentId::from("b")).await.unwrap());
        assert!(store.release(delivery.id, &a).await.unwrap());
        assert!(!store.release(delivery.id, &a).await.unwrap());

        let current = store.delivery_for_order(&OrderId::from("o-1")).await.unwrap();
        assert!(current.is_claimable());
    }

    #[tokio::test]
    async fn test_existing_order_is_never_overwritten() {
        let store = InMemoryStore::new();
        let first = store.create_order(order("o-1")).await.unwrap();

        let mut changed = order("o-1");
        changed.weight_kg = 15.0;
        changed.order_type = OrderType::Fast;
        changed.radius_km = 0.1;
        assert!(matches!(
            store.create_order(changed).await,
            Err(StoreError::DuplicateOrder { .. })
        ));

        let stored = store.get_order(&OrderId::from("o-1")).await.unwrap();
        assert_eq!(stored.weight_kg, 1.0);
        assert_eq!(stored.order_type, OrderType::Regular);
        assert_eq!(stored.radius_km, 5.0);
        assert_eq!(
            store.delivery_for_order(&OrderId::from("o-1")).await.unwrap().id,
            first.id
        );
    }

    #[tokio::test]
    async fn test_finished_order_id_stays_taken() {
        let store = InMemoryStore::new();
        let first = store.create_order(order("o-1")).await.unwrap();
        let a = AgentId::from("a");
        store.try_claim(first.id, &a).await.unwrap();
        store
            .transition(first.id, &a, DeliveryStatus::Assigned, DeliveryStatus::Cancelled)
            .await
            .unwrap();

        assert!(matches!(
            store.create_order(order("o-1")).await,
            Err(StoreError::DuplicateOrder { .. })
        ));
    }

    #[tokio::test]
    async fn test_transition_checks_status_and_holder() {
        let store = InMemoryStore::new();
        let delivery = store.create_order(order("o-1")).await.unwrap();
        let a = AgentId::from("a");
        store.try_claim(delivery.id, &a).await.unwrap();

        assert!(matches!(
            store
                .transition(delivery.id, &AgentId::from("b"), DeliveryStatus::Assigned, DeliveryStatus::Accepted)
                .await,
            Err(StoreError::Conflict { .. })
        ));
        assert!(matches!(
            store
                .transition(delivery.id, &a, DeliveryStatus::Pending, DeliveryStatus::Accepted)
                .await,
            Err(StoreError::Conflict { .. })
        ));
        let moved = store
            .transition(delivery.id, &a, DeliveryStatus::Assigned, DeliveryStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(moved.status, DeliveryStatus::Accepted);
    }

    #[tokio::test]
    async fn test_missing_records() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.get_order(&OrderId::from("nope")).await,
            Err(StoreError::NotFound { entity: "order", .. })
        ));
        assert!(store.delivery_for_order(&OrderId::from("nope")).await.is_err());
        assert!(store.try_claim(Uuid::new_v4(), &AgentId::from("a")).await.is_err());
    }
}
