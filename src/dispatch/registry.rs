//! Live agent state: availability, location freshness and active assignments.
//!
//! Reads are lock-free snapshots. Every mutation of an agent's active set goes
//! through an [`AgentGuard`], which holds that agent's async claim lock, so
//! mutations on one agent never interleave while different agents proceed in
//! parallel.

use crate::dispatch::errors::{DispatchError, RejectionReason};
use crate::dispatch::geo::GeoPoint;
use crate::dispatch::model::{ActiveAssignment, Agent, AgentId, OrderId};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

struct AgentSlot {
    state: RwLock<Agent>,
    claim_lock: Arc<Mutex<()>>,
}

/// Exclusive handle on one agent for the duration of a claim or release
pub struct AgentGuard {
    slot: Arc<AgentSlot>,
    _lock: OwnedMutexGuard<()>,
}

impl AgentGuard {
    pub fn snapshot(&self) -> Agent {
        self.slot.state.read().clone()
    }

    pub fn record_claim(&self, assignment: ActiveAssignment) {
        let mut agent = self.slot.state.write();
        if !agent.holds(&assignment.order_id) {
            debug!(agent_id = %agent.id, order_id = %assignment.order_id, "Recorded claim");
            agent.active.push(assignment);
        }
    }

    /// Returns whether the order was held
    pub fn record_release(&self, order_id: &OrderId) -> bool {
        let mut agent = self.slot.state.write();
        let before = agent.active.len();
        agent.active.retain(|a| &a.order_id != order_id);
        let released = agent.active.len() != before;
        if released {
            debug!(agent_id = %agent.id, order_id = %order_id, "Recorded release");
        }
        released
    }
}

pub struct AgentRegistry {
    agents: DashMap<AgentId, Arc<AgentSlot>>,
    freshness: Duration,
}

impl AgentRegistry {
    pub fn new(freshness_minutes: i64) -> Self {
        Self {
            agents: DashMap::new(),
            freshness: Duration::try_minutes(freshness_minutes).unwrap_or(Duration::MAX),
        }
    }

    /// Insert or replace an agent's profile. An existing active set is kept.
    pub fn upsert_agent(&self, mut agent: Agent) {
        match self.agents.entry(agent.id.clone()) {
            Entry::Occupied(slot) => {
                let mut current = slot.get().state.write();
                agent.active = std::mem::take(&mut current.active);
                *current = agent;
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(AgentSlot {
                    state: RwLock::new(agent),
                    claim_lock: Arc::new(Mutex::new(())),
                }));
            }
        }
    }

    pub fn update_location(
        &self,
        agent_id: &AgentId,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let slot = self.slot(agent_id)?;
        let mut agent = slot.state.write();
        agent.location = Some(point);
        agent.location_updated_at = Some(at);
        Ok(())
    }

    pub fn set_availability(
        &self,
        agent_id: &AgentId,
        available: bool,
        on_duty: bool,
    ) -> Result<(), DispatchError> {
        let slot = self.slot(agent_id)?;
        let mut agent = slot.state.write();
        agent.available = available;
        agent.on_duty = on_duty;
        Ok(())
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<Agent> {
        self.agents
            .get(agent_id)
            .map(|slot| slot.state.read().clone())
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Availability, duty and location freshness gate applied before any
    /// distance-based check
    pub fn screen(&self, agent: &Agent, now: DateTime<Utc>) -> Result<(), RejectionReason> {
        if !agent.available {
            return Err(RejectionReason::Unavailable);
        }
        if !agent.on_duty {
            return Err(RejectionReason::OffDuty);
        }
        if agent.location.is_none() {
            return Err(RejectionReason::MissingLocation);
        }
        match agent.location_age(now) {
            None => Err(RejectionReason::MissingLocation),
            Some(age) if age > self.freshness => Err(RejectionReason::StaleLocation {
                age_minutes: age.num_minutes(),
            }),
            Some(_) => Ok(()),
        }
    }

    /// Every agent paired with its screening result
    pub fn screened(
        &self,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = (Agent, Result<(), RejectionReason>)> + '_ {
        self.agents.iter().map(move |entry| {
            let agent = entry.value().state.read().clone();
            let screening = self.screen(&agent, now);
            (agent, screening)
        })
    }

    /// Available, on-duty agents with a fresh location
    pub fn get_candidates(&self, now: DateTime<Utc>) -> impl Iterator<Item = Agent> + '_ {
        self.screened(now)
            .filter_map(|(agent, screening)| screening.ok().map(|_| agent))
    }

    /// Acquire the agent's claim lock. Waits behind any in-flight mutation of
    /// the same agent.
    pub async fn lock_agent(&self, agent_id: &AgentId) -> Result<AgentGuard, DispatchError> {
        let slot = self.slot(agent_id)?;
        let lock = slot.claim_lock.clone().lock_owned().await;
        Ok(AgentGuard { slot, _lock: lock })
    }

    pub async fn record_claim(
        &self,
        agent_id: &AgentId,
        assignment: ActiveAssignment,
    ) -> Result<(), DispatchError> {
        let guard = self.lock_agent(agent_id).await?;
        guard.record_claim(assignment);
        Ok(())
    }

    pub async fn record_release(
        &self,
        agent_id: &AgentId,
        order_id: &OrderId,
    ) -> Result<bool, DispatchError> {
        let guard = self.lock_agent(agent_id).await?;
        Ok(guard.record_release(order_id))
    }

    fn slot(&self, agent_id: &AgentId) -> Result<Arc<AgentSlot>, DispatchError> {
        self.agents
            .get(agent_id)
            .map(|slot| slot.value().clone())
            .ok_or_else(|| DispatchError::UnknownAgent(agent_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::model::OrderType;

    fn point() -> GeoPoint {
        GeoPoint::new(25.2048, 55.2708).unwrap()
    }

    fn registry_with(agents: Vec<Agent>) -> AgentRegistry {
        let registry = AgentRegistry::new(15);
        for agent in agents {
            registry.upsert_agent(agent);
        }
        registry
    }

    #[test]
    fn test_candidates_exclude_unavailable_off_duty_and_stale() {
        let now = Utc::now();
        let fresh = Agent::new("fresh", 20.0).with_location(point(), now - Duration::minutes(5));
        let stale = Agent::new("stale", 20.0).with_location(point(), now - Duration::minutes(16));
        let mut busy = Agent::new("busy", 20.0).with_location(point(), now);
        busy.available = false;
        let mut off = Agent::new("off", 20.0).with_location(point(), now);
        off.on_duty = false;
        let nowhere = Agent::new("nowhere", 20.0);

        let registry = registry_with(vec![fresh, stale, busy, off, nowhere]);
        let ids: Vec<AgentId> = registry.get_candidates(now).map(|a| a.id).collect();
        assert_eq!(ids, vec![AgentId::from("fresh")]);

        let stale = registry.get(&AgentId::from("stale")).unwrap();
        assert_eq!(
            registry.screen(&stale, now),
            Err(RejectionReason::StaleLocation { age_minutes: 16 })
        );
        let nowhere = registry.get(&AgentId::from("nowhere")).unwrap();
        assert_eq!(
            registry.screen(&nowhere, now),
            Err(RejectionReason::MissingLocation)
        );
    }

    #[test]
    fn test_freshness_window_is_configurable() {
        let now = Utc::now();
        let registry = AgentRegistry::new(30);
        registry.upsert_agent(
            Agent::new("a", 20.0).with_location(point(), now - Duration::minutes(20)),
        );
        assert_eq!(registry.get_candidates(now).count(), 1);
    }

    #[test]
    fn test_out_of_range_freshness_does_not_panic() {
        let now = Utc::now();
        let registry = AgentRegistry::new(i64::MAX);
        registry.upsert_agent(
            Agent::new("a", 20.0).with_location(point(), now - Duration::days(365)),
        );
        assert_eq!(registry.get_candidates(now).count(), 1);
    }

    #[test]
    fn test_concurrent_registration_keeps_one_slot() {
        let registry = AgentRegistry::new(15);
        std::thread::scope(|scope| {
            for capacity in 1..=8 {
                let registry = &registry;
                scope.spawn(move || {
                    registry.upsert_agent(Agent::new("new", capacity as f64));
                });
            }
        });
        assert_eq!(registry.len(), 1);
        let capacity = registry.get(&AgentId::from("new")).unwrap().capacity_kg;
        assert!((1.0..=8.0).contains(&capacity));

        // a later profile always replaces the registered one
        registry.upsert_agent(Agent::new("new", 42.0));
        assert_eq!(
            registry.get(&AgentId::from("new")).unwrap().capacity_kg,
            42.0
        );
    }

    #[tokio::test]
    async fn test_claim_and_release_round_trip() {
        let registry = registry_with(vec![Agent::new("a", 20.0)]);
        let id = AgentId::from("a");
        let assignment = ActiveAssignment {
            order_id: OrderId::from("o-1"),
            order_type: OrderType::Food,
            weight_kg: 2.0,
        };

        registry.record_claim(&id, assignment.clone()).await.unwrap();
        // recording the same claim twice keeps one entry
        registry.record_claim(&id, assignment).await.unwrap();
        assert_eq!(registry.get(&id).unwrap().active.len(), 1);

        assert!(registry.record_release(&id, &OrderId::from("o-1")).await.unwrap());
        assert!(!registry.record_release(&id, &OrderId::from("o-1")).await.unwrap());
        assert!(registry.get(&id).unwrap().active.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_keeps_active_set() {
        let registry = registry_with(vec![Agent::new("a", 20.0)]);
        let id = AgentId::from("a");
        registry
            .record_claim(
                &id,
                ActiveAssignment {
                    order_id: OrderId::from("o-1"),
                    order_type: OrderType::Regular,
                    weight_kg: 4.0,
                },
            )
            .await
            .unwrap();

        let mut profile = Agent::new("a", 30.0);
        profile.on_duty = false;
        registry.upsert_agent(profile);

        let agent = registry.get(&id).unwrap();
        assert_eq!(agent.capacity_kg, 30.0);
        assert!(!agent.on_duty);
        assert_eq!(agent.active.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_agent_errors() {
        let registry = AgentRegistry::new(15);
        let id = AgentId::from("ghost");
        assert!(matches!(
            registry.lock_agent(&id).await,
            Err(DispatchError::UnknownAgent(_))
        ));
        assert!(registry.update_location(&id, point(), Utc::now()).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_agent_mutations_are_serialized() {
        let registry = Arc::new(registry_with(vec![Agent::new("a", 100.0)]));
        let id = AgentId::from("a");

        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let guard = registry.lock_agent(&id).await.unwrap();
                let held = guard.snapshot().active.len();
                tokio::task::yield_now().await;
                guard.record_claim(ActiveAssignment {
                    order_id: OrderId(format!("o-{i}")),
                    order_type: OrderType::Regular,
                    weight_kg: 1.0,
                });
                // nobody else mutated while we held the guard
                assert_eq!(guard.snapshot().active.len(), held + 1);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.get(&id).unwrap().active.len(), 32);
    }
}
