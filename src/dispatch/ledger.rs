// Append-only record of agent refusals per order

use crate::dispatch::model::{AgentId, DeclineRecord, OrderId};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct DeclineLedger {
    records: DashMap<(OrderId, AgentId), DeclineRecord>,
}

impl DeclineLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a decline. A repeated call returns the original record and
    /// `false`, so retries never add a second entry.
    pub fn record(
        &self,
        order_id: &OrderId,
        agent_id: &AgentId,
        at: DateTime<Utc>,
    ) -> (DeclineRecord, bool) {
        match self.records.entry((order_id.clone(), agent_id.clone())) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => {
                let record = DeclineRecord {
                    order_id: order_id.clone(),
                    agent_id: agent_id.clone(),
                    declined_at: at,
                };
                slot.insert(record.clone());
                (record, true)
            }
        }
    }

    pub fn has_declined(&self, order_id: &OrderId, agent_id: &AgentId) -> bool {
        self.records
            .contains_key(&(order_id.clone(), agent_id.clone()))
    }

    pub fn get(&self, order_id: &OrderId, agent_id: &AgentId) -> Option<DeclineRecord> {
        self.records
            .get(&(order_id.clone(), agent_id.clone()))
            .map(|record| record.value().clone())
    }

    pub fn declined_by(&self, order_id: &OrderId) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self
            .records
            .iter()
            .filter(|entry| &entry.key().0 == order_id)
            .map(|entry| entry.key().1.clone())
            .collect();
        agents.sort();
        agents
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
