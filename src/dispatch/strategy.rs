use crate::dispatch::model::{AgentId, AssignmentMode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// An agent that passed every eligibility check for an order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub agent_id: AgentId,
    pub distance_km: f64,
    pub location_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrategyDecision {
    /// Claim the order for this agent now
    Claim(Candidate),
    /// Offer to every listed agent; the first successful claim wins
    Offer(Vec<Candidate>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentStrategy {
    Nearest,
    Broadcast,
}

impl AssignmentStrategy {
    pub fn for_mode(mode: AssignmentMode) -> Self {
        match mode {
            AssignmentMode::Nearest => AssignmentStrategy::Nearest,
            AssignmentMode::Broadcast => AssignmentStrategy::Broadcast,
        }
    }

    /// `None` when there is nobody to claim or offer to
    pub fn select(&self, mut candidates: Vec<Candidate>) -> Option<StrategyDecision> {
        if candidates.is_empty() {
            return None;
        }
        rank_candidates(&mut candidates);
        match self {
            AssignmentStrategy::Nearest => {
                candidates.into_iter().next().map(StrategyDecision::Claim)
            }
            AssignmentStrategy::Broadcast => Some(StrategyDecision::Offer(candidates)),
        }
    }
}

/// Nearest first; ties go to the freshest location, then the lowest agent id
pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| match a.distance_km.total_cmp(&b.distance_km) {
        Ordering::Equal => match b.location_at.cmp(&a.location_at) {
            Ordering::Equal => a.agent_id.cmp(&b.agent_id),
            other => other,
        },
        other => other,
    });
}
